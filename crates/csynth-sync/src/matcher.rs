//! Component matching within one hierarchy scope.
//!
//! Two passes: an exact pass on `(reference, symbol_id)`, then a
//! similarity-scored greedy pass over what remains. The matcher is
//! conservative by construction: a score below the floor, or two candidates
//! too close to call, never produces a silent guess; the component is
//! reported unmatched (and therefore becomes an addition) instead.
//!
//! All decisions are pure functions of the canonical inputs, so identical
//! inputs always produce identical results.

use std::collections::BTreeMap;

use csynth_sch::NetClass;

use crate::canonical::CanonicalComponent;

// Tunable similarity constants. Validated against the scenario tests rather
// than carved in stone; change them together.
pub const W_SYMBOL: f64 = 0.35;
pub const W_VALUE: f64 = 0.15;
pub const W_FOOTPRINT: f64 = 0.15;
pub const W_BINDINGS: f64 = 0.35;
/// Minimum score for a similarity pair to be considered at all.
pub const SCORE_FLOOR: f64 = 0.6;
/// Two candidates closer than this are ambiguous and never auto-resolved.
pub const AMBIGUITY_MARGIN: f64 = 0.05;

/// One matched pair; indices address the slices given to [`match_components`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPair {
    pub source: usize,
    pub target: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    pub pairs: Vec<MatchPair>,
    pub unmatched_source: Vec<usize>,
    pub unmatched_target: Vec<usize>,
    /// Subset of `unmatched_source` forced out by the ambiguity guard.
    pub ambiguous: Vec<usize>,
}

/// Match source components against target components within one scope.
///
/// Net classes come from canonicalization; the matcher never re-derives
/// them. Power- and ground-class nets compare by class rather than by name,
/// so renaming a supply rail does not erase the similarity of everything
/// hanging off it.
pub fn match_components(
    source: &[&CanonicalComponent],
    target: &[&CanonicalComponent],
    source_classes: &BTreeMap<&str, NetClass>,
    target_classes: &BTreeMap<&str, NetClass>,
) -> MatchResult {
    let mut result = MatchResult::default();
    let mut source_pool: Vec<usize> = (0..source.len()).collect();
    let mut target_pool: Vec<usize> = (0..target.len()).collect();

    // Exact pass: identical (reference, symbol_id).
    let mut exact_index: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for &t in &target_pool {
        exact_index
            .entry((target[t].reference.as_str(), target[t].symbol_id.as_str()))
            .or_insert(t);
    }
    source_pool.retain(|&s| {
        let key = (source[s].reference.as_str(), source[s].symbol_id.as_str());
        if let Some(&t) = exact_index.get(&key) {
            if target_pool.contains(&t) {
                result.pairs.push(MatchPair {
                    source: s,
                    target: t,
                    confidence: 1.0,
                });
                target_pool.retain(|&x| x != t);
                return false;
            }
        }
        true
    });

    // Similarity pass over the remainder.
    let source_keys: Vec<_> = source
        .iter()
        .map(|c| binding_keys(c, source_classes))
        .collect();
    let target_keys: Vec<_> = target
        .iter()
        .map(|c| binding_keys(c, target_classes))
        .collect();
    let score = |s: usize, t: usize| -> f64 {
        similarity(source[s], target[t], &source_keys[s], &target_keys[t])
    };

    // Ambiguity guard, both directions, computed on the full candidate
    // matrix before greedy selection: a source whose top two targets are too
    // close, and every source contesting a target within the margin of its
    // best, is forced unmatched rather than guessed at.
    let mut ambiguous: Vec<usize> = Vec::new();
    for &s in &source_pool {
        let mut scores: Vec<f64> = target_pool
            .iter()
            .map(|&t| score(s, t))
            .filter(|&v| v >= SCORE_FLOOR)
            .collect();
        scores.sort_by(|a, b| b.partial_cmp(a).expect("scores are finite"));
        if scores.len() >= 2 && scores[0] - scores[1] < AMBIGUITY_MARGIN {
            ambiguous.push(s);
        }
    }
    for &t in &target_pool {
        let mut contenders: Vec<(usize, f64)> = source_pool
            .iter()
            .map(|&s| (s, score(s, t)))
            .filter(|&(_, v)| v >= SCORE_FLOOR)
            .collect();
        contenders.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("scores are finite"));
        if contenders.len() >= 2 && contenders[0].1 - contenders[1].1 < AMBIGUITY_MARGIN {
            let best = contenders[0].1;
            for (s, v) in contenders {
                if best - v < AMBIGUITY_MARGIN && !ambiguous.contains(&s) {
                    ambiguous.push(s);
                }
            }
        }
    }
    ambiguous.sort_unstable();
    source_pool.retain(|s| !ambiguous.contains(s));

    // Greedy selection: repeatedly take the best remaining pair. Ties break
    // by canonical source order, then canonical target order.
    loop {
        let mut best: Option<(f64, usize, usize)> = None;
        for &s in &source_pool {
            for &t in &target_pool {
                let v = score(s, t);
                if v < SCORE_FLOOR {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((bv, bs, bt)) => {
                        v > bv || (v == bv && (s, t) < (bs, bt))
                    }
                };
                if better {
                    best = Some((v, s, t));
                }
            }
        }
        let Some((confidence, s, t)) = best else { break };
        result.pairs.push(MatchPair {
            source: s,
            target: t,
            confidence,
        });
        source_pool.retain(|&x| x != s);
        target_pool.retain(|&x| x != t);
    }

    result.unmatched_source = source_pool;
    result.unmatched_source.extend(ambiguous.iter().copied());
    result.unmatched_source.sort_unstable();
    result.unmatched_target = target_pool;
    result.ambiguous = ambiguous;
    result.pairs.sort_by_key(|p| p.source);
    result
}

/// Binding keys used for the similarity jaccard: pin id plus either the net
/// name or, for power/ground nets, the class tag.
fn binding_keys(
    component: &CanonicalComponent,
    classes: &BTreeMap<&str, NetClass>,
) -> Vec<(String, String)> {
    component
        .net_bindings
        .iter()
        .map(|(pin, net)| {
            let key = match classes.get(net.as_str()) {
                Some(class @ (NetClass::Power | NetClass::Ground)) => class.tag().to_owned(),
                _ => net.clone(),
            };
            (pin.clone(), key)
        })
        .collect()
}

fn similarity(
    source: &CanonicalComponent,
    target: &CanonicalComponent,
    source_keys: &[(String, String)],
    target_keys: &[(String, String)],
) -> f64 {
    let mut score = 0.0;
    if source.symbol_id == target.symbol_id {
        score += W_SYMBOL;
    }
    if source.value.is_some() && source.value == target.value {
        score += W_VALUE;
    }
    if source.footprint.is_some() && source.footprint == target.footprint {
        score += W_FOOTPRINT;
    }
    score += W_BINDINGS * jaccard(source_keys, target_keys);
    score
}

fn jaccard(a: &[(String, String)], b: &[(String, String)]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.iter().filter(|item| b.contains(item)).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
