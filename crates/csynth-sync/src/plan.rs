//! Turning match results into an ordered, minimal operation list.
//!
//! The planner never invents work: a fully-equal matched pair produces no
//! op, a single differing field produces exactly one field-level op, and
//! removal ops exist only for elements carrying a managed id. Everything a
//! user added by hand is invisible to the plan.
//!
//! Op order within a scope is removals, then additions, then updates, and a
//! parent's sheet-level ops always precede its child scopes' ops; a sheet
//! must exist before components land on it.

use std::collections::BTreeMap;

use csynth_sch::{ManagedId, SheetPath};
use itertools::Itertools;
use serde::Serialize;

use crate::canonical::{CanonicalComponent, CanonicalGraph};
use crate::hierarchy::HierarchyDelta;
use crate::matcher::MatchResult;

/// Component fields that can change in place on a matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentField {
    SymbolId,
    Value,
    Footprint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOp {
    AddSheet {
        path: SheetPath,
        name: String,
        file: String,
    },
    RemoveSheet {
        path: SheetPath,
        file: String,
        managed_id: ManagedId,
    },
    AddComponent {
        path: SheetPath,
        component: CanonicalComponent,
    },
    RemoveComponent {
        path: SheetPath,
        reference: String,
        managed_id: ManagedId,
    },
    UpdateComponentField {
        path: SheetPath,
        reference: String,
        field: ComponentField,
        old: Option<String>,
        new: Option<String>,
    },
    RebindNet {
        path: SheetPath,
        reference: String,
        pin: String,
        old_net: Option<String>,
        new_net: Option<String>,
    },
}

impl SyncOp {
    pub fn path(&self) -> &SheetPath {
        match self {
            SyncOp::AddSheet { path, .. }
            | SyncOp::RemoveSheet { path, .. }
            | SyncOp::AddComponent { path, .. }
            | SyncOp::RemoveComponent { path, .. }
            | SyncOp::UpdateComponentField { path, .. }
            | SyncOp::RebindNet { path, .. } => path,
        }
    }
}

/// Per-scope matching input and outcome, as produced by the orchestrator.
#[derive(Debug)]
pub struct ScopeMatch {
    /// Scope address on the source side (the post-sync truth).
    pub path: SheetPath,
    pub source: Vec<CanonicalComponent>,
    pub target: Vec<CanonicalComponent>,
    pub result: MatchResult,
}

#[derive(Debug, Default)]
pub struct SyncPlan {
    pub ops: Vec<SyncOp>,
    /// Which sheet file holds each scope, for the applier.
    pub files: BTreeMap<SheetPath, String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Assemble the full plan from the hierarchy delta and per-scope matches.
pub fn build_plan(
    source: &CanonicalGraph,
    target: &CanonicalGraph,
    delta: &HierarchyDelta,
    scopes: &[ScopeMatch],
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let by_path: BTreeMap<&SheetPath, &ScopeMatch> =
        scopes.iter().map(|scope| (&scope.path, scope)).collect();
    let target_pair: BTreeMap<usize, usize> = delta.pairs.iter().map(|&(s, t)| (s, t)).collect();

    // Scope-to-file mapping: paired scopes live in their target file (the
    // file on disk), added scopes in the file the source names.
    for &(s, t) in &delta.pairs {
        plan.files.insert(
            source.nodes[s].path.clone(),
            target.nodes[t].sheet_file.clone(),
        );
    }
    for &s in &delta.added {
        plan.files.insert(
            source.nodes[s].path.clone(),
            source.nodes[s].sheet_file.clone(),
        );
    }

    // Walk source scopes root-to-leaf. Pre-order over the pair list plus
    // added nodes, which both come out of resolution in that order already.
    let mut ordered: Vec<usize> = delta.pairs.iter().map(|&(s, _)| s).collect();
    ordered.extend(&delta.added);
    ordered.sort_by_key(|&s| source.nodes[s].path.depth());

    // Removed target branches attach to their parent's scope walk: only the
    // topmost removed node needs an op, and only when managed.
    let removed_roots: Vec<usize> = delta
        .removed
        .iter()
        .copied()
        .filter(|&t| {
            target.nodes[t]
                .parent
                .is_none_or(|p| !delta.removed.contains(&p))
        })
        .collect();

    for s in ordered {
        let node = &source.nodes[s];
        let scope = by_path.get(&node.path);
        let mut removals = Vec::new();
        let mut additions = Vec::new();
        let mut updates = Vec::new();

        // Sheet-level ops for this scope's children.
        if let Some(&t) = target_pair.get(&s) {
            for &tc in removed_roots.iter().filter(|&&tc| {
                target.nodes[tc].parent == Some(t)
            }) {
                let child = &target.nodes[tc];
                match child.managed_id {
                    Some(managed_id) => removals.push(SyncOp::RemoveSheet {
                        path: child.path.clone(),
                        file: child.sheet_file.clone(),
                        managed_id,
                    }),
                    None => log::debug!(
                        "sheet {} has no managed id, leaving it untouched",
                        child.path
                    ),
                }
            }
        }
        for &sc in delta.added.iter().filter(|&&sc| {
            source.nodes[sc].parent == Some(s)
        }) {
            let child = &source.nodes[sc];
            additions.push(SyncOp::AddSheet {
                path: child.path.clone(),
                name: child.path.name().unwrap_or("sheet").to_owned(),
                file: child.sheet_file.clone(),
            });
        }

        // Component ops within this scope.
        if let Some(scope) = scope {
            plan_scope_components(scope, &mut removals, &mut additions, &mut updates);
        }

        plan.ops.extend(removals);
        plan.ops.extend(additions);
        plan.ops.extend(updates);
    }

    plan
}

fn plan_scope_components(
    scope: &ScopeMatch,
    removals: &mut Vec<SyncOp>,
    additions: &mut Vec<SyncOp>,
    updates: &mut Vec<SyncOp>,
) {
    let path = &scope.path;
    let mut extra_source: Vec<usize> = Vec::new();
    let mut extra_target: Vec<usize> = Vec::new();

    for pair in &scope.result.pairs {
        let src = &scope.source[pair.source];
        let tgt = &scope.target[pair.target];

        // A reference change is a remove-plus-add, not a rename: the pair is
        // demoted rather than silently reconciled under a new designator.
        if src.reference != tgt.reference {
            extra_source.push(pair.source);
            extra_target.push(pair.target);
            continue;
        }

        // A matched target the engine does not own is the user's element;
        // it is never edited, whatever the source says.
        if tgt.managed_id.is_none() {
            log::debug!(
                "component {}/{} has no managed id, preserving it as-is",
                path,
                tgt.reference
            );
            continue;
        }

        push_field_updates(path, src, tgt, updates);
    }

    for &t in scope.result.unmatched_target.iter().chain(&extra_target) {
        let tgt = &scope.target[t];
        if let Some(managed_id) = tgt.managed_id {
            removals.push(SyncOp::RemoveComponent {
                path: path.clone(),
                reference: tgt.reference.clone(),
                managed_id,
            });
        }
    }

    for &s in scope.result.unmatched_source.iter().chain(&extra_source) {
        additions.push(SyncOp::AddComponent {
            path: path.clone(),
            component: scope.source[s].clone(),
        });
    }
}

/// One op per differing field; equal pairs emit nothing.
fn push_field_updates(
    path: &SheetPath,
    src: &CanonicalComponent,
    tgt: &CanonicalComponent,
    updates: &mut Vec<SyncOp>,
) {
    if src.symbol_id != tgt.symbol_id {
        updates.push(SyncOp::UpdateComponentField {
            path: path.clone(),
            reference: tgt.reference.clone(),
            field: ComponentField::SymbolId,
            old: Some(tgt.symbol_id.clone()),
            new: Some(src.symbol_id.clone()),
        });
    }
    if src.value != tgt.value {
        updates.push(SyncOp::UpdateComponentField {
            path: path.clone(),
            reference: tgt.reference.clone(),
            field: ComponentField::Value,
            old: tgt.value.clone(),
            new: src.value.clone(),
        });
    }
    if src.footprint != tgt.footprint {
        updates.push(SyncOp::UpdateComponentField {
            path: path.clone(),
            reference: tgt.reference.clone(),
            field: ComponentField::Footprint,
            old: tgt.footprint.clone(),
            new: src.footprint.clone(),
        });
    }

    let src_pins = src.bindings_by_pin();
    let tgt_pins = tgt.bindings_by_pin();
    let pins = src_pins
        .keys()
        .chain(tgt_pins.keys())
        .copied()
        .sorted_unstable()
        .dedup();
    for pin in pins {
        let old = tgt_pins.get(pin).map(|s| s.to_string());
        let new = src_pins.get(pin).map(|s| s.to_string());
        if old != new {
            updates.push(SyncOp::RebindNet {
                path: path.clone(),
                reference: tgt.reference.clone(),
                pin: pin.to_owned(),
                old_net: old,
                new_net: new,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{MatchPair, MatchResult};
    use csynth_sch::ManagedId;

    fn component(reference: &str, value: Option<&str>, managed: bool) -> CanonicalComponent {
        CanonicalComponent {
            path: SheetPath::root(),
            reference: reference.to_owned(),
            symbol_id: "Device:R".to_owned(),
            value: value.map(str::to_owned),
            footprint: None,
            net_bindings: Default::default(),
            managed_id: managed.then(ManagedId::new),
        }
    }

    fn single_scope(scope: ScopeMatch) -> SyncPlan {
        let source = CanonicalGraph {
            nodes: vec![crate::canonical::HierarchyNode {
                path: SheetPath::root(),
                parent: None,
                sheet_file: "demo.kicad_sch".to_owned(),
                managed_id: None,
            }],
            ..Default::default()
        };
        let target = source.clone();
        let delta = HierarchyDelta {
            pairs: vec![(0, 0)],
            ..Default::default()
        };
        build_plan(&source, &target, &delta, &[scope])
    }

    #[test]
    fn equal_pair_emits_nothing() {
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![component("R1", Some("10k"), false)],
            target: vec![component("R1", Some("10k"), true)],
            result: MatchResult {
                pairs: vec![MatchPair {
                    source: 0,
                    target: 0,
                    confidence: 1.0,
                }],
                ..Default::default()
            },
        });
        assert!(plan.is_empty());
    }

    #[test]
    fn one_differing_field_is_exactly_one_op() {
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![component("R1", Some("4.7k"), false)],
            target: vec![component("R1", Some("10k"), true)],
            result: MatchResult {
                pairs: vec![MatchPair {
                    source: 0,
                    target: 0,
                    confidence: 1.0,
                }],
                ..Default::default()
            },
        });
        assert_eq!(plan.ops.len(), 1);
        assert!(matches!(
            &plan.ops[0],
            SyncOp::UpdateComponentField {
                field: ComponentField::Value,
                old: Some(old),
                new: Some(new),
                ..
            } if old == "10k" && new == "4.7k"
        ));
    }

    #[test]
    fn unmanaged_matched_target_is_preserved() {
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![component("R1", Some("4.7k"), false)],
            target: vec![component("R1", Some("10k"), false)],
            result: MatchResult {
                pairs: vec![MatchPair {
                    source: 0,
                    target: 0,
                    confidence: 1.0,
                }],
                ..Default::default()
            },
        });
        assert!(plan.is_empty(), "user-added component must not be edited");
    }

    #[test]
    fn unmanaged_unmatched_target_is_not_removed() {
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![],
            target: vec![component("R9", Some("1k"), false)],
            result: MatchResult {
                unmatched_target: vec![0],
                ..Default::default()
            },
        });
        assert!(plan.is_empty());
    }

    #[test]
    fn managed_unmatched_target_is_removed() {
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![],
            target: vec![component("R9", Some("1k"), true)],
            result: MatchResult {
                unmatched_target: vec![0],
                ..Default::default()
            },
        });
        assert_eq!(plan.ops.len(), 1);
        assert!(matches!(&plan.ops[0], SyncOp::RemoveComponent { reference, .. } if reference == "R9"));
    }

    #[test]
    fn reference_change_demotes_to_remove_plus_add() {
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![component("R5", Some("10k"), false)],
            target: vec![component("R1", Some("10k"), true)],
            result: MatchResult {
                pairs: vec![MatchPair {
                    source: 0,
                    target: 0,
                    confidence: 1.0,
                }],
                ..Default::default()
            },
        });
        assert_eq!(plan.ops.len(), 2);
        assert!(matches!(&plan.ops[0], SyncOp::RemoveComponent { reference, .. } if reference == "R1"));
        assert!(matches!(&plan.ops[1], SyncOp::AddComponent { component, .. } if component.reference == "R5"));
    }

    #[test]
    fn removals_precede_additions_precede_updates() {
        let mut managed_r2 = component("R2", Some("1k"), true);
        managed_r2.value = Some("1k".to_owned());
        let plan = single_scope(ScopeMatch {
            path: SheetPath::root(),
            source: vec![
                component("R1", Some("4.7k"), false),
                component("R3", Some("22k"), false),
            ],
            target: vec![component("R1", Some("10k"), true), managed_r2],
            result: MatchResult {
                pairs: vec![MatchPair {
                    source: 0,
                    target: 0,
                    confidence: 1.0,
                }],
                unmatched_source: vec![1],
                unmatched_target: vec![1],
                ..Default::default()
            },
        });
        let kinds: Vec<&'static str> = plan
            .ops
            .iter()
            .map(|op| match op {
                SyncOp::RemoveComponent { .. } => "remove",
                SyncOp::AddComponent { .. } => "add",
                SyncOp::UpdateComponentField { .. } => "update",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["remove", "add", "update"]);
    }
}
