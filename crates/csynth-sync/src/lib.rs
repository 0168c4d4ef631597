//! Bidirectional schematic synchronization.
//!
//! One call to [`sync`] reconciles a live circuit description against a
//! persisted project: canonicalize both sides, resolve the sheet hierarchy,
//! match components per scope, plan the minimal op list, and apply it as
//! byte-range patches. Re-running with an unchanged circuit plans nothing
//! and rewrites nothing; idempotence is the core contract.
//!
//! The whole pipeline is one sequential pass over a single consistent
//! snapshot of both graphs. On any fatal error the mutated project is simply
//! dropped; disk changes only happen when the caller saves.

pub mod apply;
pub mod canonical;
pub mod hierarchy;
pub mod matcher;
pub mod place;
pub mod plan;
pub mod report;
pub mod tracker;

use csynth_kicad::{Project, ProjectError};
use csynth_sch::SheetPath;
use csynth_sch::netlist::Circuit;
use csynth_sch::refdes::IdentifierAllocator;
use thiserror::Error;

use crate::canonical::CanonicalGraph;
use crate::hierarchy::HierarchyDelta;
use crate::place::Placer;
use crate::plan::{ScopeMatch, SyncPlan};
use crate::report::SyncReport;

#[derive(Debug, Error)]
pub enum SyncError {
    /// An element is missing a resolvable identity field. Fatal for the
    /// whole sync; nothing is partially canonicalized.
    #[error("malformed input in {sheet}: {detail}")]
    MalformedInput { sheet: String, detail: String },

    /// A hierarchy path was revisited while walking the tree.
    #[error("hierarchy cycle detected at {path}")]
    HierarchyCycle { path: SheetPath },

    #[error(transparent)]
    Project(#[from] ProjectError),
}

/// Synchronize a live circuit into a loaded project.
///
/// With `dry_run` the pipeline stops after planning: the report carries the
/// full plan and the project is untouched. Otherwise the plan is applied in
/// memory; saving is still the caller's move.
pub fn sync(
    circuit: &Circuit,
    project: &mut Project,
    placer: &dyn Placer,
    dry_run: bool,
) -> Result<SyncReport, SyncError> {
    let source = canonical::canonicalize_circuit(circuit)?;
    let target = canonical::canonicalize_project(project)?;
    log::debug!(
        "canonicalized: {} source components over {} sheets, {} target components over {} sheets",
        source.components.len(),
        source.nodes.len(),
        target.components.len(),
        target.nodes.len()
    );

    let delta = hierarchy::resolve_hierarchy(&source, &target)?;
    let scopes = match_scopes(&source, &target, &delta);
    let plan = plan::build_plan(&source, &target, &delta, &scopes);
    log::info!("planned {} ops", plan.ops.len());

    let mut report = SyncReport {
        dry_run,
        ..Default::default()
    };
    for scope in &scopes {
        report.unmatched_source_count += scope.result.unmatched_source.len();
        report.unmatched_target_count += scope.result.unmatched_target.len();
        report.ambiguous_count += scope.result.ambiguous.len();
    }
    for file in &project.missing {
        report
            .warnings
            .push(format!("sheet file missing on disk, treated as empty: {file}"));
    }

    if dry_run {
        report.ops_applied = plan.ops.clone();
        return Ok(report);
    }

    let alloc = seeded_allocator(&target);
    // Persisted ids count as spent forever; a fresh mint must never collide
    // with one, including ids of elements this very plan removes.
    for id in tracker::read_tracked_ids(project) {
        alloc.reserve_id(id);
    }
    let applied = apply::apply_plan(project, &plan, placer, &alloc);
    report.ops_applied = applied.ops;
    report.warnings.extend(applied.warnings);
    Ok(report)
}

/// Run the matcher for every resolved scope.
///
/// Paired scopes match their two component sets; added source scopes match
/// against nothing (every component becomes an addition); removed target
/// scopes need no component matching at all.
fn match_scopes(
    source: &CanonicalGraph,
    target: &CanonicalGraph,
    delta: &HierarchyDelta,
) -> Vec<ScopeMatch> {
    let mut scopes = Vec::new();

    for &(s, t) in &delta.pairs {
        let source_path = &source.nodes[s].path;
        let target_path = &target.nodes[t].path;
        let source_components = source.components_in(source_path);
        let target_components = target.components_in(target_path);
        let result = matcher::match_components(
            &source_components,
            &target_components,
            &source.net_classes_in(source_path),
            &target.net_classes_in(target_path),
        );
        scopes.push(ScopeMatch {
            path: source_path.clone(),
            source: source_components.into_iter().cloned().collect(),
            target: target_components.into_iter().cloned().collect(),
            result,
        });
    }

    for &s in &delta.added {
        let path = &source.nodes[s].path;
        let source_components = source.components_in(path);
        let result = matcher::match_components(
            &source_components,
            &[],
            &source.net_classes_in(path),
            &Default::default(),
        );
        scopes.push(ScopeMatch {
            path: path.clone(),
            source: source_components.into_iter().cloned().collect(),
            target: Vec::new(),
            result,
        });
    }

    scopes
}

/// Allocator pre-seeded with every reference the target already uses, so
/// additions collide against existing designators scope by scope.
fn seeded_allocator(target: &CanonicalGraph) -> IdentifierAllocator {
    let alloc = IdentifierAllocator::new();
    for component in &target.components {
        alloc.reserve(&format!("{}::{}", component.path, component.reference));
    }
    alloc
}

/// Convenience wrapper: load, sync, and (unless dry-run) save in one call.
/// Returns the report with the list of files actually written.
pub fn sync_project_dir(
    circuit: &Circuit,
    project_path: &std::path::Path,
    placer: &dyn Placer,
    dry_run: bool,
) -> Result<SyncReport, SyncError> {
    let mut project = Project::load(project_path)?;
    let mut report = sync(circuit, &mut project, placer, dry_run)?;
    if !dry_run {
        report.files_written = project.save()?;
    }
    Ok(report)
}
