//! The structured sync report handed back to the CLI wrapper.

use serde::Serialize;

use crate::plan::SyncOp;

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    /// True when the pipeline stopped after planning.
    pub dry_run: bool,
    /// Ops actually applied, or the full plan on a dry run.
    pub ops_applied: Vec<SyncOp>,
    pub unmatched_source_count: usize,
    pub unmatched_target_count: usize,
    /// Matches refused by the ambiguity guard and reported instead of
    /// guessed.
    pub ambiguous_count: usize,
    /// Recoverable conditions: missing sheet files, skipped collisions.
    /// Never folded into silent success.
    pub warnings: Vec<String>,
    /// Files rewritten on disk (empty for a dry run or a no-op sync).
    pub files_written: Vec<String>,
}

impl SyncReport {
    /// A sync that changed nothing and has nothing to warn about.
    pub fn is_clean_noop(&self) -> bool {
        self.ops_applied.is_empty() && self.warnings.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
