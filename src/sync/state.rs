//! Sync state value objects.

use crate::directory::AppliedChanges;
use crate::registry::{Endpoint, FetchBatch, FetchMode};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    /// Cold start: no local data yet.
    BulkLoading,
    /// Cached data is displayed; the refresh has not started.
    ReadyStale,
    /// Cached data is displayed while the registry is queried.
    BackgroundRefreshing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::BulkLoading => "bulk loading",
            SyncPhase::ReadyStale => "ready (stale)",
            SyncPhase::BackgroundRefreshing => "refreshing",
        };
        f.write_str(name)
    }
}

/// Summary of one registry pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub upserted: usize,
    pub removed: usize,
    /// Malformed records dropped while parsing.
    pub skipped: usize,
    pub interrupted: bool,
    pub endpoint: Option<Endpoint>,
    pub mode: Option<FetchMode>,
    /// Generation published after the pass, if a rebuild happened.
    pub tree_generation: Option<u64>,
    pub full_recompute: bool,
    /// Set when the pass failed; the previous state stays in place.
    pub error: Option<String>,
}

impl SyncReport {
    pub fn from_batch(batch: &FetchBatch, applied: &AppliedChanges) -> Self {
        Self {
            upserted: applied.upserted,
            removed: applied.removed,
            skipped: batch.skipped,
            interrupted: batch.interrupted,
            endpoint: Some(batch.endpoint),
            mode: Some(batch.mode),
            ..Self::default()
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn changed(&self) -> usize {
        self.upserted + self.removed
    }

    /// Fold a later pass of the same session into this one.
    pub fn merge(&mut self, later: SyncReport) {
        self.upserted += later.upserted;
        self.removed += later.removed;
        self.skipped += later.skipped;
        self.interrupted |= later.interrupted;
        self.endpoint = later.endpoint.or(self.endpoint);
        self.mode = later.mode.or(self.mode);
        self.tree_generation = later.tree_generation.or(self.tree_generation);
        self.full_recompute |= later.full_recompute;
        self.error = later.error.or(self.error.take());
    }
}

/// Observable synchronizer state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncState {
    pub phase: SyncPhase,
    /// No usable data is displayed yet.
    pub loading: bool,
    /// A background refresh is in flight.
    pub updating: bool,
    pub last_report: Option<SyncReport>,
    /// User-facing notice, set only when the cold-start bulk fetch fails.
    pub advisory: Option<String>,
}

impl SyncState {
    pub(crate) fn enter(&mut self, phase: SyncPhase) {
        self.phase = phase;
        self.loading = phase == SyncPhase::BulkLoading;
        self.updating = phase == SyncPhase::BackgroundRefreshing;
    }
}
