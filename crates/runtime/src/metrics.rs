use std::collections::BTreeMap;

use scene::DiffResult;
use serde::Serialize;

pub const SNAPSHOTS_RECEIVED: &str = "snapshots_received";
pub const SNAPSHOTS_COALESCED: &str = "snapshots_coalesced";
pub const CYCLES_COMPLETED: &str = "cycles_completed";
pub const CYCLES_DISCARDED: &str = "cycles_discarded";
pub const CYCLES_FAILED: &str = "cycles_failed";
pub const RECORDS_REJECTED: &str = "records_rejected";
pub const MARKERS_CREATED: &str = "markers_created";
pub const MARKERS_UPDATED: &str = "markers_updated";
pub const MARKERS_REMOVED: &str = "markers_removed";
pub const TRANSPORT_ERRORS: &str = "transport_errors";
pub const RENDERER_FAILURES: &str = "renderer_failures";
pub const MARKERS_LIVE: &str = "markers_live";

/// Deterministic sync metrics.
///
/// Metrics must not depend on wall-clock time or unordered iteration.
/// This type uses sorted maps so snapshots have stable ordering.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncMetrics {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<(String, u64)>,
    pub gauges: Vec<(String, i64)>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, by: u64) {
        let name = name.into();
        *self.counters.entry(name).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).copied()
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: i64) {
        self.gauges.insert(name.into(), value);
    }

    /// Accounts for one committed reconciliation.
    pub fn record_cycle(&mut self, diff: &DiffResult, live_markers: usize) {
        self.inc_counter(CYCLES_COMPLETED, 1);
        self.inc_counter(MARKERS_CREATED, diff.created.len() as u64);
        self.inc_counter(MARKERS_UPDATED, diff.updated.len() as u64);
        self.inc_counter(MARKERS_REMOVED, diff.removed.len() as u64);
        self.set_gauge(MARKERS_LIVE, live_markers as i64);
    }

    /// Returns a stable, sorted snapshot suitable for logs/debug output.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            gauges: self.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}
