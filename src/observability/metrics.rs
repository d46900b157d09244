//! Engine counters
//!
//! Counters only, monotonically increasing from process start. Updated with
//! relaxed atomics: a snapshot taken while queries run is approximate across
//! counters but exact per counter.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    queries_executed: AtomicU64,
    queries_timed_out: AtomicU64,
    queries_degraded: AtomicU64,
    queries_truncated: AtomicU64,
    records_ingested: AtomicU64,
    records_deleted: AtomicU64,
    splits: AtomicU64,
    merges: AtomicU64,
    tiles_deployed: AtomicU64,
    /// Nodes that skipped a query without scanning
    nodes_skipped: AtomicU64,
    mesh_steps: AtomicU64,
    messages_delivered: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_queries_executed(&self) {
        bump(&self.queries_executed, 1);
    }

    pub fn increment_queries_timed_out(&self) {
        bump(&self.queries_timed_out, 1);
    }

    pub fn increment_queries_degraded(&self) {
        bump(&self.queries_degraded, 1);
    }

    pub fn increment_queries_truncated(&self) {
        bump(&self.queries_truncated, 1);
    }

    pub fn increment_records_ingested(&self) {
        bump(&self.records_ingested, 1);
    }

    pub fn increment_records_deleted(&self) {
        bump(&self.records_deleted, 1);
    }

    pub fn increment_splits(&self) {
        bump(&self.splits, 1);
    }

    pub fn increment_merges(&self) {
        bump(&self.merges, 1);
    }

    pub fn increment_tiles_deployed(&self) {
        bump(&self.tiles_deployed, 1);
    }

    pub fn add_nodes_skipped(&self, n: u64) {
        bump(&self.nodes_skipped, n);
    }

    /// Folds in executor activity since the previous call
    pub fn add_mesh_activity(&self, steps: u64, delivered: u64) {
        bump(&self.mesh_steps, steps);
        bump(&self.messages_delivered, delivered);
    }

    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            taken_at: Utc::now(),
            queries_executed: load(&self.queries_executed),
            queries_timed_out: load(&self.queries_timed_out),
            queries_degraded: load(&self.queries_degraded),
            queries_truncated: load(&self.queries_truncated),
            records_ingested: load(&self.records_ingested),
            records_deleted: load(&self.records_deleted),
            splits: load(&self.splits),
            merges: load(&self.merges),
            tiles_deployed: load(&self.tiles_deployed),
            nodes_skipped: load(&self.nodes_skipped),
            mesh_steps: load(&self.mesh_steps),
            messages_delivered: load(&self.messages_delivered),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub queries_executed: u64,
    pub queries_timed_out: u64,
    pub queries_degraded: u64,
    pub queries_truncated: u64,
    pub records_ingested: u64,
    pub records_deleted: u64,
    pub splits: u64,
    pub merges: u64,
    pub tiles_deployed: u64,
    pub nodes_skipped: u64,
    pub mesh_steps: u64,
    pub messages_delivered: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_zero() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.queries_executed, 0);
        assert_eq!(snapshot.splits, 0);
        assert_eq!(snapshot.mesh_steps, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsRegistry::new();
        metrics.increment_splits();
        metrics.increment_splits();
        metrics.add_nodes_skipped(5);
        metrics.add_mesh_activity(10, 40);
        metrics.add_mesh_activity(2, 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.splits, 2);
        assert_eq!(snapshot.nodes_skipped, 5);
        assert_eq!(snapshot.mesh_steps, 12);
        assert_eq!(snapshot.messages_delivered, 43);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = MetricsRegistry::new();
        metrics.increment_queries_executed();
        let parsed: serde_json::Value = serde_json::from_str(&metrics.snapshot().to_json()).unwrap();
        assert_eq!(parsed["queries_executed"], 1);
        assert!(parsed["taken_at"].is_string());
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_queries_executed();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.queries_executed(), 800);
    }
}
