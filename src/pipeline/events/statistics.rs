use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::violation::{Classification, EventKey};
use crate::pipeline::tracking::WorkerId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub violations: u64,
    pub safe_pickups: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_violations: u64,
    pub total_safe_pickups: u64,
    pub per_worker: BTreeMap<WorkerId, WorkerStats>,
}

/// Monotonic counters, applied at most once per event key.
#[derive(Debug, Clone, Default)]
pub struct StatisticsAggregator {
    applied: HashSet<EventKey>,
    snapshot: StatsSnapshot,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a terminal classification. Returns `false` when the key was
    /// already applied, in which case nothing changes.
    pub fn record(&mut self, key: EventKey, classification: Classification) -> bool {
        if !self.applied.insert(key) {
            debug!(
                "Ignoring repeated classification for worker {} started at frame {}",
                key.worker_id, key.start_frame
            );
            return false;
        }

        match classification {
            Classification::Violation => {
                self.snapshot.total_violations += 1;
                self.snapshot
                    .per_worker
                    .entry(key.worker_id)
                    .or_default()
                    .violations += 1;
            }
            Classification::SafePickup => {
                self.snapshot.total_safe_pickups += 1;
                self.snapshot
                    .per_worker
                    .entry(key.worker_id)
                    .or_default()
                    .safe_pickups += 1;
            }
            Classification::NoContact | Classification::Abandoned => {}
        }
        true
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot.clone()
    }

    pub fn worker(&self, worker_id: WorkerId) -> WorkerStats {
        self.snapshot
            .per_worker
            .get(&worker_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_violations(&self) -> u64 {
        self.snapshot.total_violations
    }

    pub fn total_safe_pickups(&self) -> u64 {
        self.snapshot.total_safe_pickups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(worker_id: WorkerId, start_frame: u64) -> EventKey {
        EventKey {
            worker_id,
            start_frame,
        }
    }

    #[test]
    fn counts_per_worker_and_globally() {
        let mut stats = StatisticsAggregator::new();
        assert!(stats.record(key(1, 10), Classification::Violation));
        assert!(stats.record(key(1, 80), Classification::SafePickup));
        assert!(stats.record(key(2, 12), Classification::Violation));

        assert_eq!(stats.total_violations(), 2);
        assert_eq!(stats.total_safe_pickups(), 1);
        assert_eq!(
            stats.worker(1),
            WorkerStats {
                violations: 1,
                safe_pickups: 1
            }
        );
        assert_eq!(stats.worker(9), WorkerStats::default());
    }

    #[test]
    fn same_key_is_applied_once() {
        let mut stats = StatisticsAggregator::new();
        assert!(stats.record(key(1, 10), Classification::Violation));
        assert!(!stats.record(key(1, 10), Classification::Violation));
        assert!(!stats.record(key(1, 10), Classification::SafePickup));
        assert_eq!(stats.total_violations(), 1);
        assert_eq!(stats.total_safe_pickups(), 0);
    }

    #[test]
    fn no_contact_changes_nothing() {
        let mut stats = StatisticsAggregator::new();
        stats.record(key(3, 1), Classification::NoContact);
        stats.record(key(3, 2), Classification::Abandoned);
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
