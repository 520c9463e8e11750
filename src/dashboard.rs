use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::pipeline::events::{StatsSnapshot, WorkerStats};
use crate::pipeline::tracking::WorkerId;

/// Statistics published by the detection lane after every frame. Readers
/// get owned copies; the counters only ever grow.
#[derive(Debug, Clone, Default)]
pub struct StatsBoard {
    snapshot: Arc<Mutex<StatsSnapshot>>,
}

impl StatsBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, snapshot: StatsSnapshot) {
        let mut current = self.lock();
        debug_assert!(snapshot.total_violations >= current.total_violations);
        debug_assert!(snapshot.total_safe_pickups >= current.total_safe_pickups);
        *current = snapshot;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    pub fn worker(&self, worker_id: WorkerId) -> WorkerStats {
        self.lock()
            .per_worker
            .get(&worker_id)
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_violations: u64,
    pub total_safe_pickups: u64,
}

impl From<&StatsSnapshot> for Summary {
    fn from(snapshot: &StatsSnapshot) -> Self {
        Self {
            total_violations: snapshot.total_violations,
            total_safe_pickups: snapshot.total_safe_pickups,
        }
    }
}

/// Polled totals with a short cache window, so frequent dashboard polls do
/// not contend with the detection lane on every request.
#[derive(Debug)]
pub struct SummaryQuery {
    board: StatsBoard,
    cache_window: Duration,
    cached: Option<(Instant, Summary)>,
}

impl SummaryQuery {
    pub fn new(board: StatsBoard, cache_window: Duration) -> Self {
        Self {
            board,
            cache_window,
            cached: None,
        }
    }

    pub fn summary(&mut self) -> Summary {
        if let Some((at, summary)) = self.cached {
            if at.elapsed() < self.cache_window {
                return summary;
            }
        }
        let summary = Summary::from(&self.board.snapshot());
        self.cached = Some((Instant::now(), summary));
        summary
    }

    pub fn summary_json(&mut self) -> serde_json::Result<String> {
        serde_json::to_string(&self.summary())
    }
}
