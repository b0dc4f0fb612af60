//! Engine counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::liquidator::ExecutionOutcome;

/// What the most recent cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleMetrics {
    pub accounts_scanned: u64,
    pub fetch_failures: u64,
    /// Accounts skipped because a price was stale
    pub stale_skips: u64,
    /// Accounts skipped for other missing or invalid data
    pub data_skips: u64,
    pub candidates: u64,
    /// Candidates beyond the free execution capacity
    pub deferred: u64,
    /// Candidates whose account was already locked
    pub locked: u64,
    pub dispatched: u64,
    pub duration_ms: u64,
}

/// Cumulative counters since the engine was created.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    cycles: AtomicU64,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    expired: AtomicU64,
    no_route: AtomicU64,
}

impl EngineMetrics {
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_route(&self) {
        self.no_route.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &ExecutionOutcome) {
        let counter = match outcome {
            ExecutionOutcome::Success { .. } => &self.succeeded,
            ExecutionOutcome::Skipped => &self.skipped,
            ExecutionOutcome::Expired => &self.expired,
            ExecutionOutcome::SimulationFailed { .. } | ExecutionOutcome::SubmissionFailed { .. } => {
                &self.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if !matches!(outcome, ExecutionOutcome::Skipped) {
            self.attempted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, last_cycle: CycleMetrics, in_flight: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            executions_attempted: self.attempted.load(Ordering::Relaxed),
            executions_succeeded: self.succeeded.load(Ordering::Relaxed),
            executions_failed: self.failed.load(Ordering::Relaxed),
            executions_skipped: self.skipped.load(Ordering::Relaxed),
            executions_expired: self.expired.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            in_flight: in_flight as u64,
            last_cycle,
        }
    }
}

/// Point-in-time view of the engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub executions_attempted: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_skipped: u64,
    pub executions_expired: u64,
    pub no_route: u64,
    pub in_flight: u64,
    pub last_cycle: CycleMetrics,
}
