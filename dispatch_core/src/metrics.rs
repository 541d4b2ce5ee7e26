use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the reconciliation loop and the dispatcher.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    cycles: AtomicU64,
    full: AtomicU64,
    delta: AtomicU64,
    skipped: AtomicU64,
    stale_discarded: AtomicU64,
    failures: AtomicU64,
    conflicts: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub cycles: u64,
    pub full: u64,
    pub delta: u64,
    pub skipped: u64,
    pub stale_discarded: u64,
    pub failures: u64,
    pub conflicts: u64,
}

impl SyncMetrics {
    pub fn record_cycle(&self, full: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if full {
            self.full.fetch_add(1, Ordering::Relaxed);
        } else {
            self.delta.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            full: self.full.load(Ordering::Relaxed),
            delta: self.delta.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}
