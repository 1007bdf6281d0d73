//! Per-handle counters for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for a single push handle
#[derive(Debug, Default)]
pub struct HandleMetrics {
    /// Payloads accepted into the input queue
    enqueued: AtomicU64,
    /// Enqueue attempts refused (blocked, expired, closed)
    rejected: AtomicU64,
    /// Batches executed successfully
    executed: AtomicU64,
    /// Batches the engine failed on
    exec_failures: AtomicU64,
    /// Responses handed to the RPC layer
    responses_sent: AtomicU64,
    /// Entries recovered from the WAL
    wal_recovered: AtomicU64,
    /// Expiry timer firings
    expired: AtomicU64,
    /// Versions skipped because their response could not be built
    oversized: AtomicU64,
}

impl HandleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn inc_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exec_failures(&self) -> u64 {
        self.exec_failures.load(Ordering::Relaxed)
    }

    pub fn inc_exec_failures(&self) {
        self.exec_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn responses_sent(&self) -> u64 {
        self.responses_sent.load(Ordering::Relaxed)
    }

    pub fn inc_responses_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wal_recovered(&self) -> u64 {
        self.wal_recovered.load(Ordering::Relaxed)
    }

    pub fn add_wal_recovered(&self, n: u64) {
        self.wal_recovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn inc_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn oversized(&self) -> u64 {
        self.oversized.load(Ordering::Relaxed)
    }

    pub fn inc_oversized(&self) {
        self.oversized.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued(),
            rejected: self.rejected(),
            executed: self.executed(),
            exec_failures: self.exec_failures(),
            responses_sent: self.responses_sent(),
            wal_recovered: self.wal_recovered(),
            expired: self.expired(),
            oversized: self.oversized(),
        }
    }
}

/// Snapshot of handle metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub rejected: u64,
    pub executed: u64,
    pub exec_failures: u64,
    pub responses_sent: u64,
    pub wal_recovered: u64,
    pub expired: u64,
    pub oversized: u64,
}
