//! Read-repair counters.
//!
//! All counters are monotonic and lock-free except the per-table
//! speculative-retry map, which takes a short mutex. The coordinator
//! bumps them from whatever thread drives it; observers read a
//! [`MetricsSnapshot`] without stopping traffic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use meridian_types::TableName;

/// Counters maintained by the read coordinator.
#[derive(Debug, Default)]
pub struct ReadRepairMetrics {
    /// Reads that blocked on repair acknowledgments before returning.
    blocking_read_repair: AtomicU64,

    /// Repair data rounds that speculated a full-data request against a
    /// silent replica. At most one per read.
    speculated_data_request: AtomicU64,

    /// Repair write rounds that speculated a repair mutation against an
    /// extra replica. At most one per read.
    speculated_data_repair: AtomicU64,

    /// Initial-read speculations, keyed by table (driven by the table's
    /// speculative-retry policy).
    speculative_retries: Mutex<BTreeMap<TableName, u64>>,
}

impl ReadRepairMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a read that blocked on repair acknowledgments.
    pub fn record_blocking_read_repair(&self) {
        self.blocking_read_repair.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a speculative full-data request during the repair data round.
    pub fn record_speculated_data_request(&self) {
        self.speculated_data_request.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a speculative repair mutation during the repair write round.
    pub fn record_speculated_data_repair(&self) {
        self.speculated_data_repair.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an initial-read speculation for a table.
    pub fn record_speculative_retry(&self, table: &TableName) {
        let mut retries = self.speculative_retries.lock().expect("lock poisoned");
        *retries.entry(table.clone()).or_insert(0) += 1;
    }

    /// Returns the initial-read speculation count for a table.
    pub fn speculative_retries(&self, table: &TableName) -> u64 {
        let retries = self.speculative_retries.lock().expect("lock poisoned");
        retries.get(table).copied().unwrap_or(0)
    }

    /// Captures a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            blocking_read_repair: self.blocking_read_repair.load(Ordering::Relaxed),
            speculated_data_request: self.speculated_data_request.load(Ordering::Relaxed),
            speculated_data_repair: self.speculated_data_repair.load(Ordering::Relaxed),
            speculative_retries: self
                .speculative_retries
                .lock()
                .expect("lock poisoned")
                .clone(),
        }
    }
}

/// Point-in-time copy of [`ReadRepairMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Reads that blocked on repair acknowledgments.
    pub blocking_read_repair: u64,

    /// Repair data rounds that speculated an extra full-data request.
    pub speculated_data_request: u64,

    /// Repair write rounds that speculated an extra repair mutation.
    pub speculated_data_repair: u64,

    /// Initial-read speculations by table.
    pub speculative_retries: BTreeMap<TableName, u64>,
}

impl MetricsSnapshot {
    /// Returns the initial-read speculation count for a table.
    pub fn speculative_retries(&self, table: &TableName) -> u64 {
        self.speculative_retries.get(table).copied().unwrap_or(0)
    }
}
