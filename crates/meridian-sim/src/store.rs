//! In-memory replica storage for simulation.
//!
//! `MemoryStore` is the simulated replica's local state: timestamped
//! cells and row tombstones, with a grace period that governs when a
//! deletion becomes purge-eligible and may be compacted away. The store
//! is told the current time by the cluster before it answers reads, so
//! purge eligibility tracks simulated time deterministically.

use std::collections::BTreeMap;

use meridian_coordinator::{Mutation, ReplicaStore};
use meridian_types::{Cell, ColumnName, ColumnSet, Key, Row, TableName, Timestamp, Tombstone};

/// Default grace period: deletions stay repairable for ten days of
/// timestamp time.
pub const DEFAULT_GC_GRACE_MICROS: u64 = 10 * 24 * 3600 * 1_000_000;

#[derive(Debug, Default, Clone)]
struct StoredRow {
    cells: BTreeMap<ColumnName, Cell>,
    deleted_at: Option<Timestamp>,
}

/// One simulated replica's row storage.
#[derive(Debug)]
pub struct MemoryStore {
    rows: BTreeMap<(TableName, Key), StoredRow>,
    gc_grace_micros: u64,
    now_micros: u64,
}

impl MemoryStore {
    /// Creates an empty store with the default grace period.
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            gc_grace_micros: DEFAULT_GC_GRACE_MICROS,
            now_micros: 0,
        }
    }

    /// Sets the grace period after which tombstones become purgeable.
    pub fn set_gc_grace_micros(&mut self, micros: u64) {
        self.gc_grace_micros = micros;
    }

    /// Updates the store's notion of the current time.
    pub fn set_now_micros(&mut self, micros: u64) {
        self.now_micros = self.now_micros.max(micros);
    }

    /// Writes one cell directly, bypassing the coordinator.
    pub fn put(&mut self, table: &TableName, key: &Key, column: ColumnName, cell: Cell) {
        let row = self.rows.entry((table.clone(), key.clone())).or_default();
        match row.cells.get(&column) {
            Some(existing) if !cell.supersedes(existing) => {}
            _ => {
                row.cells.insert(column, cell);
            }
        }
    }

    /// Records a row deletion directly, bypassing the coordinator.
    pub fn delete(&mut self, table: &TableName, key: &Key, deleted_at: Timestamp) {
        let row = self.rows.entry((table.clone(), key.clone())).or_default();
        row.deleted_at = Some(row.deleted_at.map_or(deleted_at, |d| d.max(deleted_at)));
    }

    /// Runs compaction on one key: a purge-eligible tombstone is dropped
    /// together with every cell it shadows.
    pub fn compact(&mut self, table: &TableName, key: &Key) {
        let Some(deleted_at) = self
            .rows
            .get(&(table.clone(), key.clone()))
            .and_then(|row| row.deleted_at)
        else {
            return;
        };
        if !self.purgeable(deleted_at) {
            return;
        }
        let Some(row) = self.rows.get_mut(&(table.clone(), key.clone())) else {
            return;
        };
        row.cells.retain(|_, cell| cell.timestamp > deleted_at);
        row.deleted_at = None;
        if row.cells.is_empty() {
            self.rows.remove(&(table.clone(), key.clone()));
        }
    }

    /// Returns the raw stored row, purge flag included, for assertions.
    pub fn row(&self, table: &TableName, key: &Key) -> Row {
        self.build_row(table, key)
    }

    fn purgeable(&self, deleted_at: Timestamp) -> bool {
        self.now_micros >= deleted_at.as_u64().saturating_add(self.gc_grace_micros)
    }

    fn build_row(&self, table: &TableName, key: &Key) -> Row {
        let mut out = Row::new();
        let Some(row) = self.rows.get(&(table.clone(), key.clone())) else {
            return out;
        };
        for (name, cell) in &row.cells {
            out.merge_cell(name.clone(), cell.clone());
        }
        if let Some(deleted_at) = row.deleted_at {
            out.merge_tombstone(Tombstone {
                deleted_at,
                purge_eligible: self.purgeable(deleted_at),
            });
        }
        out
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplicaStore for MemoryStore {
    fn read(&self, table: &TableName, key: &Key, columns: &ColumnSet) -> Row {
        self.build_row(table, key).project(columns)
    }

    fn apply(&mut self, table: &TableName, key: &Key, mutation: &Mutation) {
        for (name, cell) in &mutation.cells {
            self.put(table, key, name.clone(), cell.clone());
        }
        if let Some(tombstone) = mutation.tombstone {
            self.delete(table, key, tombstone.deleted_at);
        }
    }
}
