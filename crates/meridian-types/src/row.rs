//! Row model: cells, tombstones, and the divergence digest.
//!
//! A [`Row`] is what one replica returns for one key: a set of timestamped
//! [`Cell`]s, optionally under a row [`Tombstone`]. The [`Digest`] is a
//! compact hash of the repairable content of a row, used to detect replica
//! disagreement without shipping full data.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::column::{ColumnName, ColumnSet};

// ============================================================================
// Timestamp - Copy (8-byte value)
// ============================================================================

/// Write timestamp of a cell or deletion, in microseconds.
///
/// Timestamps are client-assigned and totally ordered; the newest
/// timestamp wins reconciliation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The zero timestamp (before any write).
    pub const ZERO: Timestamp = Timestamp(0);

    /// Creates a timestamp from raw microseconds.
    pub fn new(micros: u64) -> Self {
        Self(micros)
    }

    /// Returns the timestamp as microseconds.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ts#{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Self(micros)
    }
}

// ============================================================================
// Cell
// ============================================================================

/// One column's value on one replica, with its write timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// The column value.
    pub value: Bytes,

    /// When the value was written.
    pub timestamp: Timestamp,
}

impl Cell {
    /// Creates a cell.
    pub fn new(value: impl Into<Bytes>, timestamp: Timestamp) -> Self {
        Self {
            value: value.into(),
            timestamp,
        }
    }

    /// Returns true if this cell supersedes `other`.
    ///
    /// Newest timestamp wins; identical timestamps fall back to the
    /// lexicographically greater value so the outcome is deterministic on
    /// every coordinator. Two correct replicas never produce the same
    /// timestamp with different values, so the fallback is a tie-break of
    /// last resort, not a conflict-resolution scheme.
    pub fn supersedes(&self, other: &Cell) -> bool {
        match self.timestamp.cmp(&other.timestamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.value > other.value,
        }
    }
}

// ============================================================================
// Tombstone
// ============================================================================

/// A row deletion marker.
///
/// Shadows every cell written at or before `deleted_at`. Once the grace
/// period elapses on the replica holding it, the tombstone becomes
/// purge-eligible: compaction may drop it, and it must no longer be
/// propagated by read repair. A purge-eligible tombstone that reaches a
/// replica which already compacted the row away would only recreate state
/// that replica correctly removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Timestamp of the deletion.
    pub deleted_at: Timestamp,

    /// True once the grace period has elapsed on the responding replica.
    pub purge_eligible: bool,
}

impl Tombstone {
    /// Creates a live (not yet purgeable) tombstone.
    pub fn new(deleted_at: Timestamp) -> Self {
        Self {
            deleted_at,
            purge_eligible: false,
        }
    }

    /// Returns true if the tombstone shadows a write at `timestamp`.
    ///
    /// Deletions win ties: a cell written at exactly `deleted_at` is
    /// shadowed.
    pub fn shadows(&self, timestamp: Timestamp) -> bool {
        timestamp <= self.deleted_at
    }
}

// ============================================================================
// Row
// ============================================================================

/// The contents of one key on one replica, restricted to some column set.
///
/// An empty row is a valid response: it is how a replica that has no
/// record of the key at all answers, and it participates in
/// reconciliation (unlike an absent response, which does not).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Row {
    /// Cells by column name.
    cells: BTreeMap<ColumnName, Cell>,

    /// Row-level deletion, if any.
    tombstone: Option<Tombstone>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a cell, keeping whichever of the old and new cells supersedes
    /// the other.
    pub fn merge_cell(&mut self, column: ColumnName, cell: Cell) {
        match self.cells.get(&column) {
            Some(existing) if !cell.supersedes(existing) => {}
            _ => {
                self.cells.insert(column, cell);
            }
        }
    }

    /// Applies a row deletion, keeping the newest tombstone.
    ///
    /// When timestamps are equal the tombstones describe the same
    /// deletion; it is purge-eligible as soon as any source says so.
    pub fn merge_tombstone(&mut self, tombstone: Tombstone) {
        match &mut self.tombstone {
            Some(existing) if existing.deleted_at == tombstone.deleted_at => {
                existing.purge_eligible |= tombstone.purge_eligible;
            }
            Some(existing) if existing.deleted_at > tombstone.deleted_at => {}
            _ => self.tombstone = Some(tombstone),
        }
    }

    /// Returns the raw cell for a column, shadowed or not.
    pub fn cell(&self, column: &ColumnName) -> Option<&Cell> {
        self.cells.get(column)
    }

    /// Returns the cell for a column unless the row tombstone shadows it.
    pub fn live_cell(&self, column: &ColumnName) -> Option<&Cell> {
        let cell = self.cells.get(column)?;
        match self.tombstone {
            Some(t) if t.shadows(cell.timestamp) => None,
            _ => Some(cell),
        }
    }

    /// Iterates over cells not shadowed by the row tombstone.
    pub fn live_cells(&self) -> impl Iterator<Item = (&ColumnName, &Cell)> {
        let tombstone = self.tombstone;
        self.cells.iter().filter(move |(_, cell)| match tombstone {
            Some(t) => !t.shadows(cell.timestamp),
            None => true,
        })
    }

    /// Returns the row tombstone, if any.
    pub fn tombstone(&self) -> Option<Tombstone> {
        self.tombstone
    }

    /// Returns a copy restricted to the given column set.
    ///
    /// The tombstone is retained: a deletion applies to every projection
    /// of the row.
    pub fn project(&self, columns: &ColumnSet) -> Row {
        let cells = self
            .cells
            .iter()
            .filter(|(name, _)| columns.selects(name))
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect();
        Row {
            cells,
            tombstone: self.tombstone,
        }
    }

    /// Returns true if the row has no cells and no tombstone.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.tombstone.is_none()
    }

    /// Returns the number of raw cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Computes the divergence digest of the row for a column set.
    ///
    /// The digest covers the *repairable* content only: live cells
    /// selected by `columns`, plus a non-purge-eligible row tombstone.
    /// A purge-eligible tombstone (and anything it shadows) is excluded,
    /// so a replica still holding such a tombstone and a replica that has
    /// already compacted the row away produce identical digests and the
    /// read completes without any repair round between them.
    pub fn digest(&self, columns: &ColumnSet) -> Digest {
        let mut hasher = crc32fast::Hasher::new();

        for (name, cell) in self.live_cells() {
            if !columns.selects(name) {
                continue;
            }
            hasher.update(name.as_str().as_bytes());
            hasher.update(&[0u8]);
            hasher.update(&cell.value);
            hasher.update(&cell.timestamp.as_u64().to_le_bytes());
        }

        match self.tombstone {
            Some(t) if !t.purge_eligible => {
                hasher.update(&[1u8]);
                hasher.update(&t.deleted_at.as_u64().to_le_bytes());
            }
            _ => hasher.update(&[0u8]),
        }

        Digest(hasher.finalize())
    }
}

// ============================================================================
// Digest - Copy (4-byte hash)
// ============================================================================

/// Compact hash of a row's repairable content.
///
/// Equal digests mean "no repair needed between these responses"; they do
/// not promise byte equality of raw replica state (purgeable tombstones
/// are deliberately outside the digest).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(u32);

impl Digest {
    /// Returns the raw digest value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({:08x})", self.0)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
