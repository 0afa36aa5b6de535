//! Protocol messages exchanged between a coordinator and replicas.
//!
//! Messages are targeted (no broadcast): every request names the replica
//! it is for, and every response carries the [`ReadId`] or [`WriteId`] of
//! the operation it answers, so late responses from abandoned requests
//! can be discarded.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use meridian_types::{
    Cell, ColumnName, ColumnSet, Digest, Key, ReplicaId, Row, TableName, Tombstone,
};

// ============================================================================
// Operation Identifiers - Copy (8-byte values)
// ============================================================================

/// Identifier of one coordinated read, unique per coordinator process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReadId(u64);

impl ReadId {
    /// Creates a read ID from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for ReadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "read#{}", self.0)
    }
}

/// Identifier of one coordinated direct write.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct WriteId(u64);

impl WriteId {
    /// Creates a write ID from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for WriteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "write#{}", self.0)
    }
}

// ============================================================================
// Read Requests and Responses
// ============================================================================

/// Whether a read request asks for full data or only a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Full row data for the requested columns.
    Data,

    /// Only the divergence digest of that data.
    Digest,
}

/// A read request sent to one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    /// The read this request belongs to.
    pub read_id: ReadId,
    /// Table being read.
    pub table: TableName,
    /// Row key.
    pub key: Key,
    /// Columns the read selects.
    pub columns: ColumnSet,
    /// Data or digest.
    pub kind: RequestKind,
}

/// One replica's answer to a [`ReadRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadPayload {
    /// Full row data (possibly an empty row).
    Data(Row),

    /// Digest of the repairable row content.
    Digest(Digest),
}

/// A read response from one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// The read this response answers.
    pub read_id: ReadId,
    /// The answer.
    pub payload: ReadPayload,
}

// ============================================================================
// Mutations
// ============================================================================

/// A column-subset write applied to one key.
///
/// Repair mutations carry only the columns the originating read fetched;
/// a replica applying one merges cell-by-cell and never loses newer local
/// data (cell timestamps still win).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mutation {
    /// Cells to merge, by column.
    pub cells: BTreeMap<ColumnName, Cell>,

    /// Row deletion to merge, if any.
    pub tombstone: Option<Tombstone>,
}

impl Mutation {
    /// Creates an empty mutation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cell to the mutation.
    pub fn set(&mut self, column: ColumnName, cell: Cell) {
        self.cells.insert(column, cell);
    }

    /// Sets the row deletion.
    pub fn delete(&mut self, tombstone: Tombstone) {
        self.tombstone = Some(tombstone);
    }

    /// Returns true if the mutation carries nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.tombstone.is_none()
    }

    /// Returns the number of cells carried.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

/// A repair mutation pushed to one stale replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairWrite {
    /// The read that produced this repair.
    pub read_id: ReadId,
    /// Table being repaired.
    pub table: TableName,
    /// Row key.
    pub key: Key,
    /// The winning content for the read's column set.
    pub mutation: Mutation,
}

/// A direct client write fanned out to one replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// The write this request belongs to.
    pub write_id: WriteId,
    /// Table being written.
    pub table: TableName,
    /// Row key.
    pub key: Key,
    /// Content to merge.
    pub mutation: Mutation,
}

// ============================================================================
// Message Envelope
// ============================================================================

/// Payload of a protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Coordinator asks a replica for data or a digest.
    ReadRequest(ReadRequest),

    /// Replica answers a read request.
    ReadResponse(ReadResponse),

    /// Coordinator pushes a repair mutation.
    RepairWrite(RepairWrite),

    /// Replica acknowledges a repair mutation.
    RepairAck {
        /// The read whose repair is acknowledged.
        read_id: ReadId,
    },

    /// Coordinator fans out a direct write.
    Write(WriteRequest),

    /// Replica acknowledges a direct write.
    WriteAck {
        /// The write being acknowledged.
        write_id: WriteId,
    },
}

/// A targeted protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sending replica.
    pub from: ReplicaId,
    /// Receiving replica.
    pub to: ReplicaId,
    /// The payload.
    pub payload: MessagePayload,
}

impl Message {
    /// Creates a targeted message.
    pub fn targeted(from: ReplicaId, to: ReplicaId, payload: MessagePayload) -> Self {
        Self { from, to, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::Timestamp;

    #[test]
    fn read_id_display() {
        assert_eq!(ReadId::new(7).to_string(), "read#7");
        assert_eq!(WriteId::new(3).to_string(), "write#3");
    }

    #[test]
    fn empty_mutation() {
        let mut m = Mutation::new();
        assert!(m.is_empty());

        m.set("a".into(), Cell::new(vec![1], Timestamp::new(1)));
        assert!(!m.is_empty());
        assert_eq!(m.cell_count(), 1);
    }

    #[test]
    fn tombstone_only_mutation_is_not_empty() {
        let mut m = Mutation::new();
        m.delete(Tombstone::new(Timestamp::new(5)));
        assert!(!m.is_empty());
        assert_eq!(m.cell_count(), 0);
    }

    #[test]
    fn targeted_message_routes() {
        let msg = Message::targeted(
            ReplicaId::new(0),
            ReplicaId::new(2),
            MessagePayload::RepairAck {
                read_id: ReadId::new(1),
            },
        );
        assert_eq!(msg.from, ReplicaId::new(0));
        assert_eq!(msg.to, ReplicaId::new(2));
    }
}
