//! Storage abstraction for the replica side of the protocol.
//!
//! The coordinator never reads local data itself; it talks to replicas
//! through messages, and each replica answers from something implementing
//! [`ReplicaStore`]. Engine internals (memtables, sstables, compaction
//! scheduling) are out of scope here.

use std::fmt::Debug;

use meridian_types::{ColumnSet, Key, Row, TableName};

use crate::message::Mutation;

/// Local row storage behind one replica.
pub trait ReplicaStore: Debug + Send {
    /// Reads a key, projected to the given columns.
    ///
    /// A key the store has never seen yields an empty [`Row`]; the replica
    /// still answers, and an empty row participates in reconciliation like
    /// any other. The returned row's tombstone, if any, must carry the
    /// store's current purge eligibility.
    fn read(&self, table: &TableName, key: &Key, columns: &ColumnSet) -> Row;

    /// Merges a mutation into a key.
    ///
    /// Cells merge by timestamp (the store's newer cell survives a stale
    /// incoming one); a tombstone merges against any existing deletion the
    /// same way.
    fn apply(&mut self, table: &TableName, key: &Key, mutation: &Mutation);
}
