//! Identity types: replicas, datacenters, keys and tables.

use std::fmt::{Debug, Display};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Replica Identifier - Copy (single byte)
// ============================================================================

/// Maximum number of replicas that may hold a single key.
///
/// Replication factors in practice are tiny (1-5); a byte leaves ample
/// headroom while keeping [`ReplicaId`] `Copy` and cheap to log.
pub const MAX_REPLICAS: usize = 255;

/// Unique identifier for a replica node.
///
/// Assigned at cluster formation and never reused. Uses `u8` internally
/// since clusters are small.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(u8);

impl ReplicaId {
    /// Creates a new replica ID.
    ///
    /// # Panics
    ///
    /// Debug builds panic if `id` exceeds `MAX_REPLICAS`.
    pub fn new(id: u8) -> Self {
        debug_assert!(
            (id as usize) < MAX_REPLICAS,
            "replica ID exceeds MAX_REPLICAS"
        );
        Self(id)
    }

    /// Returns the replica ID as a `u8`.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Returns the replica ID as a `usize` for indexing.
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}

impl From<u8> for ReplicaId {
    fn from(id: u8) -> Self {
        Self::new(id)
    }
}

impl From<ReplicaId> for u8 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

// ============================================================================
// Datacenter Identifier
// ============================================================================

/// Identifier for the datacenter a replica lives in.
///
/// Used by `LOCAL_QUORUM` accounting and the dc-local read-repair chance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatacenterId(String);

impl DatacenterId {
    /// Creates a datacenter ID from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the datacenter name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DatacenterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DatacenterId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ============================================================================
// Row Key
// ============================================================================

/// Opaque routable identifier for a row.
///
/// The coordinator never interprets key bytes; placement hashes them and
/// everything else treats them as an ordered, hashable token.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Bytes);

impl Key {
    /// Creates a key from raw bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Creates a key from an integer (big-endian encoding).
    ///
    /// Convenience for tests and numeric primary keys.
    pub fn from_u64(k: u64) -> Self {
        Self(Bytes::copy_from_slice(&k.to_be_bytes()))
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key(")?;
        for b in self.0.iter().take(8) {
            write!(f, "{b:02x}")?;
        }
        if self.0.len() > 8 {
            write!(f, "..")?;
        }
        write!(f, ")")
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<u64> for Key {
    fn from(k: u64) -> Self {
        Self::from_u64(k)
    }
}

// ============================================================================
// Table Name
// ============================================================================

/// Fully qualified table name (`keyspace.table`).
///
/// Keys per-table configuration and the per-table speculative-retry metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    /// Creates a table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the table name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_id_display() {
        let id = ReplicaId::new(3);
        assert_eq!(format!("{id}"), "R3");
    }

    #[test]
    fn replica_id_roundtrip() {
        let id = ReplicaId::from(7u8);
        assert_eq!(u8::from(id), 7);
        assert_eq!(id.as_usize(), 7);
    }

    #[test]
    fn key_from_u64_is_ordered() {
        assert!(Key::from_u64(1) < Key::from_u64(2));
        assert!(Key::from_u64(255) < Key::from_u64(256));
    }

    #[test]
    fn key_debug_truncates() {
        let long = Key::new(vec![0xab; 16]);
        let shown = format!("{long:?}");
        assert!(shown.ends_with("..)"), "got {shown}");
    }

    #[test]
    fn table_name_display() {
        let t = TableName::from("ks.tbl");
        assert_eq!(t.to_string(), "ks.tbl");
    }
}
