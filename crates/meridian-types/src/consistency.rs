//! Consistency levels and quorum arithmetic.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Consistency Level
// ============================================================================

/// Minimum distribution of replica acknowledgments required for an
/// operation to succeed.
///
/// The level is fixed when the operation starts and also governs the
/// success criterion of any blocking read repair the operation triggers:
/// repair succeeds once a quorum *by this level* of the originally
/// contacted replicas is established, not once every stale replica acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// A single acknowledgment.
    One,

    /// `⌊RF/2⌋ + 1` acknowledgments across the full replica set.
    Quorum,

    /// A quorum among the replicas in the coordinator's datacenter only.
    LocalQuorum,

    /// Every replica must acknowledge.
    All,
}

impl ConsistencyLevel {
    /// Returns the number of acknowledgments required.
    ///
    /// `replica_count` is the replication factor; `local_count` is the
    /// number of those replicas in the coordinator's datacenter (only
    /// consulted for [`ConsistencyLevel::LocalQuorum`]).
    pub fn required_acks(&self, replica_count: usize, local_count: usize) -> usize {
        match self {
            ConsistencyLevel::One => 1,
            ConsistencyLevel::Quorum => quorum_size(replica_count),
            ConsistencyLevel::LocalQuorum => quorum_size(local_count),
            ConsistencyLevel::All => replica_count,
        }
    }

    /// Returns true if the level requires contacting every replica.
    pub fn requires_all(&self) -> bool {
        matches!(self, ConsistencyLevel::All)
    }

    /// Returns true if the level is scoped to the local datacenter.
    pub fn is_datacenter_local(&self) -> bool {
        matches!(self, ConsistencyLevel::LocalQuorum)
    }
}

impl Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsistencyLevel::One => write!(f, "ONE"),
            ConsistencyLevel::Quorum => write!(f, "QUORUM"),
            ConsistencyLevel::LocalQuorum => write!(f, "LOCAL_QUORUM"),
            ConsistencyLevel::All => write!(f, "ALL"),
        }
    }
}

// ============================================================================
// Quorum helpers
// ============================================================================

/// Calculates the majority threshold for a replica set: `⌊n/2⌋ + 1`.
///
/// # Panics
///
/// Debug builds panic if `replica_count` is 0.
pub fn quorum_size(replica_count: usize) -> usize {
    debug_assert!(replica_count > 0, "replica count must be positive");
    (replica_count / 2) + 1
}
