//! Replica placement: which replicas are responsible for a key.
//!
//! Placement is an external collaborator (ring/topology management is out
//! of scope); the coordinator consumes it through the narrow [`Placement`]
//! trait. The replica set for a key is fixed for the duration of one
//! operation: replication-factor changes take effect between operations,
//! never during one.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use meridian_types::{DatacenterId, Key, ReplicaId};

// ============================================================================
// Replica Descriptor and Set
// ============================================================================

/// One replica responsible for a key, with its datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    /// The replica.
    pub id: ReplicaId,
    /// Where it lives.
    pub datacenter: DatacenterId,
}

impl ReplicaDescriptor {
    /// Creates a descriptor.
    pub fn new(id: ReplicaId, datacenter: impl Into<DatacenterId>) -> Self {
        Self {
            id,
            datacenter: datacenter.into(),
        }
    }
}

/// Ordered replicas responsible for a key.
///
/// Cardinality equals the replication factor. Order is placement order
/// (ring order in the real system); the selector may re-rank it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
    replicas: Vec<ReplicaDescriptor>,
}

impl ReplicaSet {
    /// Creates a replica set.
    ///
    /// # Panics
    ///
    /// Debug builds panic on an empty set or duplicate replica IDs.
    pub fn new(replicas: Vec<ReplicaDescriptor>) -> Self {
        debug_assert!(!replicas.is_empty(), "replica set must not be empty");
        debug_assert!(
            {
                let mut ids: Vec<_> = replicas.iter().map(|r| r.id).collect();
                ids.sort();
                ids.windows(2).all(|w| w[0] != w[1])
            },
            "replica set contains duplicate IDs"
        );
        Self { replicas }
    }

    /// Builds a single-datacenter set from replica IDs.
    pub fn single_dc(ids: impl IntoIterator<Item = ReplicaId>, dc: impl Into<DatacenterId>) -> Self {
        let dc = dc.into();
        Self::new(
            ids.into_iter()
                .map(|id| ReplicaDescriptor::new(id, dc.clone()))
                .collect(),
        )
    }

    /// Returns the replication factor.
    pub fn replication_factor(&self) -> usize {
        self.replicas.len()
    }

    /// Returns the number of replicas in the given datacenter.
    pub fn local_count(&self, dc: &DatacenterId) -> usize {
        self.replicas.iter().filter(|r| &r.datacenter == dc).count()
    }

    /// Iterates over descriptors in placement order.
    pub fn iter(&self) -> impl Iterator<Item = &ReplicaDescriptor> {
        self.replicas.iter()
    }

    /// Iterates over replica IDs in placement order.
    pub fn ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.replicas.iter().map(|r| r.id)
    }

    /// Returns true if the replica is a member.
    pub fn contains(&self, id: ReplicaId) -> bool {
        self.replicas.iter().any(|r| r.id == id)
    }

    /// Returns the descriptor for a replica, if it is a member.
    pub fn descriptor(&self, id: ReplicaId) -> Option<&ReplicaDescriptor> {
        self.replicas.iter().find(|r| r.id == id)
    }
}

// ============================================================================
// Placement Trait
// ============================================================================

/// Maps keys to their replica sets, reflecting current topology.
pub trait Placement: Debug + Send + Sync {
    /// Returns the replicas responsible for `key`.
    fn replicas_for(&self, key: &Key) -> ReplicaSet;
}

/// A table-driven placement for embedding and tests.
///
/// Serves a default replica set, with optional per-key overrides. Has no
/// ring arithmetic: deterministic placement is exactly what fault
/// scenarios need to pick victim and spectator replicas.
#[derive(Debug, Clone)]
pub struct StaticPlacement {
    default: ReplicaSet,
    overrides: BTreeMap<Key, ReplicaSet>,
}

impl StaticPlacement {
    /// Creates a placement serving `default` for every key.
    pub fn uniform(default: ReplicaSet) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    /// Overrides the replica set for one key.
    pub fn set_key(&mut self, key: Key, replicas: ReplicaSet) {
        self.overrides.insert(key, replicas);
    }

    /// Replaces the default replica set (an RF change between operations).
    pub fn set_default(&mut self, replicas: ReplicaSet) {
        self.default = replicas;
    }
}

impl Placement for StaticPlacement {
    fn replicas_for(&self, key: &Key) -> ReplicaSet {
        self.overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(ids: &[u8]) -> ReplicaSet {
        ReplicaSet::single_dc(ids.iter().map(|&i| ReplicaId::new(i)), "dc1")
    }

    #[test]
    fn replication_factor_and_membership() {
        let set = set_of(&[0, 1, 2]);
        assert_eq!(set.replication_factor(), 3);
        assert!(set.contains(ReplicaId::new(1)));
        assert!(!set.contains(ReplicaId::new(9)));
    }

    #[test]
    fn local_count_by_datacenter() {
        let set = ReplicaSet::new(vec![
            ReplicaDescriptor::new(ReplicaId::new(0), "dc1"),
            ReplicaDescriptor::new(ReplicaId::new(1), "dc1"),
            ReplicaDescriptor::new(ReplicaId::new(2), "dc2"),
        ]);
        assert_eq!(set.local_count(&"dc1".into()), 2);
        assert_eq!(set.local_count(&"dc2".into()), 1);
        assert_eq!(set.local_count(&"dc3".into()), 0);
    }

    #[test]
    fn static_placement_override() {
        let mut placement = StaticPlacement::uniform(set_of(&[0]));
        placement.set_key(Key::from_u64(42), set_of(&[0, 1, 2]));

        assert_eq!(
            placement.replicas_for(&Key::from_u64(1)).replication_factor(),
            1
        );
        assert_eq!(
            placement.replicas_for(&Key::from_u64(42)).replication_factor(),
            3
        );
    }

    #[test]
    fn rf_change_between_operations() {
        let mut placement = StaticPlacement::uniform(set_of(&[0]));
        assert_eq!(
            placement.replicas_for(&Key::from_u64(1)).replication_factor(),
            1
        );

        placement.set_default(set_of(&[0, 1, 2]));
        assert_eq!(
            placement.replicas_for(&Key::from_u64(1)).replication_factor(),
            3
        );
    }
}
