//! Replica selection: ordering candidates for a read.
//!
//! Ranking is a pluggable strategy. Production wants an adaptive,
//! latency-aware order; deterministic tests want placement order so the
//! victim and spectator replicas of a fault scenario are reproducible.
//! Both satisfy [`ReplicaRanking`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Mutex;

use meridian_types::{ConsistencyLevel, DatacenterId, Key, ReplicaId};

use crate::error::ProtocolError;
use crate::placement::ReplicaSet;

// ============================================================================
// Ranking Strategy
// ============================================================================

/// Orders the replicas of a set for contacting.
pub trait ReplicaRanking: Debug + Send + Sync {
    /// Returns the replica IDs of `replicas` in preference order.
    ///
    /// Must return a permutation of the set's IDs.
    fn rank(&self, key: &Key, replicas: &ReplicaSet) -> Vec<ReplicaId>;
}

/// Placement-order ranking: replicas are contacted in the fixed order the
/// replica set lists them.
#[derive(Debug, Clone, Default)]
pub struct FixedOrderRanking;

impl ReplicaRanking for FixedOrderRanking {
    fn rank(&self, _key: &Key, replicas: &ReplicaSet) -> Vec<ReplicaId> {
        replicas.ids().collect()
    }
}

/// Latency-aware ranking: replicas with the lowest observed latency come
/// first, unknown replicas last in placement order.
///
/// Latencies are recorded as an exponential moving average so a recovered
/// replica climbs back up without a restart.
#[derive(Debug, Default)]
pub struct LatencyRanking {
    latencies_ns: Mutex<BTreeMap<ReplicaId, u64>>,
}

impl LatencyRanking {
    /// Creates a ranking with no recorded observations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observed response latency for a replica.
    pub fn record(&self, replica: ReplicaId, latency_ns: u64) {
        let mut latencies = self.latencies_ns.lock().expect("lock poisoned");
        let entry = latencies.entry(replica).or_insert(latency_ns);
        // EMA with alpha = 1/4
        *entry = (*entry * 3 + latency_ns) / 4;
    }
}

impl ReplicaRanking for LatencyRanking {
    fn rank(&self, _key: &Key, replicas: &ReplicaSet) -> Vec<ReplicaId> {
        let latencies = self.latencies_ns.lock().expect("lock poisoned");
        let mut ids: Vec<(usize, ReplicaId)> = replicas.ids().enumerate().collect();
        ids.sort_by_key(|(position, id)| match latencies.get(id) {
            Some(&ns) => (0u8, ns, *position),
            None => (1u8, 0, *position),
        });
        ids.into_iter().map(|(_, id)| id).collect()
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Orders candidate replicas for a read and enforces liveness against the
/// consistency level.
#[derive(Debug)]
pub struct ReplicaSelector<R: ReplicaRanking> {
    ranking: R,
}

impl<R: ReplicaRanking> ReplicaSelector<R> {
    /// Creates a selector with the given ranking strategy.
    pub fn new(ranking: R) -> Self {
        Self { ranking }
    }

    /// Returns the ranking strategy.
    pub fn ranking(&self) -> &R {
        &self.ranking
    }

    /// Returns the live replicas of `replicas` in preference order.
    ///
    /// `datacenter` is the coordinator's own datacenter. Fails with
    /// [`ProtocolError::NoReplicasAvailable`] when fewer live replicas
    /// exist than `consistency` requires; a datacenter-local level is
    /// checked against local liveness only, since remote replicas cannot
    /// satisfy it.
    pub fn select(
        &self,
        key: &Key,
        replicas: &ReplicaSet,
        live: &BTreeSet<ReplicaId>,
        consistency: ConsistencyLevel,
        datacenter: &DatacenterId,
    ) -> Result<Vec<ReplicaId>, ProtocolError> {
        let ranked: Vec<ReplicaId> = self
            .ranking
            .rank(key, replicas)
            .into_iter()
            .filter(|id| live.contains(id))
            .collect();

        let required = consistency
            .required_acks(replicas.replication_factor(), replicas.local_count(datacenter));
        let alive = if consistency.is_datacenter_local() {
            ranked
                .iter()
                .filter(|id| {
                    replicas
                        .descriptor(**id)
                        .is_some_and(|d| &d.datacenter == datacenter)
                })
                .count()
        } else {
            ranked.len()
        };
        if alive < required {
            return Err(ProtocolError::NoReplicasAvailable { alive, required });
        }
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(ids: &[u8]) -> ReplicaSet {
        ReplicaSet::single_dc(ids.iter().map(|&i| ReplicaId::new(i)), "dc1")
    }

    fn all_live(ids: &[u8]) -> BTreeSet<ReplicaId> {
        ids.iter().map(|&i| ReplicaId::new(i)).collect()
    }

    #[test]
    fn fixed_order_preserves_placement() {
        let selector = ReplicaSelector::new(FixedOrderRanking);
        let picked = selector
            .select(
                &Key::from_u64(1),
                &set_of(&[2, 0, 1]),
                &all_live(&[0, 1, 2]),
                ConsistencyLevel::Quorum,
                &"dc1".into(),
            )
            .unwrap();
        assert_eq!(
            picked,
            vec![ReplicaId::new(2), ReplicaId::new(0), ReplicaId::new(1)]
        );
    }

    #[test]
    fn dead_replicas_are_skipped() {
        let selector = ReplicaSelector::new(FixedOrderRanking);
        let picked = selector
            .select(
                &Key::from_u64(1),
                &set_of(&[0, 1, 2]),
                &all_live(&[0, 2]),
                ConsistencyLevel::Quorum,
                &"dc1".into(),
            )
            .unwrap();
        assert_eq!(picked, vec![ReplicaId::new(0), ReplicaId::new(2)]);
    }

    #[test]
    fn insufficient_live_replicas_fail() {
        let selector = ReplicaSelector::new(FixedOrderRanking);
        let err = selector
            .select(
                &Key::from_u64(1),
                &set_of(&[0, 1, 2]),
                &all_live(&[0]),
                ConsistencyLevel::Quorum,
                &"dc1".into(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::NoReplicasAvailable {
                alive: 1,
                required: 2
            }
        );
    }

    #[test]
    fn local_quorum_requires_local_liveness() {
        use crate::placement::ReplicaDescriptor;

        let set = ReplicaSet::new(vec![
            ReplicaDescriptor::new(ReplicaId::new(0), "dc1"),
            ReplicaDescriptor::new(ReplicaId::new(1), "dc1"),
            ReplicaDescriptor::new(ReplicaId::new(2), "dc2"),
            ReplicaDescriptor::new(ReplicaId::new(3), "dc2"),
        ]);
        let selector = ReplicaSelector::new(FixedOrderRanking);

        // Only one dc1 replica is alive; remote liveness cannot stand in.
        let err = selector
            .select(
                &Key::from_u64(1),
                &set,
                &all_live(&[0, 2, 3]),
                ConsistencyLevel::LocalQuorum,
                &"dc1".into(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::NoReplicasAvailable {
                alive: 1,
                required: 2
            }
        );

        // Both local replicas alive: the remote outage is irrelevant.
        let picked = selector
            .select(
                &Key::from_u64(1),
                &set,
                &all_live(&[0, 1]),
                ConsistencyLevel::LocalQuorum,
                &"dc1".into(),
            )
            .unwrap();
        assert_eq!(picked, vec![ReplicaId::new(0), ReplicaId::new(1)]);
    }

    #[test]
    fn latency_ranking_prefers_fast_replicas() {
        let ranking = LatencyRanking::new();
        ranking.record(ReplicaId::new(2), 1_000_000);
        ranking.record(ReplicaId::new(0), 5_000_000);

        let order = ranking.rank(&Key::from_u64(1), &set_of(&[0, 1, 2]));
        // Observed replicas by latency, then unobserved in placement order.
        assert_eq!(
            order,
            vec![ReplicaId::new(2), ReplicaId::new(0), ReplicaId::new(1)]
        );
    }

    #[test]
    fn latency_ranking_moves_with_observations() {
        let ranking = LatencyRanking::new();
        ranking.record(ReplicaId::new(0), 1_000);
        ranking.record(ReplicaId::new(1), 8_000);
        // Replica 0 degrades.
        for _ in 0..16 {
            ranking.record(ReplicaId::new(0), 100_000);
        }
        let order = ranking.rank(&Key::from_u64(1), &set_of(&[0, 1]));
        assert_eq!(order[0], ReplicaId::new(1));
    }
}
