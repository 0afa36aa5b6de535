//! Fault injection for simulated replicas.
//!
//! Faults are modeled as selective deafness: a faulty replica silently
//! ignores a class of incoming requests, exactly the failure mode a
//! coordinator observes from a wedged or overloaded peer. The flags map
//! one-to-one onto the request classes of the protocol, so a scenario
//! can wedge a replica's data reads while its digest reads keep working,
//! or swallow repair mutations while direct writes land.

use std::collections::BTreeMap;

use meridian_coordinator::{MessagePayload, RequestKind};
use meridian_types::ReplicaId;

/// Request classes a faulty replica silently drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaFaults {
    /// Drop direct write requests.
    pub stop_writes: bool,

    /// Drop full-data read requests.
    pub stop_data_reads: bool,

    /// Drop digest read requests.
    pub stop_digest_reads: bool,

    /// Drop repair mutations.
    pub stop_repair_writes: bool,

    /// Drop everything; the replica is down.
    pub crashed: bool,
}

/// Per-replica fault configuration for a simulated cluster.
#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: BTreeMap<ReplicaId, ReplicaFaults>,
}

impl FaultInjector {
    /// Creates an injector with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fault flags for a replica.
    pub fn faults(&self, replica: ReplicaId) -> ReplicaFaults {
        self.faults.get(&replica).copied().unwrap_or_default()
    }

    /// Returns mutable fault flags for a replica.
    pub fn faults_mut(&mut self, replica: ReplicaId) -> &mut ReplicaFaults {
        self.faults.entry(replica).or_default()
    }

    /// Clears every fault on a replica.
    pub fn heal(&mut self, replica: ReplicaId) {
        self.faults.remove(&replica);
    }

    /// Returns true if the replica is crashed.
    pub fn is_crashed(&self, replica: ReplicaId) -> bool {
        self.faults(replica).crashed
    }

    /// Decides whether a delivered payload is dropped at the replica.
    pub fn drops(&self, replica: ReplicaId, payload: &MessagePayload) -> bool {
        let faults = self.faults(replica);
        if faults.crashed {
            return true;
        }
        match payload {
            MessagePayload::ReadRequest(request) => match request.kind {
                RequestKind::Data => faults.stop_data_reads,
                RequestKind::Digest => faults.stop_digest_reads,
            },
            MessagePayload::RepairWrite(_) => faults.stop_repair_writes,
            MessagePayload::Write(_) => faults.stop_writes,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_coordinator::{ReadId, ReadRequest};
    use meridian_types::{ColumnSet, Key, TableName};

    fn read_request(kind: RequestKind) -> MessagePayload {
        MessagePayload::ReadRequest(ReadRequest {
            read_id: ReadId::new(1),
            table: TableName::new("users"),
            key: Key::from_u64(1),
            columns: ColumnSet::All,
            kind,
        })
    }

    #[test]
    fn data_reads_drop_independently_of_digests() {
        let mut injector = FaultInjector::new();
        injector.faults_mut(ReplicaId::new(1)).stop_data_reads = true;

        assert!(injector.drops(ReplicaId::new(1), &read_request(RequestKind::Data)));
        assert!(!injector.drops(ReplicaId::new(1), &read_request(RequestKind::Digest)));
        assert!(!injector.drops(ReplicaId::new(2), &read_request(RequestKind::Data)));
    }

    #[test]
    fn crash_drops_everything() {
        let mut injector = FaultInjector::new();
        injector.faults_mut(ReplicaId::new(0)).crashed = true;
        assert!(injector.drops(ReplicaId::new(0), &read_request(RequestKind::Digest)));
        assert!(injector.is_crashed(ReplicaId::new(0)));
    }

    #[test]
    fn heal_restores_service() {
        let mut injector = FaultInjector::new();
        injector.faults_mut(ReplicaId::new(1)).stop_repair_writes = true;
        injector.heal(ReplicaId::new(1));
        assert_eq!(injector.faults(ReplicaId::new(1)), ReplicaFaults::default());
    }
}
