//! The simulated cluster: clock, network, replicas, and a coordinator.
//!
//! `SimCluster` is the imperative shell around the pure coordinator
//! state machines. It owns the simulated clock, a seeded RNG for
//! message delays and chance rolls, one [`MemoryStore`] per replica,
//! and an in-flight message queue delivered in timestamp order. Client
//! operations run one at a time to completion, including any background
//! repair their read started, so every assertion made afterwards sees
//! the cluster at rest.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;

use meridian_coordinator::{
    plan_read, roll_chance, CoordinatorEvent, FixedOrderRanking, Message, MessagePayload,
    MessageSink, Mutation, Placement, ProtocolError, ReadCoordinator, ReadId, ReadPayload,
    ReadRepairMetrics, ReadResponse, ReadResult, ReadTrace, ReplicaSelector, ReplicaSet,
    ReplicaStore, RequestKind, StaticPlacement, TableParams, Timeouts, Transport, WriteCoordinator,
    WriteEvent, WriteId,
};
use meridian_types::{
    Cell, ColumnName, ColumnSet, ConsistencyLevel, DatacenterId, Key, ReplicaId, TableName,
    Timestamp,
};

use crate::clock::SimClock;
use crate::fault::FaultInjector;
use crate::rng::SimRng;
use crate::store::MemoryStore;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a simulated cluster.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Seed for delays and chance rolls.
    pub seed: u64,

    /// Number of replicas.
    pub replicas: usize,

    /// Coordinator request deadlines.
    pub timeouts: Timeouts,

    /// Minimum one-way message delay in nanoseconds.
    pub min_delay_ns: u64,

    /// Maximum one-way message delay in nanoseconds (exclusive).
    pub max_delay_ns: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            replicas: 3,
            timeouts: Timeouts::simulation(),
            min_delay_ns: 100_000,   // 0.1ms
            max_delay_ns: 2_000_000, // 2ms
        }
    }
}

impl ClusterConfig {
    /// Sets the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the replica count.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(Debug)]
struct InFlight {
    deliver_at_ns: u64,
    id: u64,
    message: Message,
}

/// A deterministic simulated cluster.
#[derive(Debug)]
pub struct SimCluster {
    clock: SimClock,
    rng: SimRng,
    stores: Vec<MemoryStore>,
    faults: FaultInjector,
    placement: StaticPlacement,
    selector: ReplicaSelector<FixedOrderRanking>,
    timeouts: Timeouts,
    metrics: Arc<ReadRepairMetrics>,
    datacenter: DatacenterId,
    coordinator_id: ReplicaId,
    outbound: MessageSink,
    in_flight: Vec<InFlight>,
    next_message_id: u64,
    next_read_id: u64,
    next_write_id: u64,
    min_delay_ns: u64,
    max_delay_ns: u64,
    last_read_trace: Option<ReadTrace>,
}

impl SimCluster {
    /// Builds a cluster with every replica in one datacenter.
    pub fn new(config: ClusterConfig) -> Self {
        assert!(config.replicas > 0, "cluster needs at least one replica");
        let datacenter = DatacenterId::from("dc1");
        let ids = (0..config.replicas).map(|i| ReplicaId::new(i as u8));
        let placement =
            StaticPlacement::uniform(ReplicaSet::single_dc(ids, datacenter.clone()));
        Self {
            clock: SimClock::new(),
            rng: SimRng::new(config.seed),
            stores: (0..config.replicas).map(|_| MemoryStore::new()).collect(),
            faults: FaultInjector::new(),
            placement,
            selector: ReplicaSelector::new(FixedOrderRanking),
            timeouts: config.timeouts,
            metrics: Arc::new(ReadRepairMetrics::new()),
            datacenter,
            coordinator_id: ReplicaId::new(0),
            outbound: MessageSink::new(ReplicaId::new(0)),
            in_flight: Vec::new(),
            next_message_id: 0,
            next_read_id: 0,
            next_write_id: 0,
            min_delay_ns: config.min_delay_ns,
            max_delay_ns: config.max_delay_ns,
            last_read_trace: None,
        }
    }

    /// Replaces the replica set served for every key, e.g. to model a
    /// replication-factor change between operations.
    pub fn set_replication(&mut self, ids: impl IntoIterator<Item = u8>) {
        let set = ReplicaSet::single_dc(
            ids.into_iter().map(ReplicaId::new),
            self.datacenter.clone(),
        );
        self.placement.set_default(set);
    }

    /// Returns a replica's store.
    pub fn store(&self, replica: ReplicaId) -> &MemoryStore {
        &self.stores[replica.as_usize()]
    }

    /// Returns a replica's store mutably, for seeding state out of band.
    pub fn store_mut(&mut self, replica: ReplicaId) -> &mut MemoryStore {
        &mut self.stores[replica.as_usize()]
    }

    /// Returns the fault injector.
    pub fn faults_mut(&mut self) -> &mut FaultInjector {
        &mut self.faults
    }

    /// Returns the coordinator metrics.
    pub fn metrics(&self) -> &ReadRepairMetrics {
        &self.metrics
    }

    /// Returns the simulated clock.
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Advances simulated time with the cluster idle.
    pub fn advance(&mut self, delta_ns: u64) {
        self.clock.advance_by(delta_ns);
    }

    /// Returns the protocol trace of the most recent read.
    pub fn last_read_trace(&self) -> Option<&ReadTrace> {
        self.last_read_trace.as_ref()
    }

    // ------------------------------------------------------------------
    // Client operations
    // ------------------------------------------------------------------

    /// Writes one cell through the coordinator.
    pub fn write_cell(
        &mut self,
        table: &TableName,
        key: &Key,
        column: &str,
        value: &str,
        timestamp: u64,
        consistency: ConsistencyLevel,
    ) -> Result<(), ProtocolError> {
        let mut mutation = Mutation::new();
        mutation.set(
            ColumnName::from(column),
            Cell::new(value.as_bytes().to_vec(), Timestamp::new(timestamp)),
        );
        self.write(table, key, mutation, consistency)
    }

    /// Writes a mutation through the coordinator.
    pub fn write(
        &mut self,
        table: &TableName,
        key: &Key,
        mutation: Mutation,
        consistency: ConsistencyLevel,
    ) -> Result<(), ProtocolError> {
        let replicas = self.placement.replicas_for(key);
        let targets: Vec<ReplicaId> = replicas.ids().collect();
        let required = consistency
            .required_acks(replicas.replication_factor(), replicas.local_count(&self.datacenter));

        self.next_write_id += 1;
        let (mut coordinator, output) = WriteCoordinator::start(
            self.coordinator_id,
            WriteId::new(self.next_write_id),
            table.clone(),
            key.clone(),
            mutation,
            &targets,
            required,
            self.timeouts,
            self.clock.now(),
        );
        self.dispatch(output.messages);
        let mut outcome = output.outcome;

        while !coordinator.is_settled() {
            match self.next_step(coordinator.next_wake_ns()) {
                Step::Tick => {
                    let out = coordinator.on_event(self.clock.now(), WriteEvent::Tick);
                    self.dispatch(out.messages);
                    outcome = outcome.or(out.outcome);
                }
                Step::Deliver(from, MessagePayload::WriteAck { write_id })
                    if write_id == WriteId::new(self.next_write_id) =>
                {
                    let out = coordinator.on_event(self.clock.now(), WriteEvent::Ack { from });
                    self.dispatch(out.messages);
                    outcome = outcome.or(out.outcome);
                }
                Step::Deliver(..) | Step::Consumed => {}
                Step::Idle => break,
            }
        }
        self.in_flight.clear();
        outcome.expect("write must settle with an outcome")
    }

    /// Runs one coordinated read to completion, including any background
    /// repair it starts.
    pub fn read(
        &mut self,
        table: &TableName,
        key: &Key,
        columns: ColumnSet,
        consistency: ConsistencyLevel,
        params: TableParams,
    ) -> Result<ReadResult, ProtocolError> {
        let replicas = self.placement.replicas_for(key);
        let live: BTreeSet<ReplicaId> = replicas
            .ids()
            .filter(|id| !self.faults.is_crashed(*id))
            .collect();
        let local: BTreeSet<ReplicaId> = replicas
            .iter()
            .filter(|d| d.datacenter == self.datacenter)
            .map(|d| d.id)
            .collect();
        let ranked = self
            .selector
            .select(key, &replicas, &live, consistency, &self.datacenter)?;
        let required = consistency
            .required_acks(replicas.replication_factor(), replicas.local_count(&self.datacenter));
        let chance = roll_chance(&params, self.rng.next_f64(), self.rng.next_f64());
        let plan = plan_read(&ranked, required, consistency, chance, &local);

        self.next_read_id += 1;
        let read_id = ReadId::new(self.next_read_id);
        let (mut coordinator, output) = ReadCoordinator::start(
            self.coordinator_id,
            read_id,
            table.clone(),
            key.clone(),
            columns,
            plan,
            params,
            self.timeouts,
            Arc::clone(&self.metrics),
            self.clock.now(),
        );
        self.dispatch(output.messages);
        let mut outcome = output.outcome;

        while !coordinator.is_settled() {
            let event = match self.next_step(coordinator.next_wake_ns()) {
                Step::Tick => CoordinatorEvent::Tick,
                Step::Deliver(from, MessagePayload::ReadResponse(response))
                    if response.read_id == read_id =>
                {
                    CoordinatorEvent::Response {
                        from,
                        payload: response.payload,
                    }
                }
                Step::Deliver(from, MessagePayload::RepairAck { read_id: acked })
                    if acked == read_id =>
                {
                    CoordinatorEvent::RepairAck { from }
                }
                Step::Deliver(..) | Step::Consumed => continue,
                Step::Idle => break,
            };
            let out = coordinator.on_event(self.clock.now(), event);
            self.dispatch(out.messages);
            outcome = outcome.or(out.outcome);
        }
        self.in_flight.clear();
        self.last_read_trace = Some(coordinator.trace().clone());
        outcome.expect("read must settle with an outcome")
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Hands messages to the transport sink, then drains the sink into
    /// the in-flight queue with a random delivery delay each.
    fn dispatch(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.outbound.send(message);
        }
        for message in self.outbound.drain() {
            let delay = self.rng.delay_ns(self.min_delay_ns, self.max_delay_ns);
            self.next_message_id += 1;
            self.in_flight.push(InFlight {
                deliver_at_ns: self.clock.now().saturating_add(delay),
                id: self.next_message_id,
                message,
            });
        }
    }

    /// Advances to the next delivery or wake-up, whichever is earlier.
    ///
    /// Request payloads are consumed here by the destination replica;
    /// only coordinator-bound payloads surface to the caller.
    fn next_step(&mut self, wake_ns: Option<u64>) -> Step {
        let next_delivery = self
            .in_flight
            .iter()
            .enumerate()
            .min_by_key(|(_, m)| (m.deliver_at_ns, m.id))
            .map(|(index, m)| (index, m.deliver_at_ns));

        match (next_delivery, wake_ns) {
            (None, None) => Step::Idle,
            (None, Some(wake)) => {
                self.clock.advance_to(wake);
                Step::Tick
            }
            (Some((_, at)), Some(wake)) if wake < at => {
                self.clock.advance_to(wake);
                Step::Tick
            }
            (Some((index, at)), _) => {
                self.clock.advance_to(at);
                let InFlight { message, .. } = self.in_flight.swap_remove(index);
                self.deliver(message)
            }
        }
    }

    fn deliver(&mut self, message: Message) -> Step {
        let to = message.to;
        if self.faults.drops(to, &message.payload) {
            trace!(replica = %to, "message dropped by fault injection");
            return Step::Consumed;
        }
        match message.payload {
            MessagePayload::ReadRequest(request) => {
                let now_micros = self.clock.now() / 1_000;
                let store = &mut self.stores[to.as_usize()];
                store.set_now_micros(now_micros);
                let row = store.read(&request.table, &request.key, &request.columns);
                let payload = match request.kind {
                    RequestKind::Data => ReadPayload::Data(row),
                    RequestKind::Digest => ReadPayload::Digest(row.digest(&request.columns)),
                };
                self.reply(
                    to,
                    message.from,
                    MessagePayload::ReadResponse(ReadResponse {
                        read_id: request.read_id,
                        payload,
                    }),
                );
                Step::Consumed
            }
            MessagePayload::RepairWrite(repair) => {
                let store = &mut self.stores[to.as_usize()];
                store.apply(&repair.table, &repair.key, &repair.mutation);
                self.reply(
                    to,
                    message.from,
                    MessagePayload::RepairAck {
                        read_id: repair.read_id,
                    },
                );
                Step::Consumed
            }
            MessagePayload::Write(write) => {
                let store = &mut self.stores[to.as_usize()];
                store.apply(&write.table, &write.key, &write.mutation);
                self.reply(
                    to,
                    message.from,
                    MessagePayload::WriteAck {
                        write_id: write.write_id,
                    },
                );
                Step::Consumed
            }
            payload => Step::Deliver(message.from, payload),
        }
    }

    fn reply(&mut self, from: ReplicaId, to: ReplicaId, payload: MessagePayload) {
        self.dispatch(vec![Message::targeted(from, to, payload)]);
    }
}

#[derive(Debug)]
enum Step {
    /// The coordinator's next wake-up fired.
    Tick,

    /// A coordinator-bound payload arrived.
    Deliver(ReplicaId, MessagePayload),

    /// A replica consumed a request; nothing for the coordinator yet.
    Consumed,

    /// Nothing in flight and nothing scheduled.
    Idle,
}
