//! The read coordinator state machine.
//!
//! One [`ReadCoordinator`] drives one quorum read end to end: the initial
//! data-plus-digest round, a full-data round when digests disagree, and
//! the repair write round that pushes winning content to stale replicas.
//!
//! The machine is pure. Time arrives as an explicit `now_ns` argument,
//! randomness as a pre-rolled [`ChanceOutcome`], and the network as
//! [`CoordinatorEvent`]s in and [`Message`]s out. The imperative shell
//! (simulation cluster or server runtime) owns sockets, clocks, and RNG.
//!
//! # Rounds
//!
//! 1. **Initial read**: full data from the best-ranked replica, digests
//!    from the rest. A silent replica past the table's speculative-retry
//!    threshold gets one extra request of the missing kind.
//! 2. **Data round**: entered on digest disagreement. Every contacted
//!    replica without a full-data response is asked for one; silence can
//!    speculate a single extra data request toward an untried replica.
//! 3. **Repair round**: the reconciled row is diffed against each data
//!    response and stale replicas receive targeted mutations. Success is
//!    counted against the read's original consistency level: replicas
//!    that already agree plus replicas that acknowledge a repair.
//!
//! Under a datacenter-local consistency level only replicas in the
//! coordinator's datacenter count toward the requirement, in every round;
//! remote replicas reached by chance still contribute data and receive
//! repairs.
//!
//! A blocking read withholds its result until the repair round settles;
//! a read whose divergence was only discovered through chance-triggered
//! extra contacts answers immediately and repairs in the background.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use meridian_types::{ColumnSet, ConsistencyLevel, Key, ReplicaId, Row, TableName};

use crate::config::{TableParams, Timeouts};
use crate::error::ProtocolError;
use crate::message::{
    Message, MessagePayload, Mutation, ReadId, ReadPayload, ReadRequest, RepairWrite, RequestKind,
};
use crate::metrics::ReadRepairMetrics;
use crate::reconcile::{plan_repairs, reconcile};
use crate::repair::RepairWriter;
use crate::response::ResponseSet;
use crate::trace::{ReadEvent, ReadTrace};

// ============================================================================
// Contact Planning
// ============================================================================

/// Pre-rolled decision of the table's read-repair chance knobs.
///
/// The shell rolls the dice (or a test fixes the outcome); the planner
/// stays deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanceOutcome {
    /// Contact only what the consistency level requires.
    None,

    /// Contact every live replica and reconcile in the background.
    AllReplicas,

    /// Contact every live replica in the coordinator's datacenter.
    DatacenterLocal,
}

/// Rolls the chance knobs from two uniform samples in `0.0..1.0`.
pub fn roll_chance(params: &TableParams, global_sample: f64, local_sample: f64) -> ChanceOutcome {
    if global_sample < params.read_repair_chance {
        ChanceOutcome::AllReplicas
    } else if local_sample < params.dclocal_read_repair_chance {
        ChanceOutcome::DatacenterLocal
    } else {
        ChanceOutcome::None
    }
}

/// The contact list of one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    /// Replicas contacted up front, preference order. The first receives
    /// the full-data request.
    pub contacts: Vec<ReplicaId>,

    /// Live replicas held back for speculation, preference order.
    pub spares: Vec<ReplicaId>,

    /// Responses required by the consistency level.
    pub required: usize,

    /// Replicas whose responses and repair acks satisfy `required`:
    /// every ranked replica, or only the local-datacenter ones under a
    /// datacenter-local consistency level.
    pub counted: BTreeSet<ReplicaId>,

    /// True when chance knobs added contacts beyond `required`.
    pub extra_contacts: bool,
}

/// Plans the contact list from the ranked live replicas.
///
/// `ranked` must already satisfy `required` (the selector enforces it).
/// `local` is the membership of the coordinator's datacenter: it bounds
/// the counted set under a datacenter-local `consistency`, and it widens
/// the contacts for [`ChanceOutcome::DatacenterLocal`].
pub fn plan_read(
    ranked: &[ReplicaId],
    required: usize,
    consistency: ConsistencyLevel,
    chance: ChanceOutcome,
    local: &BTreeSet<ReplicaId>,
) -> ReadPlan {
    let eligible: Vec<ReplicaId> = if consistency.is_datacenter_local() {
        ranked
            .iter()
            .copied()
            .filter(|id| local.contains(id))
            .collect()
    } else {
        ranked.to_vec()
    };
    debug_assert!(eligible.len() >= required, "selector must enforce liveness");

    let contacts: Vec<ReplicaId> = match chance {
        ChanceOutcome::None => eligible.iter().copied().take(required).collect(),
        ChanceOutcome::AllReplicas => {
            // Counted replicas come first so the full-data request lands
            // on one of them.
            let mut contacts = eligible.clone();
            contacts.extend(ranked.iter().copied().filter(|id| !eligible.contains(id)));
            contacts
        }
        ChanceOutcome::DatacenterLocal => {
            let mut contacts: Vec<ReplicaId> =
                eligible.iter().copied().take(required).collect();
            let extra: Vec<ReplicaId> = ranked
                .iter()
                .copied()
                .filter(|id| local.contains(id) && !contacts.contains(id))
                .collect();
            contacts.extend(extra);
            contacts
        }
    };
    let spares: Vec<ReplicaId> = eligible
        .iter()
        .copied()
        .filter(|id| !contacts.contains(id))
        .collect();
    let extra_contacts = contacts.len() > required;
    let counted: BTreeSet<ReplicaId> = eligible.into_iter().collect();

    ReadPlan {
        contacts,
        spares,
        required,
        counted,
        extra_contacts,
    }
}

// ============================================================================
// Events and Outputs
// ============================================================================

/// External stimulus for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// A replica answered a read request.
    Response {
        /// The answering replica.
        from: ReplicaId,
        /// Its answer.
        payload: ReadPayload,
    },

    /// A replica acknowledged a repair mutation.
    RepairAck {
        /// The acknowledging replica.
        from: ReplicaId,
    },

    /// Failure detection declared a replica down.
    Unreachable {
        /// The dead replica.
        replica: ReplicaId,
    },

    /// Time passed; deadlines and speculation thresholds may have fired.
    Tick,
}

/// How a divergent read was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// The client answer waited for the repair round.
    Blocking,

    /// The client was answered first; repair continued behind it.
    Background,
}

/// The answer returned to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    /// The reconciled row, projected to the requested columns.
    pub row: Row,

    /// Present when replicas diverged and repair mutations were sent.
    pub repair: Option<RepairMode>,
}

/// Effects produced by one event.
#[derive(Debug, Default)]
pub struct CoordinatorOutput {
    /// Messages to hand to the transport, in order.
    pub messages: Vec<Message>,

    /// The client answer, produced exactly once per read.
    pub outcome: Option<Result<ReadResult, ProtocolError>>,
}

impl CoordinatorOutput {
    fn none() -> Self {
        Self::default()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    InitialRead,
    DataRound,
    Repairing,
    Done,
}

/// Pure state machine for one coordinated read.
#[derive(Debug)]
pub struct ReadCoordinator {
    local_id: ReplicaId,
    read_id: ReadId,
    table: TableName,
    key: Key,
    columns: ColumnSet,
    required: usize,
    params: TableParams,
    timeouts: Timeouts,
    metrics: Arc<ReadRepairMetrics>,

    round: Round,
    mode: Option<RepairMode>,
    extra_contacts: bool,

    outstanding: BTreeMap<ReplicaId, RequestKind>,
    contacted: BTreeSet<ReplicaId>,
    spares: Vec<ReplicaId>,
    counted: BTreeSet<ReplicaId>,
    unreachable: BTreeSet<ReplicaId>,

    responses: ResponseSet,
    trace: ReadTrace,

    round_start_ns: u64,
    round_deadline_ns: u64,
    speculated_initial: bool,
    speculated_data: bool,

    outcome_emitted: bool,
    reconciled: Option<Row>,
    repair: Option<RepairWriter>,
}

impl ReadCoordinator {
    /// Starts a read, producing the initial round's requests.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        local_id: ReplicaId,
        read_id: ReadId,
        table: TableName,
        key: Key,
        columns: ColumnSet,
        plan: ReadPlan,
        params: TableParams,
        timeouts: Timeouts,
        metrics: Arc<ReadRepairMetrics>,
        now_ns: u64,
    ) -> (Self, CoordinatorOutput) {
        let mut coordinator = Self {
            local_id,
            read_id,
            table,
            key,
            responses: ResponseSet::new(columns.clone()),
            columns,
            required: plan.required,
            params,
            timeouts,
            metrics,
            round: Round::InitialRead,
            mode: None,
            extra_contacts: plan.extra_contacts,
            outstanding: BTreeMap::new(),
            contacted: BTreeSet::new(),
            spares: plan.spares,
            counted: plan.counted,
            unreachable: BTreeSet::new(),
            trace: ReadTrace::new(),
            round_start_ns: now_ns,
            round_deadline_ns: now_ns.saturating_add(timeouts.read_request_ns()),
            speculated_initial: false,
            speculated_data: false,
            outcome_emitted: false,
            reconciled: None,
            repair: None,
        };

        let mut output = CoordinatorOutput::none();
        for (position, replica) in plan.contacts.iter().enumerate() {
            let kind = if position == 0 {
                RequestKind::Data
            } else {
                RequestKind::Digest
            };
            coordinator.send_read(*replica, kind, false, &mut output);
        }
        debug!(
            read = %coordinator.read_id,
            contacts = plan.contacts.len(),
            required = coordinator.required,
            "read started"
        );
        (coordinator, output)
    }

    /// Feeds one event into the machine.
    pub fn on_event(&mut self, now_ns: u64, event: CoordinatorEvent) -> CoordinatorOutput {
        let mut output = CoordinatorOutput::none();
        match (self.round, event) {
            (Round::Done, _) => {}

            (Round::InitialRead | Round::DataRound, CoordinatorEvent::Response { from, payload }) => {
                // A response only fills the slot of a matching request: a
                // stale digest crossing a data-round re-request must not
                // consume the pending data slot.
                let kind = match &payload {
                    ReadPayload::Data(_) => RequestKind::Data,
                    ReadPayload::Digest(_) => RequestKind::Digest,
                };
                if self.outstanding.get(&from) != Some(&kind) {
                    trace!(read = %self.read_id, from = %from, ?kind, "unsolicited response dropped");
                    return output;
                }
                self.outstanding.remove(&from);
                self.responses.record(from, payload);
                match self.round {
                    Round::InitialRead => self.try_complete_initial(now_ns, &mut output),
                    Round::DataRound => self.try_complete_data_round(now_ns, &mut output),
                    _ => unreachable!(),
                }
            }

            (Round::Repairing, CoordinatorEvent::RepairAck { from }) => {
                let writer = self.repair.as_mut().expect("repairing without writer");
                if writer.record_ack(from) {
                    self.trace.push(ReadEvent::RepairAcked { from });
                }
                if self.repair.as_ref().expect("writer").is_satisfied() {
                    self.finish_repaired(&mut output);
                }
            }
            (_, CoordinatorEvent::RepairAck { .. }) => {}

            (Round::InitialRead | Round::DataRound, CoordinatorEvent::Unreachable { replica }) => {
                self.unreachable.insert(replica);
                self.spares.retain(|id| *id != replica);
                if self.outstanding.remove(&replica).is_some() {
                    debug!(read = %self.read_id, replica = %replica, "contact declared down");
                    match self.round {
                        Round::InitialRead => {
                            self.speculate_initial(&mut output);
                            self.try_complete_initial(now_ns, &mut output);
                        }
                        Round::DataRound => {
                            self.speculate_data(&mut output);
                            self.try_complete_data_round(now_ns, &mut output);
                        }
                        _ => unreachable!(),
                    }
                }
            }
            (Round::Repairing, CoordinatorEvent::Unreachable { replica }) => {
                // Repair-round failure detection is handled by the
                // speculation threshold and the deadline.
                self.unreachable.insert(replica);
            }

            (Round::InitialRead, CoordinatorEvent::Tick) => {
                if !self.speculated_initial && self.past_speculation_threshold(now_ns) {
                    self.speculate_initial(&mut output);
                }
                if now_ns >= self.round_deadline_ns {
                    self.expire_read_round(&mut output);
                }
            }
            (Round::DataRound, CoordinatorEvent::Tick) => {
                if !self.speculated_data && self.past_speculation_threshold(now_ns) {
                    self.speculate_data(&mut output);
                }
                if now_ns >= self.round_deadline_ns {
                    self.expire_read_round(&mut output);
                }
            }
            (Round::Repairing, CoordinatorEvent::Tick) => {
                let writer = self.repair.as_mut().expect("repairing without writer");
                if let Some((target, mutation)) = writer.speculate(now_ns) {
                    self.metrics.record_speculated_data_repair();
                    self.send_repair(target, mutation, true, &mut output);
                }
                let writer = self.repair.as_ref().expect("writer");
                if writer.is_satisfied() {
                    self.finish_repaired(&mut output);
                } else if writer.is_expired(now_ns) {
                    let settled = writer.settled();
                    warn!(
                        read = %self.read_id,
                        settled,
                        required = self.required,
                        "repair round expired"
                    );
                    match self.mode {
                        Some(RepairMode::Blocking) => self.finish(
                            Some(Err(ProtocolError::ReadTimeout {
                                received: settled,
                                required: self.required,
                            })),
                            &mut output,
                        ),
                        _ => self.finish(None, &mut output),
                    }
                }
            }

            (Round::Repairing, CoordinatorEvent::Response { .. }) => {}
        }
        output
    }

    /// Returns the next instant a [`CoordinatorEvent::Tick`] could change
    /// state, or `None` once the read is settled.
    pub fn next_wake_ns(&self) -> Option<u64> {
        match self.round {
            Round::Done => None,
            Round::Repairing => Some(self.repair.as_ref().expect("writer").next_wake_ns()),
            Round::InitialRead | Round::DataRound => {
                let speculated = match self.round {
                    Round::InitialRead => self.speculated_initial,
                    _ => self.speculated_data,
                };
                let threshold = if speculated {
                    None
                } else {
                    self.speculation_threshold_ns()
                        .map(|t| self.round_start_ns.saturating_add(t))
                };
                Some(match threshold {
                    Some(at) => at.min(self.round_deadline_ns),
                    None => self.round_deadline_ns,
                })
            }
        }
    }

    /// Returns true once the read needs no further events.
    pub fn is_settled(&self) -> bool {
        self.round == Round::Done
    }

    /// Returns the read's identifier.
    pub fn read_id(&self) -> ReadId {
        self.read_id
    }

    /// Returns the recorded protocol trace.
    pub fn trace(&self) -> &ReadTrace {
        &self.trace
    }

    // ------------------------------------------------------------------
    // Initial round
    // ------------------------------------------------------------------

    fn try_complete_initial(&mut self, now_ns: u64, output: &mut CoordinatorOutput) {
        if self.counted_total() < self.required || self.responses.data_count() == 0 {
            self.fail_fast_if_starved(output);
            return;
        }

        if !self.responses.digests_consistent() {
            let mode = if self.outcome_emitted {
                RepairMode::Background
            } else {
                RepairMode::Blocking
            };
            self.enter_data_round(now_ns, mode, output);
            return;
        }

        if !self.outcome_emitted {
            let row = reconcile(self.responses.data_rows());
            if self.extra_contacts && !self.outstanding.is_empty() {
                // Answer now; keep listening for the chance-added
                // contacts, which may still reveal divergence.
                self.outcome_emitted = true;
                output.outcome = Some(Ok(ReadResult { row, repair: None }));
                return;
            }
            self.finish(Some(Ok(ReadResult { row, repair: None })), output);
            return;
        }

        if self.outstanding.is_empty() {
            self.finish(None, output);
        }
    }

    fn speculate_initial(&mut self, output: &mut CoordinatorOutput) {
        if self.speculated_initial {
            return;
        }
        let Some(target) = self.take_spare() else {
            // Nobody left to ask; stop watching the threshold.
            self.speculated_initial = true;
            return;
        };
        // Re-request whatever kind is missing; a read still without any
        // data response needs data, otherwise a digest.
        let kind = if self.responses.data_count() == 0 {
            RequestKind::Data
        } else {
            RequestKind::Digest
        };
        self.speculated_initial = true;
        self.metrics.record_speculative_retry(&self.table);
        debug!(read = %self.read_id, target = %target, ?kind, "speculating initial request");
        self.send_read(target, kind, true, output);
    }

    // ------------------------------------------------------------------
    // Data round
    // ------------------------------------------------------------------

    fn enter_data_round(&mut self, now_ns: u64, mode: RepairMode, output: &mut CoordinatorOutput) {
        self.trace.push(ReadEvent::DigestMismatch);
        self.mode = Some(mode);
        if mode == RepairMode::Blocking {
            self.metrics.record_blocking_read_repair();
        }
        debug!(read = %self.read_id, ?mode, "digest mismatch");

        self.round = Round::DataRound;
        self.round_start_ns = now_ns;
        self.round_deadline_ns = match mode {
            // The client is waiting: the original read deadline holds.
            RepairMode::Blocking => self.round_deadline_ns,
            RepairMode::Background => now_ns.saturating_add(self.timeouts.read_request_ns()),
        };
        self.outstanding.clear();

        // A digest responder that already agrees with the merged data has
        // nothing to contribute; only divergent or silent contacts are
        // asked for their rows.
        let interim_digest = reconcile(self.responses.data_rows()).digest(&self.columns);
        let settled: BTreeSet<ReplicaId> = self
            .responses
            .digests()
            .filter(|(_, digest)| *digest == interim_digest)
            .map(|(id, _)| id)
            .collect();
        let targets: Vec<ReplicaId> = self
            .contacted
            .iter()
            .copied()
            .filter(|id| {
                !self.responses.has_data(*id)
                    && !settled.contains(id)
                    && !self.unreachable.contains(id)
            })
            .collect();
        for target in targets {
            self.send_read(target, RequestKind::Data, false, output);
        }
        self.try_complete_data_round(now_ns, output);
    }

    fn try_complete_data_round(&mut self, now_ns: u64, output: &mut CoordinatorOutput) {
        if self.round != Round::DataRound {
            return;
        }
        if self.outstanding.is_empty() || self.counted_data() >= self.required {
            self.enter_repairing(now_ns, output);
        }
    }

    fn speculate_data(&mut self, output: &mut CoordinatorOutput) {
        if self.speculated_data || self.outstanding.is_empty() {
            return;
        }
        let Some(target) = self.take_spare() else {
            self.speculated_data = true;
            return;
        };
        self.speculated_data = true;
        self.metrics.record_speculated_data_request();
        debug!(read = %self.read_id, target = %target, "speculating data request");
        self.send_read(target, RequestKind::Data, true, output);
    }

    // ------------------------------------------------------------------
    // Repair round
    // ------------------------------------------------------------------

    fn enter_repairing(&mut self, now_ns: u64, output: &mut CoordinatorOutput) {
        let reconciled = reconcile(self.responses.data_rows());
        let mut plan = plan_repairs(&reconciled, self.responses.data_rows(), &self.columns);
        // Digest responders matching the winning row count toward the
        // repair quorum even though they were never diffed.
        let reconciled_digest = reconciled.digest(&self.columns);
        let digest_agreeing: BTreeSet<ReplicaId> = self
            .responses
            .digests()
            .filter(|(_, digest)| *digest == reconciled_digest)
            .map(|(id, _)| id)
            .collect();
        plan.agreeing.extend(digest_agreeing.iter().copied());
        self.reconciled = Some(reconciled.clone());

        if plan.is_clean() {
            // Divergence came only from replicas that never produced
            // data; nothing can be diffed, nothing is owed.
            let outcome = (!self.outcome_emitted).then(|| {
                Ok(ReadResult {
                    row: reconciled,
                    repair: None,
                })
            });
            self.finish(outcome, output);
            return;
        }

        let mut full_mutation = Mutation::new();
        for (name, cell) in reconciled.live_cells() {
            if self.columns.selects(name) {
                full_mutation.set(name.clone(), cell.clone());
            }
        }
        if let Some(tombstone) = reconciled.tombstone() {
            if !tombstone.purge_eligible {
                full_mutation.delete(tombstone);
            }
        }

        let directive_targets: BTreeSet<ReplicaId> =
            plan.directives.iter().map(|d| d.target).collect();
        let agreeing: BTreeSet<ReplicaId> = plan.agreeing.iter().copied().collect();
        // Untried replicas first, then contacts that never produced data.
        let mut spares: Vec<ReplicaId> = self
            .spares
            .iter()
            .copied()
            .filter(|id| !self.unreachable.contains(id))
            .collect();
        let fallback_contacts: Vec<ReplicaId> = self
            .contacted
            .iter()
            .copied()
            .filter(|id| {
                !directive_targets.contains(id)
                    && !agreeing.contains(id)
                    && !self.unreachable.contains(id)
                    && self.counted.contains(id)
            })
            .collect();
        spares.extend(fallback_contacts);

        let writer = RepairWriter::new(
            plan,
            full_mutation,
            self.required,
            self.counted.clone(),
            spares,
            now_ns,
            self.params
                .speculative_retry
                .threshold_ns(self.timeouts.write_request),
            now_ns.saturating_add(self.timeouts.write_request_ns()),
        );

        self.round = Round::Repairing;
        self.round_start_ns = now_ns;
        self.round_deadline_ns = writer.deadline_ns();

        let directives: Vec<(ReplicaId, Mutation)> = writer
            .directives()
            .iter()
            .map(|d| (d.target, d.mutation.clone()))
            .collect();
        let satisfied = writer.is_satisfied();
        self.repair = Some(writer);

        for (target, mutation) in directives {
            self.send_repair(target, mutation, false, output);
        }

        if satisfied {
            // Enough replicas already hold the winning row; the sent
            // repairs are fire-and-forget.
            self.finish_repaired(output);
        }
    }

    fn finish_repaired(&mut self, output: &mut CoordinatorOutput) {
        let outcome = (!self.outcome_emitted).then(|| {
            Ok(ReadResult {
                row: self.reconciled.clone().unwrap_or_default(),
                repair: self.mode,
            })
        });
        self.finish(outcome, output);
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn expire_read_round(&mut self, output: &mut CoordinatorOutput) {
        if self.outcome_emitted {
            self.finish(None, output);
            return;
        }
        warn!(
            read = %self.read_id,
            received = self.counted_total(),
            required = self.required,
            "read expired"
        );
        self.finish(
            Some(Err(ProtocolError::ReadTimeout {
                received: self.counted_total(),
                required: self.required,
            })),
            output,
        );
    }

    /// Fails immediately once no pending or future response can complete
    /// the read: neither the counted quorum nor a first data response is
    /// reachable any more.
    fn fail_fast_if_starved(&mut self, output: &mut CoordinatorOutput) {
        if self.outcome_emitted || !self.spares.is_empty() {
            return;
        }
        let quorum_blocked =
            self.counted_total() + self.counted_outstanding() < self.required;
        let data_blocked = self.responses.data_count() == 0
            && !self.outstanding.values().any(|k| *k == RequestKind::Data);
        if !quorum_blocked && !data_blocked {
            return;
        }
        self.finish(
            Some(Err(ProtocolError::ReadTimeout {
                received: self.counted_total(),
                required: self.required,
            })),
            output,
        );
    }

    fn finish(
        &mut self,
        outcome: Option<Result<ReadResult, ProtocolError>>,
        output: &mut CoordinatorOutput,
    ) {
        self.round = Round::Done;
        self.outstanding.clear();
        if let Some(outcome) = outcome {
            debug_assert!(!self.outcome_emitted, "outcome emitted twice");
            self.outcome_emitted = true;
            output.outcome = Some(outcome);
        }
    }

    fn send_read(
        &mut self,
        to: ReplicaId,
        kind: RequestKind,
        speculative: bool,
        output: &mut CoordinatorOutput,
    ) {
        self.outstanding.insert(to, kind);
        self.contacted.insert(to);
        self.trace.push(match kind {
            RequestKind::Data => ReadEvent::DataRequested { to, speculative },
            RequestKind::Digest => ReadEvent::DigestRequested { to, speculative },
        });
        output.messages.push(Message::targeted(
            self.local_id,
            to,
            MessagePayload::ReadRequest(ReadRequest {
                read_id: self.read_id,
                table: self.table.clone(),
                key: self.key.clone(),
                columns: self.columns.clone(),
                kind,
            }),
        ));
    }

    fn send_repair(
        &mut self,
        to: ReplicaId,
        mutation: Mutation,
        speculative: bool,
        output: &mut CoordinatorOutput,
    ) {
        self.trace.push(ReadEvent::RepairSent { to, speculative });
        output.messages.push(Message::targeted(
            self.local_id,
            to,
            MessagePayload::RepairWrite(RepairWrite {
                read_id: self.read_id,
                table: self.table.clone(),
                key: self.key.clone(),
                mutation,
            }),
        ));
    }

    fn counted_total(&self) -> usize {
        self.responses
            .replicas()
            .filter(|id| self.counted.contains(id))
            .count()
    }

    fn counted_data(&self) -> usize {
        self.responses
            .data_rows()
            .filter(|(id, _)| self.counted.contains(id))
            .count()
    }

    fn counted_outstanding(&self) -> usize {
        self.outstanding
            .keys()
            .filter(|id| self.counted.contains(id))
            .count()
    }

    fn take_spare(&mut self) -> Option<ReplicaId> {
        while !self.spares.is_empty() {
            let candidate = self.spares.remove(0);
            if !self.unreachable.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn speculation_threshold_ns(&self) -> Option<u64> {
        self.params
            .speculative_retry
            .threshold_ns(self.timeouts.read_request)
    }

    fn past_speculation_threshold(&self, now_ns: u64) -> bool {
        match self.speculation_threshold_ns() {
            Some(t) => now_ns >= self.round_start_ns.saturating_add(t),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeculativeRetry;
    use meridian_types::{Cell, ConsistencyLevel, Timestamp};
    use std::time::Duration;

    fn id(i: u8) -> ReplicaId {
        ReplicaId::new(i)
    }

    fn row_with(value: &str, ts: u64) -> Row {
        let mut row = Row::new();
        row.merge_cell(
            "v".into(),
            Cell::new(value.as_bytes().to_vec(), Timestamp::new(ts)),
        );
        row
    }

    fn start_read(
        plan: ReadPlan,
        params: TableParams,
    ) -> (ReadCoordinator, CoordinatorOutput, Arc<ReadRepairMetrics>) {
        let metrics = Arc::new(ReadRepairMetrics::new());
        let (coordinator, output) = ReadCoordinator::start(
            id(0),
            ReadId::new(1),
            TableName::new("users"),
            Key::from_u64(7),
            ColumnSet::All,
            plan,
            params,
            Timeouts::simulation(),
            Arc::clone(&metrics),
            0,
        );
        (coordinator, output, metrics)
    }

    fn quorum_plan(ranked: &[u8]) -> ReadPlan {
        let ranked: Vec<ReplicaId> = ranked.iter().map(|&i| id(i)).collect();
        let required = ConsistencyLevel::Quorum.required_acks(ranked.len(), ranked.len());
        plan_read(
            &ranked,
            required,
            ConsistencyLevel::Quorum,
            ChanceOutcome::None,
            &BTreeSet::new(),
        )
    }

    fn response(from: u8, payload: ReadPayload) -> CoordinatorEvent {
        CoordinatorEvent::Response {
            from: id(from),
            payload,
        }
    }

    #[test]
    fn plan_contacts_required_replicas() {
        let plan = quorum_plan(&[0, 1, 2]);
        assert_eq!(plan.contacts, vec![id(0), id(1)]);
        assert_eq!(plan.spares, vec![id(2)]);
        assert_eq!(plan.required, 2);
        assert!(!plan.extra_contacts);
    }

    #[test]
    fn chance_plan_contacts_everyone() {
        let ranked = vec![id(0), id(1), id(2)];
        let plan = plan_read(
            &ranked,
            2,
            ConsistencyLevel::Quorum,
            ChanceOutcome::AllReplicas,
            &BTreeSet::new(),
        );
        assert_eq!(plan.contacts.len(), 3);
        assert!(plan.extra_contacts);
        assert!(plan.spares.is_empty());
    }

    #[test]
    fn datacenter_local_plan_adds_local_replicas() {
        let ranked = vec![id(0), id(1), id(2), id(3)];
        let local: BTreeSet<ReplicaId> = [id(0), id(3)].into_iter().collect();
        let plan = plan_read(
            &ranked,
            2,
            ConsistencyLevel::Quorum,
            ChanceOutcome::DatacenterLocal,
            &local,
        );
        assert_eq!(plan.contacts, vec![id(0), id(1), id(3)]);
        assert_eq!(plan.spares, vec![id(2)]);
    }

    #[test]
    fn local_quorum_plan_contacts_only_local_replicas() {
        // Remote replicas rank first; the plan must skip past them.
        let ranked = vec![id(2), id(3), id(0), id(1)];
        let local: BTreeSet<ReplicaId> = [id(0), id(1)].into_iter().collect();
        let plan = plan_read(
            &ranked,
            2,
            ConsistencyLevel::LocalQuorum,
            ChanceOutcome::None,
            &local,
        );
        assert_eq!(plan.contacts, vec![id(0), id(1)]);
        assert!(plan.spares.is_empty());
        assert_eq!(plan.counted, local);
    }

    #[test]
    fn local_quorum_counts_only_local_responses() {
        // Chance widened the contacts across datacenters; remote answers
        // join reconciliation but must not complete the read on their own.
        let ranked = vec![id(0), id(1), id(2), id(3)];
        let local: BTreeSet<ReplicaId> = [id(0), id(1)].into_iter().collect();
        let plan = plan_read(
            &ranked,
            2,
            ConsistencyLevel::LocalQuorum,
            ChanceOutcome::AllReplicas,
            &local,
        );
        assert_eq!(plan.contacts[0], id(0));
        let (mut c, _, _) = start_read(plan, TableParams::none());

        let row = row_with("fresh", 5);
        let digest = row.digest(&ColumnSet::All);
        c.on_event(10, response(0, ReadPayload::Data(row.clone())));
        let out = c.on_event(20, response(2, ReadPayload::Digest(digest)));
        assert!(out.outcome.is_none());
        let out = c.on_event(30, response(3, ReadPayload::Digest(digest)));
        assert!(out.outcome.is_none());

        // The second local response is what completes the read.
        let out = c.on_event(40, response(1, ReadPayload::Digest(digest)));
        let result = out.outcome.expect("local quorum met").expect("ok");
        assert_eq!(result.row, row);
        assert!(c.is_settled());
    }

    #[test]
    fn chance_roll_prefers_global() {
        let params = TableParams::none()
            .with_read_repair_chance(0.5)
            .with_dclocal_read_repair_chance(0.5);
        assert_eq!(roll_chance(&params, 0.1, 0.9), ChanceOutcome::AllReplicas);
        assert_eq!(
            roll_chance(&params, 0.9, 0.1),
            ChanceOutcome::DatacenterLocal
        );
        assert_eq!(roll_chance(&params, 0.9, 0.9), ChanceOutcome::None);
    }

    #[test]
    fn agreeing_quorum_completes_without_repair() {
        let (mut c, output, _) = start_read(quorum_plan(&[0, 1, 2]), TableParams::none());
        assert_eq!(output.messages.len(), 2);

        let row = row_with("fresh", 5);
        let digest = row.digest(&ColumnSet::All);
        let out = c.on_event(10, response(0, ReadPayload::Data(row.clone())));
        assert!(out.outcome.is_none());
        let out = c.on_event(20, response(1, ReadPayload::Digest(digest)));

        let result = out.outcome.expect("complete").expect("ok");
        assert_eq!(result.row, row);
        assert_eq!(result.repair, None);
        assert!(c.is_settled());
        assert_eq!(c.trace().repair_message_count(), 0);
    }

    #[test]
    fn mismatch_blocks_until_repair_ack() {
        let (mut c, _, metrics) = start_read(quorum_plan(&[0, 1, 2]), TableParams::none());

        let fresh = row_with("fresh", 5);
        c.on_event(10, response(0, ReadPayload::Data(fresh.clone())));
        // Stale digest disagrees; the coordinator re-asks replica 1 for data.
        let out = c.on_event(
            20,
            response(1, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );
        assert!(out.outcome.is_none());
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::ReadRequest(ReadRequest {
                kind: RequestKind::Data,
                ..
            })
        ));

        // Replica 1 returns its stale (empty) row; a repair goes out.
        let out = c.on_event(30, response(1, ReadPayload::Data(Row::new())));
        assert!(out.outcome.is_none());
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::RepairWrite(_)
        ));
        assert_eq!(out.messages[0].to, id(1));

        // The ack completes the read.
        let out = c.on_event(40, CoordinatorEvent::RepairAck { from: id(1) });
        let result = out.outcome.expect("complete").expect("ok");
        assert_eq!(result.row, fresh);
        assert_eq!(result.repair, Some(RepairMode::Blocking));
        assert_eq!(metrics.snapshot().blocking_read_repair, 1);
    }

    #[test]
    fn unacked_repair_times_out_the_read() {
        let (mut c, _, _) = start_read(quorum_plan(&[0, 1]), TableParams::none());

        c.on_event(10, response(0, ReadPayload::Data(row_with("fresh", 5))));
        c.on_event(
            20,
            response(1, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );
        c.on_event(30, response(1, ReadPayload::Data(Row::new())));

        // No ack ever arrives; the write deadline expires the read. The
        // agreeing data replica is the only settled one.
        let deadline = c.next_wake_ns().unwrap();
        let out = c.on_event(deadline, CoordinatorEvent::Tick);
        assert_eq!(
            out.outcome.expect("complete").unwrap_err(),
            ProtocolError::ReadTimeout {
                received: 1,
                required: 2
            }
        );
    }

    #[test]
    fn silent_data_replica_triggers_table_speculation() {
        let params =
            TableParams::none().with_speculative_retry(SpeculativeRetry::Fixed(Duration::from_millis(50)));
        let (mut c, _, metrics) = start_read(quorum_plan(&[0, 1, 2]), params);

        // Digest arrives, data does not.
        let row = row_with("fresh", 5);
        c.on_event(10, response(1, ReadPayload::Digest(row.digest(&ColumnSet::All))));

        let out = c.on_event(50_000_000, CoordinatorEvent::Tick);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].to, id(2));
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::ReadRequest(ReadRequest {
                kind: RequestKind::Data,
                ..
            })
        ));
        assert_eq!(metrics.speculative_retries(&TableName::new("users")), 1);

        // The speculated replica answers with matching data.
        let out = c.on_event(60_000_000, response(2, ReadPayload::Data(row.clone())));
        let result = out.outcome.expect("complete").expect("ok");
        assert_eq!(result.row, row);
    }

    #[test]
    fn data_round_speculates_toward_untried_replica() {
        // Default percentile speculation: fires just before the deadline.
        let (mut c, _, metrics) = start_read(quorum_plan(&[0, 1, 2]), TableParams::default());

        let fresh = row_with("fresh", 5);
        c.on_event(10, response(0, ReadPayload::Data(fresh.clone())));
        c.on_event(
            20,
            response(1, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );

        // Replica 1 never answers the data round; the threshold fires.
        let wake = c.next_wake_ns().unwrap();
        let out = c.on_event(wake, CoordinatorEvent::Tick);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].to, id(2));
        assert_eq!(metrics.snapshot().speculated_data_request, 1);

        // The spare's stale data lets repair proceed against it.
        let out = c.on_event(wake + 10, response(2, ReadPayload::Data(Row::new())));
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::RepairWrite(_)
        ));
        assert_eq!(out.messages[0].to, id(2));

        let out = c.on_event(wake + 20, CoordinatorEvent::RepairAck { from: id(2) });
        let result = out.outcome.expect("complete").expect("ok");
        assert_eq!(result.row, fresh);
    }

    #[test]
    fn repair_round_speculates_when_directive_target_is_silent() {
        let (mut c, _, metrics) = start_read(quorum_plan(&[0, 1, 2]), TableParams::default());

        let fresh = row_with("fresh", 5);
        c.on_event(10, response(0, ReadPayload::Data(fresh.clone())));
        c.on_event(
            20,
            response(1, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );
        // Data round: replica 1 stays silent, spare 2 answers stale data.
        let wake = c.next_wake_ns().unwrap();
        c.on_event(wake, CoordinatorEvent::Tick);
        c.on_event(wake + 10, response(2, ReadPayload::Data(Row::new())));

        // Repair round: directive went to 2; 2 never acks. Speculation
        // falls back to 1, the contact that never produced data.
        let repair_wake = c.next_wake_ns().unwrap();
        let out = c.on_event(repair_wake, CoordinatorEvent::Tick);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].to, id(1));
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::RepairWrite(_)
        ));
        assert_eq!(metrics.snapshot().speculated_data_repair, 1);

        // The fallback's ack plus the agreeing data replica reach quorum.
        let out = c.on_event(repair_wake + 10, CoordinatorEvent::RepairAck { from: id(1) });
        let result = out.outcome.expect("complete").expect("ok");
        assert_eq!(result.row, fresh);
        assert_eq!(result.repair, Some(RepairMode::Blocking));
    }

    #[test]
    fn chance_read_answers_before_background_repair() {
        let ranked = vec![id(0), id(1), id(2)];
        let plan = plan_read(
            &ranked,
            2,
            ConsistencyLevel::Quorum,
            ChanceOutcome::AllReplicas,
            &BTreeSet::new(),
        );
        let (mut c, output, metrics) = start_read(plan, TableParams::none());
        assert_eq!(output.messages.len(), 3);

        let fresh = row_with("fresh", 5);
        let digest = fresh.digest(&ColumnSet::All);
        c.on_event(10, response(0, ReadPayload::Data(fresh.clone())));
        // The first two (quorum) agree: the client is answered now.
        let out = c.on_event(20, response(1, ReadPayload::Digest(digest)));
        let result = out.outcome.expect("answered").expect("ok");
        assert_eq!(result.row, fresh);
        assert!(!c.is_settled());

        // The chance-added contact disagrees; repair proceeds quietly.
        let out = c.on_event(
            30,
            response(2, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );
        assert!(out.outcome.is_none());
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].to, id(2));

        let out = c.on_event(40, response(2, ReadPayload::Data(Row::new())));
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::RepairWrite(_)
        ));
        let out = c.on_event(50, CoordinatorEvent::RepairAck { from: id(2) });
        assert!(out.outcome.is_none());
        assert!(c.is_settled());
        assert_eq!(metrics.snapshot().blocking_read_repair, 0);
    }

    #[test]
    fn crossing_digest_does_not_consume_the_data_round_slot() {
        let (mut c, _, _) = start_read(quorum_plan(&[0, 1, 2]), TableParams::none());
        let fresh = row_with("fresh", 5);
        c.on_event(10, response(0, ReadPayload::Data(fresh.clone())));
        let out = c.on_event(
            20,
            response(1, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );
        assert_eq!(out.messages.len(), 1);

        // A retransmitted stale digest crosses the data re-request; it
        // must not fill replica 1's pending data slot.
        let out = c.on_event(
            25,
            response(1, ReadPayload::Digest(Row::new().digest(&ColumnSet::All))),
        );
        assert!(out.messages.is_empty());
        assert!(out.outcome.is_none());

        // The real data response still lands and the repair proceeds.
        let out = c.on_event(30, response(1, ReadPayload::Data(Row::new())));
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(
            out.messages[0].payload,
            MessagePayload::RepairWrite(_)
        ));
        let out = c.on_event(40, CoordinatorEvent::RepairAck { from: id(1) });
        assert_eq!(out.outcome.expect("complete").expect("ok").row, fresh);
    }

    #[test]
    fn read_fails_fast_when_no_data_response_can_arrive() {
        let ranked = vec![id(0), id(1), id(2)];
        let plan = plan_read(
            &ranked,
            2,
            ConsistencyLevel::Quorum,
            ChanceOutcome::AllReplicas,
            &BTreeSet::new(),
        );
        let (mut c, _, _) = start_read(plan, TableParams::none());

        let digest = row_with("v", 3).digest(&ColumnSet::All);
        c.on_event(10, response(1, ReadPayload::Digest(digest)));
        c.on_event(20, response(2, ReadPayload::Digest(digest)));

        // The only data contact dies with nobody left to re-ask: the
        // read cannot complete and must not idle until the deadline.
        let out = c.on_event(30, CoordinatorEvent::Unreachable { replica: id(0) });
        assert_eq!(
            out.outcome.expect("fails fast").unwrap_err(),
            ProtocolError::ReadTimeout {
                received: 2,
                required: 2
            }
        );
        assert!(c.is_settled());
    }

    #[test]
    fn read_times_out_without_quorum() {
        let (mut c, _, _) = start_read(quorum_plan(&[0, 1, 2]), TableParams::none());
        c.on_event(10, response(0, ReadPayload::Data(row_with("v", 1))));

        let out = c.on_event(
            Timeouts::simulation().read_request_ns(),
            CoordinatorEvent::Tick,
        );
        assert_eq!(
            out.outcome.expect("expired").unwrap_err(),
            ProtocolError::ReadTimeout {
                received: 1,
                required: 2
            }
        );
    }

    #[test]
    fn unreachable_contact_speculates_immediately() {
        let (mut c, _, metrics) = start_read(quorum_plan(&[0, 1, 2]), TableParams::none());

        let out = c.on_event(10, CoordinatorEvent::Unreachable { replica: id(0) });
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].to, id(2));
        assert_eq!(metrics.speculative_retries(&TableName::new("users")), 1);
    }
}
