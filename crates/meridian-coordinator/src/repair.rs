//! Repair write round: pushing winning data to stale replicas.
//!
//! [`RepairWriter`] is the pure bookkeeping behind the final round of a
//! divergent read. It owns the directives produced by
//! [`plan_repairs`](crate::reconcile::plan_repairs), counts
//! acknowledgments against the read's original consistency level, and
//! decides when to speculate an extra repair mutation because a directive
//! target has gone silent.
//!
//! Quorum accounting counts distinct replicas that either already agreed
//! with the reconciled row (no write needed) or acknowledged a repair
//! mutation. Only replicas in the round's counted set contribute, so a
//! datacenter-local level is satisfied within its datacenter. The round
//! succeeds when that count reaches the requirement; it never requires
//! every stale replica to answer.

use std::collections::BTreeSet;

use meridian_types::ReplicaId;

use crate::message::Mutation;
use crate::reconcile::{RepairDirective, RepairPlan};

/// State of one read's repair write round.
#[derive(Debug)]
pub struct RepairWriter {
    directives: Vec<RepairDirective>,
    agreeing: BTreeSet<ReplicaId>,
    acked: BTreeSet<ReplicaId>,
    required: usize,
    /// Replicas whose agreement or ack may satisfy `required`.
    counted: BTreeSet<ReplicaId>,
    /// Absolute time after which a silent directive target triggers a
    /// speculative repair. `None` disables speculation.
    speculate_at_ns: Option<u64>,
    deadline_ns: u64,
    speculated: bool,
    /// Fallback targets for a speculative repair, preference order.
    spares: Vec<ReplicaId>,
    /// The complete winning content, sent to a spare that was never
    /// diffed.
    full_mutation: Mutation,
}

impl RepairWriter {
    /// Creates the round from a repair plan.
    ///
    /// `spares` are live replicas without a directive, preference order;
    /// a speculative repair goes to the first one. `speculation_delay_ns`
    /// is relative to `start_ns`.
    pub fn new(
        plan: RepairPlan,
        full_mutation: Mutation,
        required: usize,
        counted: BTreeSet<ReplicaId>,
        spares: Vec<ReplicaId>,
        start_ns: u64,
        speculation_delay_ns: Option<u64>,
        deadline_ns: u64,
    ) -> Self {
        Self {
            agreeing: plan.agreeing.into_iter().collect(),
            directives: plan.directives,
            acked: BTreeSet::new(),
            required,
            counted,
            speculate_at_ns: speculation_delay_ns.map(|d| start_ns.saturating_add(d)),
            deadline_ns,
            speculated: false,
            spares,
            full_mutation,
        }
    }

    /// Returns the directives to send when the round opens.
    pub fn directives(&self) -> &[RepairDirective] {
        &self.directives
    }

    /// Records an acknowledgment. Returns true if it was new.
    pub fn record_ack(&mut self, from: ReplicaId) -> bool {
        self.acked.insert(from)
    }

    /// Returns the number of distinct counted replicas settled on the
    /// winning row: already agreeing, or acknowledged a repair.
    pub fn settled(&self) -> usize {
        self.agreeing
            .union(&self.acked)
            .filter(|id| self.counted.contains(id))
            .count()
    }

    /// Returns true once enough replicas are settled.
    pub fn is_satisfied(&self) -> bool {
        self.settled() >= self.required
    }

    /// Returns true once the round can no longer succeed in time.
    pub fn is_expired(&self, now_ns: u64) -> bool {
        now_ns >= self.deadline_ns && !self.is_satisfied()
    }

    /// Returns the deadline of the round.
    pub fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }

    /// Decides whether to speculate an extra repair mutation now.
    ///
    /// Fires at most once per read, only while a directive target is
    /// still silent and a spare exists. The spare receives the full
    /// winning content since it was never diffed.
    pub fn speculate(&mut self, now_ns: u64) -> Option<(ReplicaId, Mutation)> {
        let speculate_at = self.speculate_at_ns?;
        if self.speculated || self.is_satisfied() || now_ns < speculate_at {
            return None;
        }
        let silent_target = self
            .directives
            .iter()
            .any(|d| !self.acked.contains(&d.target));
        if !silent_target {
            return None;
        }
        if self.spares.is_empty() {
            // Nobody left to ask; stop watching the threshold.
            self.speculated = true;
            return None;
        }
        let target = self.spares.remove(0);
        self.speculated = true;
        Some((target, self.full_mutation.clone()))
    }

    /// Returns the next instant at which [`speculate`](Self::speculate)
    /// or expiry could change the round's state.
    pub fn next_wake_ns(&self) -> u64 {
        match self.speculate_at_ns {
            Some(at) if !self.speculated => at.min(self.deadline_ns),
            _ => self.deadline_ns,
        }
    }
}
