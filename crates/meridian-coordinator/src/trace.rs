//! Per-read protocol trace.
//!
//! The coordinator appends one [`ReadEvent`] per externally visible step
//! it takes. The trace is how scenario tests assert on the exact message
//! pattern of a read (for example, that a matched digest round produced
//! no repair traffic at all) without sniffing the transport.

use meridian_types::ReplicaId;

/// One externally visible step of a coordinated read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// A full-data request was sent.
    DataRequested {
        /// Target replica.
        to: ReplicaId,
        /// True when sent by speculation rather than the initial plan.
        speculative: bool,
    },

    /// A digest request was sent.
    DigestRequested {
        /// Target replica.
        to: ReplicaId,
        /// True when sent by speculation rather than the initial plan.
        speculative: bool,
    },

    /// Collected responses disagreed, starting a repair data round.
    DigestMismatch,

    /// A repair mutation was sent.
    RepairSent {
        /// Target replica.
        to: ReplicaId,
        /// True when sent to an extra replica after a directive target
        /// stayed silent.
        speculative: bool,
    },

    /// A replica acknowledged its repair mutation.
    RepairAcked {
        /// Acknowledging replica.
        from: ReplicaId,
    },
}

/// Ordered events of one read.
#[derive(Debug, Clone, Default)]
pub struct ReadTrace {
    events: Vec<ReadEvent>,
}

impl ReadTrace {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&mut self, event: ReadEvent) {
        self.events.push(event);
    }

    /// Returns the recorded events in order.
    pub fn events(&self) -> &[ReadEvent] {
        &self.events
    }

    /// Returns the number of repair mutations sent.
    pub fn repair_message_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ReadEvent::RepairSent { .. }))
            .count()
    }

    /// Returns true if collected responses ever disagreed.
    pub fn saw_mismatch(&self) -> bool {
        self.events.contains(&ReadEvent::DigestMismatch)
    }

    /// Returns the replicas sent a full-data request, in order.
    pub fn data_requested(&self) -> Vec<ReplicaId> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ReadEvent::DataRequested { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}
