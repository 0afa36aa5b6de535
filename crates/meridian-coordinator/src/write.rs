//! The write coordinator state machine.
//!
//! Writes fan out to every replica of the key and succeed once the
//! consistency level's worth of acknowledgments arrive. There is no
//! rollback: replicas that missed the write are healed later by read
//! repair or anti-entropy, not by the write path.

use tracing::{debug, warn};

use meridian_types::{Key, ReplicaId, TableName};

use crate::config::Timeouts;
use crate::error::ProtocolError;
use crate::message::{Message, MessagePayload, Mutation, WriteId, WriteRequest};

/// External stimulus for a write coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    /// A replica acknowledged the write.
    Ack {
        /// The acknowledging replica.
        from: ReplicaId,
    },

    /// Time passed; the deadline may have fired.
    Tick,
}

/// Effects produced by one event.
#[derive(Debug, Default)]
pub struct WriteOutput {
    /// Messages to hand to the transport.
    pub messages: Vec<Message>,

    /// The client answer, produced exactly once per write.
    pub outcome: Option<Result<(), ProtocolError>>,
}

/// Pure state machine for one coordinated write.
#[derive(Debug)]
pub struct WriteCoordinator {
    write_id: WriteId,
    acked: Vec<ReplicaId>,
    required: usize,
    deadline_ns: u64,
    done: bool,
}

impl WriteCoordinator {
    /// Starts a write, fanning the mutation out to every target.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        local_id: ReplicaId,
        write_id: WriteId,
        table: TableName,
        key: Key,
        mutation: Mutation,
        targets: &[ReplicaId],
        required: usize,
        timeouts: Timeouts,
        now_ns: u64,
    ) -> (Self, WriteOutput) {
        let coordinator = Self {
            write_id,
            acked: Vec::new(),
            required,
            deadline_ns: now_ns.saturating_add(timeouts.write_request_ns()),
            done: false,
        };
        let mut output = WriteOutput::default();
        for target in targets {
            output.messages.push(Message::targeted(
                local_id,
                *target,
                MessagePayload::Write(WriteRequest {
                    write_id,
                    table: table.clone(),
                    key: key.clone(),
                    mutation: mutation.clone(),
                }),
            ));
        }
        debug!(write = %write_id, targets = targets.len(), required, "write started");
        (coordinator, output)
    }

    /// Feeds one event into the machine.
    pub fn on_event(&mut self, now_ns: u64, event: WriteEvent) -> WriteOutput {
        let mut output = WriteOutput::default();
        if self.done {
            return output;
        }
        match event {
            WriteEvent::Ack { from } => {
                if !self.acked.contains(&from) {
                    self.acked.push(from);
                }
                if self.acked.len() >= self.required {
                    self.done = true;
                    output.outcome = Some(Ok(()));
                }
            }
            WriteEvent::Tick => {
                if now_ns >= self.deadline_ns {
                    warn!(
                        write = %self.write_id,
                        received = self.acked.len(),
                        required = self.required,
                        "write expired"
                    );
                    self.done = true;
                    output.outcome = Some(Err(ProtocolError::WriteTimeout {
                        received: self.acked.len(),
                        required: self.required,
                    }));
                }
            }
        }
        output
    }

    /// Returns the instant the deadline fires, or `None` once settled.
    pub fn next_wake_ns(&self) -> Option<u64> {
        (!self.done).then_some(self.deadline_ns)
    }

    /// Returns true once the write needs no further events.
    pub fn is_settled(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u8) -> ReplicaId {
        ReplicaId::new(i)
    }

    fn start(targets: &[u8], required: usize) -> (WriteCoordinator, WriteOutput) {
        let targets: Vec<ReplicaId> = targets.iter().map(|&i| id(i)).collect();
        WriteCoordinator::start(
            id(0),
            WriteId::new(1),
            TableName::new("users"),
            Key::from_u64(7),
            Mutation::new(),
            &targets,
            required,
            Timeouts::simulation(),
            0,
        )
    }

    #[test]
    fn fans_out_to_all_targets() {
        let (_, output) = start(&[0, 1, 2], 2);
        assert_eq!(output.messages.len(), 3);
        assert!(output
            .messages
            .iter()
            .all(|m| matches!(m.payload, MessagePayload::Write(_))));
    }

    #[test]
    fn succeeds_at_required_acks() {
        let (mut w, _) = start(&[0, 1, 2], 2);
        assert!(w.on_event(10, WriteEvent::Ack { from: id(0) }).outcome.is_none());
        let out = w.on_event(20, WriteEvent::Ack { from: id(1) });
        assert_eq!(out.outcome, Some(Ok(())));
        assert!(w.is_settled());

        // A straggler ack is ignored.
        assert!(w.on_event(30, WriteEvent::Ack { from: id(2) }).outcome.is_none());
    }

    #[test]
    fn duplicate_acks_count_once() {
        let (mut w, _) = start(&[0, 1], 2);
        w.on_event(10, WriteEvent::Ack { from: id(0) });
        let out = w.on_event(20, WriteEvent::Ack { from: id(0) });
        assert!(out.outcome.is_none());
    }

    #[test]
    fn times_out_below_required() {
        let (mut w, _) = start(&[0, 1, 2], 2);
        w.on_event(10, WriteEvent::Ack { from: id(0) });

        let deadline = w.next_wake_ns().unwrap();
        let out = w.on_event(deadline, WriteEvent::Tick);
        assert_eq!(
            out.outcome,
            Some(Err(ProtocolError::WriteTimeout {
                received: 1,
                required: 2
            }))
        );
    }
}
