//! Transport abstraction for protocol message passing.
//!
//! The coordinator state machine is pure: it produces [`Message`] values
//! as output and never touches a socket. Implementations of [`Transport`]
//! carry those messages - the simulation harness with injected latency
//! and faults, a real network in production.
//!
//! Delivery is fire-and-forget. Messages may be lost, delayed, or
//! reordered; the read protocol compensates with deadlines, speculation,
//! and quorum accounting, never with transport-level retries.

use std::fmt::Debug;
use std::sync::Mutex;

use meridian_types::ReplicaId;

use crate::message::Message;

// ============================================================================
// Transport Trait
// ============================================================================

/// Sends protocol messages to replicas.
///
/// No delivery guarantee is implied. Implementations must not block the
/// caller on delivery.
pub trait Transport: Debug + Send + Sync {
    /// Sends a targeted message. The recipient is `message.to`.
    fn send(&self, message: Message);

    /// Returns the replica this transport sends from.
    fn local_id(&self) -> ReplicaId;
}

// ============================================================================
// Message Sink
// ============================================================================

/// A transport that collects messages for later inspection.
///
/// The simulation cluster drains the sink after each protocol step and
/// feeds the messages into its in-flight queue; unit tests drain it to
/// assert on exactly what a state machine emitted.
#[derive(Debug)]
pub struct MessageSink {
    local_id: ReplicaId,
    messages: Mutex<Vec<Message>>,
}

impl MessageSink {
    /// Creates an empty sink sending from `local_id`.
    pub fn new(local_id: ReplicaId) -> Self {
        Self {
            local_id,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Removes and returns all collected messages in send order.
    pub fn drain(&self) -> Vec<Message> {
        let mut messages = self.messages.lock().expect("lock poisoned");
        std::mem::take(&mut *messages)
    }

    /// Returns the number of collected messages.
    pub fn len(&self) -> usize {
        self.messages.lock().expect("lock poisoned").len()
    }

    /// Returns true if no messages have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for MessageSink {
    fn send(&self, message: Message) {
        let mut messages = self.messages.lock().expect("lock poisoned");
        messages.push(message);
    }

    fn local_id(&self) -> ReplicaId {
        self.local_id
    }
}
