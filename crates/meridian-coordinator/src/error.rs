//! Error types for coordinated reads and writes.

use meridian_types::ReplicaId;

/// Errors surfaced to the caller of a coordinated operation.
///
/// A read never returns a value that is known-stale on the responding
/// path: it either returns the reconciled row or fails with one of these.
/// In particular a repair-write shortfall degrades to [`ReadTimeout`]
/// rather than being swallowed, so callers can detect that consistency
/// was not actually achieved.
///
/// [`ReadTimeout`]: ProtocolError::ReadTimeout
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer live replicas exist than the consistency level requires.
    ///
    /// Fatal to the operation; never retried internally.
    #[error("cannot satisfy consistency level: {alive} live replicas, {required} required")]
    NoReplicasAvailable {
        /// Live replicas at selection time.
        alive: usize,
        /// Replicas the consistency level requires.
        required: usize,
    },

    /// A quorum of data responses, or of repair acknowledgments, was not
    /// reached by the deadline.
    #[error("read timed out: received {received} of {required} required responses")]
    ReadTimeout {
        /// Responses (or acks) counted toward the quorum.
        received: usize,
        /// Responses the consistency level requires.
        required: usize,
    },

    /// A direct write did not gather enough acknowledgments by the
    /// deadline.
    #[error("write timed out: received {received} of {required} required acks")]
    WriteTimeout {
        /// Acknowledgments received.
        received: usize,
        /// Acknowledgments the consistency level requires.
        required: usize,
    },

    /// The transport reported a replica as unreachable.
    ///
    /// Recovered locally by speculation (at most one substitution per
    /// phase); surfaced only as part of a subsequent timeout when the
    /// substitution was insufficient.
    #[error("replica {replica} unreachable")]
    ReplicaUnreachable {
        /// The unreachable replica.
        replica: ReplicaId,
    },
}
