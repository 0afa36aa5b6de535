//! # meridian-coordinator: quorum reads with read repair
//!
//! This crate implements the coordination side of Meridian's read path:
//! quorum reads over replicated rows, digest-based divergence detection,
//! and the repair writes that converge stale replicas as a side effect
//! of reading.
//!
//! ## Overview
//!
//! A coordinated read provides:
//! - **Monotonic results**: the answer reflects the newest cell per
//!   column among the replicas that responded.
//! - **Convergence**: replicas observed to be stale receive the winning
//!   content before (blocking) or after (background) the client answer.
//! - **Bounded fan-out**: only the consistency level's worth of replicas
//!   is contacted unless chance knobs or speculation widen the read.
//!
//! ## Architecture
//!
//! ```text
//! Client Read
//!       │
//!       ▼
//! ┌──────────────────┐   data + digest requests
//! │ ReadCoordinator  │ ─────────────────────────▶ replicas
//! └────────┬─────────┘
//!          │ digest mismatch
//!          ▼
//! ┌──────────────────┐   full-data requests
//! │   data round     │ ─────────────────────────▶ divergent replicas
//! └────────┬─────────┘
//!          │ reconcile + diff
//!          ▼
//! ┌──────────────────┐   repair mutations
//! │   RepairWriter   │ ─────────────────────────▶ stale replicas
//! └──────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`coordinator`]: the pure per-read state machine
//! - [`reconcile`]: row merging and repair-directive planning
//! - [`selector`]: replica ranking and liveness enforcement
//! - [`transport`]: fire-and-forget message delivery seam
//! - [`metrics`]: repair and speculation counters
//!
//! ## Design Principles
//!
//! 1. **Functional Core / Imperative Shell**: coordinators are pure
//!    state machines fed events and explicit time, enabling
//!    deterministic simulation of every fault interleaving.
//!
//! 2. **Repair what was read**: repair mutations never carry columns
//!    outside the read's projection, and purge-eligible deletions are
//!    never resurrected onto replicas that compacted them away.
//!
//! 3. **Quorum, not unanimity**: a repaired read succeeds once replicas
//!    agreeing with the winning row plus repair acknowledgments reach
//!    the read's consistency level.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod metrics;
pub mod placement;
pub mod reconcile;
pub mod repair;
pub mod response;
pub mod selector;
pub mod storage;
pub mod trace;
pub mod transport;
pub mod write;

pub use config::{SpeculativeRetry, TableParams, Timeouts};
pub use coordinator::{
    plan_read, roll_chance, ChanceOutcome, CoordinatorEvent, CoordinatorOutput, ReadCoordinator,
    ReadPlan, ReadResult, RepairMode,
};
pub use error::ProtocolError;
pub use message::{
    Message, MessagePayload, Mutation, ReadId, ReadPayload, ReadRequest, ReadResponse,
    RepairWrite, RequestKind, WriteId, WriteRequest,
};
pub use metrics::{MetricsSnapshot, ReadRepairMetrics};
pub use placement::{Placement, ReplicaDescriptor, ReplicaSet, StaticPlacement};
pub use reconcile::{plan_repairs, reconcile, RepairDirective, RepairPlan};
pub use repair::RepairWriter;
pub use response::{ReplicaResponse, ResponseSet};
pub use selector::{FixedOrderRanking, LatencyRanking, ReplicaRanking, ReplicaSelector};
pub use storage::ReplicaStore;
pub use trace::{ReadEvent, ReadTrace};
pub use transport::{MessageSink, Transport};
pub use write::{WriteCoordinator, WriteEvent, WriteOutput};
