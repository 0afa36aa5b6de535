//! # meridian-types: Core Types for Meridian
//!
//! This crate defines the value-level vocabulary shared by the Meridian
//! quorum-read coordinator and its simulation harness:
//!
//! - [`ReplicaId`], [`DatacenterId`] - replica identity and placement
//! - [`Key`], [`TableName`] - data addressing
//! - [`ColumnName`], [`ColumnSet`] - the column projection of a read
//! - [`ConsistencyLevel`] - acknowledgment requirements for an operation
//! - [`Row`], [`Cell`], [`Tombstone`], [`Digest`] - the row model replicas
//!   exchange and the compact hash used to detect divergence
//!
//! Everything here is plain data: no I/O, no clocks, no protocol state.
//! The protocol lives in `meridian-coordinator`.

mod column;
mod consistency;
mod ident;
mod row;

pub use column::{ColumnName, ColumnSet};
pub use consistency::{quorum_size, ConsistencyLevel};
pub use ident::{DatacenterId, Key, ReplicaId, TableName, MAX_REPLICAS};
pub use row::{Cell, Digest, Row, Timestamp, Tombstone};
