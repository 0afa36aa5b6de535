//! # meridian-sim: deterministic cluster simulation
//!
//! Runs the Meridian read path against simulated replicas under a
//! discrete-event harness: a controlled clock, a seeded RNG for message
//! delays and chance rolls, in-memory replica stores with tombstone
//! grace periods, and per-replica fault injection. Every run with the
//! same seed and scenario produces the same message interleaving, the
//! same repairs, and the same metrics.
//!
//! ## Components
//!
//! - [`SimCluster`]: replicas, network, and coordinator in one harness
//! - [`SimClock`]: nanosecond time that advances only when told to
//! - [`SimRng`]: seeded randomness for delays
//! - [`MemoryStore`]: one replica's cells, tombstones, and compaction
//! - [`FaultInjector`]: selective deafness per replica and request class
//!
//! ## Example
//!
//! ```
//! use meridian_sim::{ClusterConfig, SimCluster};
//! use meridian_coordinator::TableParams;
//! use meridian_types::{ColumnSet, ConsistencyLevel, Key, TableName};
//!
//! let mut cluster = SimCluster::new(ClusterConfig::default());
//! let table = TableName::new("ks.users");
//! let key = Key::from_u64(1);
//!
//! cluster
//!     .write_cell(&table, &key, "v", "hello", 10, ConsistencyLevel::All)
//!     .unwrap();
//! let result = cluster
//!     .read(
//!         &table,
//!         &key,
//!         ColumnSet::All,
//!         ConsistencyLevel::Quorum,
//!         TableParams::none(),
//!     )
//!     .unwrap();
//! assert_eq!(result.row.cell(&"v".into()).unwrap().value, &b"hello"[..]);
//! ```

pub mod clock;
pub mod cluster;
pub mod fault;
pub mod rng;
pub mod store;

pub use clock::{ms_to_ns, sec_to_ns, SimClock};
pub use cluster::{ClusterConfig, SimCluster};
pub use fault::{FaultInjector, ReplicaFaults};
pub use rng::SimRng;
pub use store::{MemoryStore, DEFAULT_GC_GRACE_MICROS};
