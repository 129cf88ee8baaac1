//! A graph store split across three cooperating partitions.
//!
//! Each partition keeps an undirected graph in memory and makes it durable with
//! a write-ahead log and alternating checkpoints in a single storage file. Edges
//! whose endpoints live on different partitions are kept on both sides through
//! a small RPC protocol between peers.
//!
//! The layers, bottom up:
//!
//! - [`primitives`] and [`types`]: byte encoding, positioned file I/O, ids and errors.
//! - [`storage`]: superblock, log, checkpoints and startup recovery.
//! - [`graph`]: the adjacency index and breadth-first shortest path.
//! - [`engine`]: one lock over the index and its durable backing.
//! - [`partition`]: ownership of ids and the cross-partition protocol.
//! - [`server`]: the HTTP client API and the peer RPC listener.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod graph;
pub mod logging;
pub mod partition;
pub mod primitives;
pub mod server;
pub mod storage;
pub mod types;

pub use engine::{Engine, EngineStats};
pub use partition::{PartitionCoordinator, PartitionMap};
pub use types::{GraphError, NodeId, PartitionId, Result};
