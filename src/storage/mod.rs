//! Durable storage for one partition.
//!
//! A single file holds the superblock, the mutation log and two checkpoint
//! slots. Mutations are appended to the log before they touch memory; a
//! checkpoint snapshots the graph, bumps the generation and empties the log.

/// Snapshot capture, persistence and rebuild.
pub mod checkpoint;

/// Region sizes and offsets.
pub mod layout;

/// Append-only mutation log.
pub mod log;

/// Formatting and startup recovery.
pub mod recovery;

mod options;
mod superblock;

pub use checkpoint::{buildmap, make_checkpoint, CheckpointStore, Snapshot};
pub use layout::StorageLayout;
pub use log::{DurableLog, LogBlock, LogEntry, LogStats};
pub use options::{StorageOptions, Synchronous};
pub use recovery::{format, normal_startup, open_or_format, Recovered, RecoveryReport};
pub use superblock::Superblock;
