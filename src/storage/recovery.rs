//! Formatting and crash recovery.

use std::sync::Arc;

use tracing::{info, trace, warn};

use crate::graph::GraphIndex;
use crate::primitives::io::FileIo;
use crate::types::{GraphError, Opcode, Result};

use super::checkpoint::{buildmap, CheckpointStore};
use super::log::{scan_log, DurableLog, LogEntry, LogScan};
use super::options::StorageOptions;
use super::superblock::Superblock;

/// What startup found on disk.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RecoveryReport {
    /// True when the storage was initialised rather than recovered.
    pub formatted: bool,
    /// Generation named by the superblock.
    pub generation: u32,
    /// Vertices loaded from the checkpoint.
    pub checkpoint_nodes: u64,
    /// Edges loaded from the checkpoint.
    pub checkpoint_edges: u64,
    /// Log blocks replayed on top of the checkpoint.
    pub blocks_replayed: u32,
    /// Log entries replayed on top of the checkpoint.
    pub entries_replayed: u64,
    /// Block the next append lands in.
    pub tail: u32,
}

/// Storage state handed to the engine once startup completes.
pub struct Recovered {
    /// Rebuilt graph.
    pub index: GraphIndex,
    /// Log positioned at its tail.
    pub log: DurableLog,
    /// Checkpoint store at the recovered generation.
    pub checkpoints: CheckpointStore,
    /// Summary of what happened.
    pub report: RecoveryReport,
}

/// Reinitialises storage to an empty graph at generation zero.
///
/// The file is cut to zero length and re-extended, so no block from an earlier
/// life of the file can be mistaken for a generation-zero block.
pub fn format(io: Arc<dyn FileIo>, options: &StorageOptions) -> Result<Recovered> {
    let layout = options.layout;
    io.truncate(0)?;
    io.truncate(layout.total_len())?;
    let superblock = Superblock::new(0);
    let checkpoints = CheckpointStore::new(io.clone(), *options, superblock);
    checkpoints.clear()?;
    superblock.write(io.as_ref(), options.synchronous.sync_checkpoints())?;
    let log = DurableLog::from_scan(io, options, &superblock, LogScan::empty(&superblock))?;
    info!(
        log_blocks = layout.log_blocks(),
        checkpoint_slot_bytes = layout.checkpoint_slot_bytes(),
        "storage formatted"
    );
    Ok(Recovered {
        index: GraphIndex::new(),
        log,
        checkpoints,
        report: RecoveryReport {
            formatted: true,
            ..RecoveryReport::default()
        },
    })
}

/// Validates the superblock, loads its checkpoint and replays the log.
///
/// An invalid superblock or checkpoint is fatal. A torn or stale log block
/// only ends replay.
pub fn normal_startup(io: Arc<dyn FileIo>, options: &StorageOptions) -> Result<Recovered> {
    let layout = options.layout;
    if io.len()? < layout.total_len() {
        return Err(GraphError::Corruption(
            "storage file is shorter than the configured layout",
        ));
    }
    let superblock = Superblock::read(io.as_ref())?;
    let checkpoints = CheckpointStore::new(io.clone(), *options, superblock);
    let snapshot = checkpoints.load_checkpoint()?;
    let mut index = buildmap(&snapshot)?;
    let scan = scan_log(io.as_ref(), &layout, &superblock, |entry| {
        replay_entry(&mut index, entry);
        Ok(())
    })?;
    let report = RecoveryReport {
        formatted: false,
        generation: superblock.generation,
        checkpoint_nodes: snapshot.nsize(),
        checkpoint_edges: snapshot.esize(),
        blocks_replayed: scan.blocks,
        entries_replayed: scan.entries,
        tail: scan.tail,
    };
    let log = DurableLog::from_scan(io, options, &superblock, scan)?;
    info!(
        generation = report.generation,
        checkpoint_nodes = report.checkpoint_nodes,
        checkpoint_edges = report.checkpoint_edges,
        entries_replayed = report.entries_replayed,
        tail = report.tail,
        nodes = index.len(),
        edges = index.edge_count(),
        "storage recovered"
    );
    Ok(Recovered {
        index,
        log,
        checkpoints,
        report,
    })
}

/// Formats empty storage, otherwise recovers it.
pub fn open_or_format(io: Arc<dyn FileIo>, options: &StorageOptions) -> Result<Recovered> {
    if io.is_empty()? {
        info!("storage file is empty, formatting");
        return format(io, options);
    }
    normal_startup(io, options)
}

/// Applies one logged mutation. Mutations are idempotent, so replaying an
/// entry whose effect is already present changes nothing.
fn replay_entry(index: &mut GraphIndex, entry: &LogEntry) {
    match entry.opcode {
        Opcode::AddNode => {
            index.add_vertex(entry.node_a);
        }
        Opcode::AddEdge => {
            index.add_edge(entry.node_a, entry.node_b);
        }
        Opcode::RemoveNode => {
            index.remove_vertex(entry.node_a);
        }
        Opcode::RemoveEdge => {
            index.remove_edge(entry.node_a, entry.node_b);
        }
        Opcode::GetNode => {
            warn!(node = %entry.node_a, "read operation found in log, skipped");
            return;
        }
    }
    trace!(opcode = ?entry.opcode, a = %entry.node_a, b = %entry.node_b, "replayed");
}
