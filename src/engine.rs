//! The per-partition storage context.
//!
//! [`Engine`] owns the graph index, the log and the checkpoint store behind one
//! lock. Every mutation goes through [`EngineState`], which appends to the log
//! before changing the index, and only logs mutations that change something.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::graph::{EdgeOutcome, GraphIndex, PathFinder};
use crate::primitives::io::FileIo;
use crate::storage::{
    self, make_checkpoint, CheckpointStore, DurableLog, Recovered, RecoveryReport,
    StorageOptions, Superblock,
};
use crate::types::{GraphError, NodeId, Opcode, Result};

/// Point-in-time counters for one partition.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EngineStats {
    /// Vertices present, mirrors included.
    pub nodes: u64,
    /// Undirected edges present.
    pub edges: u64,
    /// Current checkpoint generation.
    pub generation: u32,
    /// Block the next log entry lands in.
    pub log_tail: u32,
    /// Entries appended since startup.
    pub entries_appended: u64,
    /// Checkpoints written since startup.
    pub checkpoints_written: u64,
}

/// Graph state and its durable backing, guarded by the engine lock.
pub struct EngineState {
    index: GraphIndex,
    log: DurableLog,
    checkpoints: CheckpointStore,
}

/// Lock over one partition's [`EngineState`].
pub struct Engine {
    state: Mutex<EngineState>,
}

impl Engine {
    /// Wraps state produced by recovery.
    pub fn new(recovered: Recovered) -> Self {
        Self {
            state: Mutex::new(EngineState {
                index: recovered.index,
                log: recovered.log,
                checkpoints: recovered.checkpoints,
            }),
        }
    }

    /// Recovers `io`, formatting it first when it is empty.
    pub fn open(io: Arc<dyn FileIo>, options: &StorageOptions) -> Result<(Self, RecoveryReport)> {
        let recovered = storage::open_or_format(io, options)?;
        let report = recovered.report.clone();
        Ok((Self::new(recovered), report))
    }

    /// Reinitialises `io` to an empty graph.
    pub fn format(io: Arc<dyn FileIo>, options: &StorageOptions) -> Result<(Self, RecoveryReport)> {
        let recovered = storage::format(io, options)?;
        let report = recovered.report.clone();
        Ok((Self::new(recovered), report))
    }

    /// Enters the critical section. The guard releases it on drop.
    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    /// Checkpoints under the lock.
    pub fn checkpoint(&self) -> Result<Superblock> {
        self.lock().checkpoint()
    }

    /// Counters under the lock.
    pub fn stats(&self) -> EngineStats {
        self.lock().stats()
    }
}

impl EngineState {
    /// Read-only view of the graph.
    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    /// Adds a vertex. `Ok(false)` if it already existed.
    pub fn add_vertex(&mut self, id: NodeId) -> Result<bool> {
        if self.index.vertex_exists(id) {
            return Ok(false);
        }
        self.append(Opcode::AddNode, id, NodeId(0))?;
        Ok(self.index.add_vertex(id))
    }

    /// Removes a vertex and its edges. `Ok(false)` if it was absent.
    pub fn remove_vertex(&mut self, id: NodeId) -> Result<bool> {
        if !self.index.vertex_exists(id) {
            return Ok(false);
        }
        self.append(Opcode::RemoveNode, id, NodeId(0))?;
        Ok(self.index.remove_vertex(id))
    }

    /// Adds an edge between two present vertices.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId) -> Result<EdgeOutcome> {
        if a == b || !self.index.vertex_exists(a) || !self.index.vertex_exists(b) {
            return Ok(EdgeOutcome::Invalid);
        }
        if self.index.edge_exists(a, b) {
            return Ok(EdgeOutcome::AlreadyExists);
        }
        self.append(Opcode::AddEdge, a, b)?;
        Ok(self.index.add_edge(a, b))
    }

    /// Removes an edge. `Ok(false)` if it was absent.
    pub fn remove_edge(&mut self, a: NodeId, b: NodeId) -> Result<bool> {
        if !self.index.edge_exists(a, b) {
            return Ok(false);
        }
        self.append(Opcode::RemoveEdge, a, b)?;
        Ok(self.index.remove_edge(a, b))
    }

    /// Returns true if `id` is present.
    pub fn vertex_exists(&self, id: NodeId) -> bool {
        self.index.vertex_exists(id)
    }

    /// Returns true if both directions of `(a, b)` are present.
    pub fn edge_exists(&self, a: NodeId, b: NodeId) -> bool {
        self.index.edge_exists(a, b)
    }

    /// Neighbors of `id`, most recent first.
    pub fn neighbors(&self, id: NodeId) -> Option<Vec<NodeId>> {
        self.index.neighbors(id).map(Iterator::collect)
    }

    /// Hop count between two vertices.
    pub fn shortest_path(&self, a: NodeId, b: NodeId) -> Option<u32> {
        PathFinder::new(&self.index).shortest_path(a, b)
    }

    /// Snapshots the graph, adopts the next generation and empties the log.
    pub fn checkpoint(&mut self) -> Result<Superblock> {
        let snapshot = make_checkpoint(&self.index);
        let written = self.checkpoints.write_checkpoint(&snapshot);
        // A failed checkpoint can still have moved the generation on disk.
        let adopted = self.checkpoints.superblock();
        if adopted.generation != self.log.generation() {
            self.log.reset(&adopted);
        }
        written
    }

    /// Current counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            nodes: self.index.len(),
            edges: self.index.edge_count(),
            generation: self.checkpoints.generation(),
            log_tail: self.log.get_tail(),
            entries_appended: self.log.stats().entries_appended,
            checkpoints_written: self.checkpoints.checkpoints_written(),
        }
    }

    fn append(&mut self, opcode: Opcode, a: NodeId, b: NodeId) -> Result<()> {
        if self.checkpoints.is_unsettled() {
            return Err(GraphError::Unsettled);
        }
        match self.log.append(opcode, a, b) {
            Err(GraphError::LogFull) => {
                warn!(tail = self.log.get_tail(), "log full, forcing checkpoint");
                self.checkpoint()?;
                self.log.append(opcode, a, b)
            }
            other => {
                debug!(?opcode, %a, %b, "logged");
                other
            }
        }
    }
}
