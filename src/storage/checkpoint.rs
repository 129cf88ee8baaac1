//! Full snapshots of the graph index.
//!
//! A checkpoint for generation `g` lives in slot `g % 2`. The payload is
//! written and synced before the superblock naming `g` is written, so a crash
//! in between leaves the previous generation and its slot untouched.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::graph::{EdgeOutcome, GraphIndex};
use crate::primitives::bytes::{get_u64_le, put_u64_le};
use crate::primitives::io::FileIo;
use crate::types::{GraphError, NodeId, Result};

use super::layout::{
    StorageLayout, CHECKPOINT_EDGE_LEN, CHECKPOINT_HEADER_LEN, CHECKPOINT_NODE_LEN,
};
use super::options::StorageOptions;
use super::superblock::Superblock;

/// Vertex and edge lists captured from a [`GraphIndex`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    /// Every vertex id.
    pub nodes: Vec<NodeId>,
    /// Every undirected edge once.
    pub edges: Vec<(NodeId, NodeId)>,
}

impl Snapshot {
    /// Vertex count.
    pub fn nsize(&self) -> u64 {
        self.nodes.len() as u64
    }

    /// Edge count.
    pub fn esize(&self) -> u64 {
        self.edges.len() as u64
    }

    /// `{nsize, esize, node_id[nsize], (a, b)[esize]}`.
    pub fn encode(&self) -> Vec<u8> {
        let len = CHECKPOINT_HEADER_LEN
            + self.nodes.len() * CHECKPOINT_NODE_LEN
            + self.edges.len() * CHECKPOINT_EDGE_LEN;
        let mut buf = vec![0u8; len];
        put_u64_le(&mut buf[0..8], self.nsize());
        put_u64_le(&mut buf[8..16], self.esize());
        let mut off = CHECKPOINT_HEADER_LEN;
        for node in &self.nodes {
            put_u64_le(&mut buf[off..], node.0);
            off += CHECKPOINT_NODE_LEN;
        }
        for (a, b) in &self.edges {
            put_u64_le(&mut buf[off..], a.0);
            put_u64_le(&mut buf[off + 8..], b.0);
            off += CHECKPOINT_EDGE_LEN;
        }
        buf
    }

    fn decode_body(nsize: u64, esize: u64, body: &[u8]) -> Self {
        let nodes_len = nsize as usize * CHECKPOINT_NODE_LEN;
        let nodes = body[..nodes_len]
            .chunks_exact(CHECKPOINT_NODE_LEN)
            .map(|chunk| NodeId(get_u64_le(chunk)))
            .collect();
        let edges = body[nodes_len..nodes_len + esize as usize * CHECKPOINT_EDGE_LEN]
            .chunks_exact(CHECKPOINT_EDGE_LEN)
            .map(|chunk| (NodeId(get_u64_le(chunk)), NodeId(get_u64_le(&chunk[8..]))))
            .collect();
        Self { nodes, edges }
    }
}

/// Walks `index` once and captures its vertices and edges.
pub fn make_checkpoint(index: &GraphIndex) -> Snapshot {
    Snapshot {
        nodes: index.vertex_ids().collect(),
        edges: index.edges().collect(),
    }
}

/// Rebuilds a [`GraphIndex`] from a snapshot, rejecting structurally invalid
/// content.
pub fn buildmap(snapshot: &Snapshot) -> Result<GraphIndex> {
    let mut index = GraphIndex::new();
    for node in &snapshot.nodes {
        if !index.add_vertex(*node) {
            return Err(GraphError::Corruption("checkpoint lists a vertex twice"));
        }
    }
    for (a, b) in &snapshot.edges {
        match index.add_edge(*a, *b) {
            EdgeOutcome::Created => {}
            EdgeOutcome::AlreadyExists => {
                return Err(GraphError::Corruption("checkpoint lists an edge twice"))
            }
            EdgeOutcome::Invalid => {
                return Err(GraphError::Corruption(
                    "checkpoint edge has a missing endpoint or is a self-loop",
                ))
            }
        }
    }
    Ok(index)
}

/// Reads and writes checkpoint slots and advances the superblock.
pub struct CheckpointStore {
    io: Arc<dyn FileIo>,
    options: StorageOptions,
    superblock: Superblock,
    written: u64,
    unsettled: bool,
}

impl CheckpointStore {
    /// Store positioned at the generation named by `superblock`.
    pub fn new(io: Arc<dyn FileIo>, options: StorageOptions, superblock: Superblock) -> Self {
        Self {
            io,
            options,
            superblock,
            written: 0,
            unsettled: false,
        }
    }

    /// Superblock currently in effect.
    pub fn superblock(&self) -> Superblock {
        self.superblock
    }

    /// Generation currently in effect.
    pub fn generation(&self) -> u32 {
        self.superblock.generation
    }

    /// Checkpoints written by this process.
    pub fn checkpoints_written(&self) -> u64 {
        self.written
    }

    /// True after a failed superblock write left the on-disk generation
    /// unreadable. Cleared by the next successful checkpoint.
    pub fn is_unsettled(&self) -> bool {
        self.unsettled
    }

    /// Persists `snapshot` as the next generation and adopts it.
    ///
    /// If the payload write fails, the previous generation stays in effect.
    /// If the superblock write fails, the store adopts whatever generation the
    /// file now names, so callers must compare [`CheckpointStore::generation`]
    /// with their own afterwards whether or not this returned an error.
    pub fn write_checkpoint(&mut self, snapshot: &Snapshot) -> Result<Superblock> {
        let next = self.superblock.next_generation()?;
        let layout = self.options.layout;
        if !layout.fits_checkpoint(snapshot.nsize(), snapshot.esize()) {
            return Err(GraphError::Invalid("snapshot exceeds checkpoint slot capacity"));
        }
        let sync = self.options.synchronous.sync_checkpoints();
        let offset = layout.checkpoint_offset(StorageLayout::slot_for(next.generation));
        self.io.write_at(offset, &snapshot.encode())?;
        if sync {
            self.io.sync_all()?;
        }
        if let Err(err) = next.write(self.io.as_ref(), sync) {
            self.settle_failed_publish(next);
            return Err(err);
        }
        self.adopt(next);
        info!(
            generation = next.generation,
            nodes = snapshot.nsize(),
            edges = snapshot.esize(),
            "checkpoint written"
        );
        Ok(next)
    }

    fn adopt(&mut self, superblock: Superblock) {
        self.superblock = superblock;
        self.written += 1;
        self.unsettled = false;
    }

    /// The superblock write may have reached the file before failing, so the
    /// file is the authority on which generation is now in effect.
    fn settle_failed_publish(&mut self, next: Superblock) {
        match Superblock::read(self.io.as_ref()) {
            Ok(on_disk) if on_disk == next => {
                warn!(
                    generation = next.generation,
                    "superblock reached the file before its write failed, adopting it"
                );
                self.adopt(next);
            }
            Ok(on_disk) if on_disk == self.superblock => {}
            Ok(_) | Err(_) => {
                error!(
                    generation = self.superblock.generation,
                    "superblock unreadable after failed checkpoint, refusing appends"
                );
                self.unsettled = true;
            }
        }
    }

    /// Reads the snapshot belonging to the current generation.
    pub fn load_checkpoint(&self) -> Result<Snapshot> {
        let layout = self.options.layout;
        let offset = layout.checkpoint_offset(StorageLayout::slot_for(self.superblock.generation));
        let mut header = [0u8; CHECKPOINT_HEADER_LEN];
        self.io.read_at(offset, &mut header)?;
        let nsize = get_u64_le(&header[0..8]);
        let esize = get_u64_le(&header[8..16]);
        if !layout.fits_checkpoint(nsize, esize) {
            return Err(GraphError::Corruption("checkpoint counts exceed slot capacity"));
        }
        let body_len = (nsize * CHECKPOINT_NODE_LEN as u64 + esize * CHECKPOINT_EDGE_LEN as u64) as usize;
        let mut body = vec![0u8; body_len];
        self.io.read_at(offset + CHECKPOINT_HEADER_LEN as u64, &mut body)?;
        Ok(Snapshot::decode_body(nsize, esize, &body))
    }

    /// Zeroes both slot headers so each reads back as an empty snapshot.
    pub fn clear(&self) -> Result<()> {
        let layout = self.options.layout;
        let empty = [0u8; CHECKPOINT_HEADER_LEN];
        for slot in 0..2 {
            self.io.write_at(layout.checkpoint_offset(slot), &empty)?;
        }
        Ok(())
    }
}
