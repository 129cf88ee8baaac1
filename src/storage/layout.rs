//! Byte layout of the storage file.
//!
//! ```text
//! [superblock: 20 B][log: log_blocks x 4096 B][checkpoint slot 0][checkpoint slot 1]
//! ```

use crate::types::{GraphError, Result};

/// Size of the superblock at offset zero.
pub const SUPERBLOCK_LEN: usize = 20;
/// Size of one log entry block.
pub const LOG_BLOCK_LEN: usize = 4096;
/// `{checksum: u64, generation: u32, n_entries: u32}`.
pub const LOG_BLOCK_HEADER_LEN: usize = 16;
/// `{node_a_id: u64, node_b_id: u64, opcode: u32}`.
pub const LOG_ENTRY_LEN: usize = 20;
/// (4096 - 16) / 20.
pub const ENTRIES_PER_BLOCK: usize = (LOG_BLOCK_LEN - LOG_BLOCK_HEADER_LEN) / LOG_ENTRY_LEN;
/// Number of log blocks that fit a 2 GiB log region.
pub const DEFAULT_LOG_BLOCKS: u32 = ((2u64 << 30) - SUPERBLOCK_LEN as u64) as u32 / LOG_BLOCK_LEN as u32;
/// `{nsize: u64, esize: u64}`.
pub const CHECKPOINT_HEADER_LEN: usize = 16;
/// One node id in the checkpoint node array.
pub const CHECKPOINT_NODE_LEN: usize = 8;
/// One `(a, b)` pair in the checkpoint edge array.
pub const CHECKPOINT_EDGE_LEN: usize = 16;
/// Each of the two checkpoint slots gets half of an 8 GiB checkpoint area.
pub const DEFAULT_CHECKPOINT_SLOT_BYTES: u64 = 4 << 30;

/// Sizes of the log and checkpoint regions; everything else is derived.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageLayout {
    log_blocks: u32,
    checkpoint_slot_bytes: u64,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            log_blocks: DEFAULT_LOG_BLOCKS,
            checkpoint_slot_bytes: DEFAULT_CHECKPOINT_SLOT_BYTES,
        }
    }
}

impl StorageLayout {
    /// Builds a layout, rejecting regions too small to hold anything.
    pub fn new(log_blocks: u32, checkpoint_slot_bytes: u64) -> Result<Self> {
        if log_blocks == 0 {
            return Err(GraphError::Invalid("log must hold at least one block"));
        }
        if checkpoint_slot_bytes < CHECKPOINT_HEADER_LEN as u64 {
            return Err(GraphError::Invalid(
                "checkpoint slot smaller than its header",
            ));
        }
        Ok(Self {
            log_blocks,
            checkpoint_slot_bytes,
        })
    }

    /// Capacity of the log in blocks.
    pub fn log_blocks(&self) -> u32 {
        self.log_blocks
    }

    /// Capacity of one checkpoint slot in bytes.
    pub fn checkpoint_slot_bytes(&self) -> u64 {
        self.checkpoint_slot_bytes
    }

    /// File offset of log block `index`.
    pub fn block_offset(&self, index: u32) -> u64 {
        SUPERBLOCK_LEN as u64 + u64::from(index) * LOG_BLOCK_LEN as u64
    }

    /// File offset of checkpoint slot `slot` (0 or 1).
    pub fn checkpoint_offset(&self, slot: usize) -> u64 {
        self.block_offset(self.log_blocks) + slot as u64 * self.checkpoint_slot_bytes
    }

    /// Slot that holds the checkpoint for `generation`.
    pub fn slot_for(generation: u32) -> usize {
        (generation % 2) as usize
    }

    /// Bytes a checkpoint with `nsize` nodes and `esize` edges occupies.
    pub fn checkpoint_len(nsize: u64, esize: u64) -> Option<u64> {
        let nodes = nsize.checked_mul(CHECKPOINT_NODE_LEN as u64)?;
        let edges = esize.checked_mul(CHECKPOINT_EDGE_LEN as u64)?;
        (CHECKPOINT_HEADER_LEN as u64)
            .checked_add(nodes)?
            .checked_add(edges)
    }

    /// Whether a checkpoint of the given shape fits one slot.
    pub fn fits_checkpoint(&self, nsize: u64, esize: u64) -> bool {
        Self::checkpoint_len(nsize, esize).is_some_and(|len| len <= self.checkpoint_slot_bytes)
    }

    /// Total length of a fully extended storage file.
    pub fn total_len(&self) -> u64 {
        self.checkpoint_offset(2)
    }
}
