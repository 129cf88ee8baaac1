//! Append-only log of graph mutations.
//!
//! The log region is an array of fixed 4096-byte blocks. Each block carries the
//! superblock generation that was active when it was written, so blocks left
//! over from before the last checkpoint are recognised as stale. The tail
//! position is recovered by scanning on-disk occupancy rather than being
//! stored anywhere.
//!
//! Two rules keep the scan boundary stable across restarts:
//!
//! - The block after the tail is overwritten with an empty block of the
//!   current generation at startup and before the tail block takes its first
//!   entry. A block can therefore only be sealed once its successor already
//!   stops the scan, and entries a recovery discarded never become reachable
//!   again.
//! - Once a block holds entries, an append writes the new entry first and the
//!   16-byte header second. The header never straddles a 512-byte sector, so a
//!   crash during either write leaves the previously published entries intact.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::primitives::bytes::{get_u32_le, get_u64_le, put_u32_le, put_u64_le};
use crate::primitives::io::FileIo;
use crate::types::{xor_words, Checksum, GraphError, NodeId, Opcode, Result, XorWords};

use super::layout::{
    StorageLayout, ENTRIES_PER_BLOCK, LOG_BLOCK_HEADER_LEN, LOG_BLOCK_LEN, LOG_ENTRY_LEN,
};
use super::options::{StorageOptions, Synchronous};
use super::superblock::Superblock;

/// One logged mutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogEntry {
    /// Operation to replay.
    pub opcode: Opcode,
    /// First argument; the vertex for node operations.
    pub node_a: NodeId,
    /// Second argument; zero for node operations.
    pub node_b: NodeId,
}

impl LogEntry {
    /// Creates a log entry.
    pub fn new(opcode: Opcode, node_a: NodeId, node_b: NodeId) -> Self {
        Self {
            opcode,
            node_a,
            node_b,
        }
    }

    fn encode_into(&self, dst: &mut [u8]) {
        put_u64_le(&mut dst[0..8], self.node_a.0);
        put_u64_le(&mut dst[8..16], self.node_b.0);
        put_u32_le(&mut dst[16..20], self.opcode.as_u32());
    }

    fn encode(&self) -> [u8; LOG_ENTRY_LEN] {
        let mut buf = [0u8; LOG_ENTRY_LEN];
        self.encode_into(&mut buf);
        buf
    }

    fn decode(src: &[u8]) -> Result<Self> {
        Ok(Self {
            node_a: NodeId(get_u64_le(&src[0..8])),
            node_b: NodeId(get_u64_le(&src[8..16])),
            opcode: Opcode::try_from(get_u32_le(&src[16..20]))?,
        })
    }
}

/// In-memory image of one log block.
///
/// The checksum is the XOR of the words from byte 8 through the last entry.
/// Bytes past the last entry are zero in every block this writer publishes
/// and are not covered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogBlock {
    generation: u32,
    entries: Vec<LogEntry>,
}

impl LogBlock {
    /// Empty block tagged with `generation`.
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            entries: Vec::with_capacity(ENTRIES_PER_BLOCK),
        }
    }

    /// Generation the block was written under.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Entries in application order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry has been written.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true once the block holds its maximum number of entries.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= ENTRIES_PER_BLOCK
    }

    fn push(&mut self, entry: LogEntry) -> Result<()> {
        if self.is_full() {
            return Err(GraphError::Invalid("log block already full"));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Byte offset of entry `i` inside the block.
    fn entry_offset(i: usize) -> usize {
        LOG_BLOCK_HEADER_LEN + i * LOG_ENTRY_LEN
    }

    fn header_fields(&self) -> [u8; 8] {
        let mut fields = [0u8; 8];
        put_u32_le(&mut fields[0..4], self.generation);
        put_u32_le(&mut fields[4..8], self.entries.len() as u32);
        fields
    }

    /// Checksum of the header fields and every entry, streamed without
    /// encoding the whole block.
    pub fn checksum(&self) -> u64 {
        let mut hasher = XorWords::default();
        hasher.update(&self.header_fields());
        for entry in &self.entries {
            hasher.update(&entry.encode());
        }
        hasher.finalize()
    }

    /// Encodes the 16-byte header.
    pub fn encode_header(&self) -> [u8; LOG_BLOCK_HEADER_LEN] {
        let mut buf = [0u8; LOG_BLOCK_HEADER_LEN];
        put_u64_le(&mut buf[0..8], self.checksum());
        buf[8..16].copy_from_slice(&self.header_fields());
        buf
    }

    /// Encodes the full 4096-byte block including its checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; LOG_BLOCK_LEN];
        buf[..LOG_BLOCK_HEADER_LEN].copy_from_slice(&self.encode_header());
        for (i, entry) in self.entries.iter().enumerate() {
            let off = Self::entry_offset(i);
            entry.encode_into(&mut buf[off..off + LOG_ENTRY_LEN]);
        }
        buf
    }

    /// Decodes a block, verifying its entry count and checksum.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < LOG_BLOCK_LEN {
            return Err(GraphError::Corruption("log block truncated"));
        }
        let n_entries = get_u32_le(&src[12..16]) as usize;
        if n_entries > ENTRIES_PER_BLOCK {
            return Err(GraphError::Corruption("log block entry count out of range"));
        }
        let covered = Self::entry_offset(n_entries);
        if get_u64_le(&src[0..8]) != xor_words(&src[8..covered]) {
            return Err(GraphError::Corruption("log block checksum mismatch"));
        }
        let generation = get_u32_le(&src[8..12]);
        let mut entries = Vec::with_capacity(ENTRIES_PER_BLOCK);
        for i in 0..n_entries {
            let off = Self::entry_offset(i);
            entries.push(LogEntry::decode(&src[off..off + LOG_ENTRY_LEN])?);
        }
        Ok(Self {
            generation,
            entries,
        })
    }
}

/// Result of walking the committed part of the log.
#[derive(Clone, Debug)]
pub struct LogScan {
    /// Block new entries must land in.
    pub tail: u32,
    /// Current contents of the tail block.
    pub tail_block: LogBlock,
    /// Committed blocks visited, including a partially filled tail.
    pub blocks: u32,
    /// Committed entries visited.
    pub entries: u64,
}

impl LogScan {
    /// Scan result for a log with nothing committed since `superblock`.
    pub fn empty(superblock: &Superblock) -> Self {
        Self {
            tail: superblock.log_start,
            tail_block: LogBlock::new(superblock.generation),
            blocks: 0,
            entries: 0,
        }
    }
}

/// Walks the log from `superblock.log_start`, handing every committed entry to
/// `visit` in write order.
///
/// The walk ends at the first block that fails its checksum, carries a
/// generation older than the superblock or than its predecessor, holds no
/// entries, or is only partially filled. None of these is an error: a torn or
/// stale block simply marks the end of what was committed.
pub fn scan_log(
    io: &dyn FileIo,
    layout: &StorageLayout,
    superblock: &Superblock,
    mut visit: impl FnMut(&LogEntry) -> Result<()>,
) -> Result<LogScan> {
    let mut index = superblock.log_start;
    let mut last_generation = superblock.generation;
    let mut blocks = 0u32;
    let mut entries = 0u64;
    let mut buf = vec![0u8; LOG_BLOCK_LEN];
    while index < layout.log_blocks() {
        io.read_at_padded(layout.block_offset(index), &mut buf)?;
        let block = match LogBlock::decode(&buf) {
            Ok(block) => block,
            Err(GraphError::Corruption(reason)) => {
                debug!(index, reason, "log scan stopped at invalid block");
                break;
            }
            Err(err) => return Err(err),
        };
        if block.generation < last_generation {
            trace!(
                index,
                block_generation = block.generation,
                last_generation,
                "log scan stopped at stale block"
            );
            break;
        }
        if block.is_empty() {
            break;
        }
        last_generation = block.generation;
        for entry in block.entries() {
            visit(entry)?;
        }
        blocks += 1;
        entries += block.len() as u64;
        if !block.is_full() {
            return Ok(LogScan {
                tail: index,
                tail_block: block,
                blocks,
                entries,
            });
        }
        index += 1;
    }
    Ok(LogScan {
        tail: index,
        tail_block: LogBlock::new(superblock.generation),
        blocks,
        entries,
    })
}

/// Counters describing log activity since the process started.
#[derive(Clone, Debug, Default)]
pub struct LogStats {
    /// Entries appended.
    pub entries_appended: u64,
    /// Block writes issued, headers and single entries included.
    pub blocks_written: u64,
    /// Sync operations performed.
    pub syncs: u64,
}

/// Writer for the log region.
pub struct DurableLog {
    io: Arc<dyn FileIo>,
    layout: StorageLayout,
    synchronous: Synchronous,
    generation: u32,
    tail: u32,
    tail_block: LogBlock,
    stats: LogStats,
}

impl DurableLog {
    /// Opens the log for `superblock`, locating the tail from on-disk occupancy.
    pub fn open(
        io: Arc<dyn FileIo>,
        options: &StorageOptions,
        superblock: &Superblock,
    ) -> Result<Self> {
        let scan = scan_log(io.as_ref(), &options.layout, superblock, |_| Ok(()))?;
        Self::from_scan(io, options, superblock, scan)
    }

    /// Positions the writer at the end of `scan` and terminates the log right
    /// after it, so nothing past the recovered tail can be replayed later.
    pub(crate) fn from_scan(
        io: Arc<dyn FileIo>,
        options: &StorageOptions,
        superblock: &Superblock,
        scan: LogScan,
    ) -> Result<Self> {
        let mut log = Self {
            io,
            layout: options.layout,
            synchronous: options.synchronous,
            generation: superblock.generation,
            tail: scan.tail,
            tail_block: scan.tail_block,
            stats: LogStats::default(),
        };
        if log.write_terminator()? && options.synchronous.sync_checkpoints() {
            log.io.sync_all()?;
            log.stats.syncs += 1;
        }
        Ok(log)
    }

    /// Index of the block the next entry lands in.
    pub fn get_tail(&self) -> u32 {
        self.tail
    }

    /// Generation stamped on newly written blocks.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Entries in the current tail block.
    pub fn tail_entries(&self) -> usize {
        self.tail_block.len()
    }

    /// Returns true when no block is left for further appends.
    pub fn is_full(&self) -> bool {
        self.tail >= self.layout.log_blocks()
    }

    /// Activity counters.
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// Appends one mutation to the tail block on disk.
    ///
    /// Returns [`GraphError::LogFull`] when the region is exhausted; the caller
    /// must checkpoint before appending again.
    pub fn append(&mut self, opcode: Opcode, arg1: NodeId, arg2: NodeId) -> Result<()> {
        if !opcode.is_mutation() {
            return Err(GraphError::Invalid("read operations are not logged"));
        }
        if self.is_full() {
            return Err(GraphError::LogFull);
        }
        let first = self.tail_block.is_empty();
        if first {
            self.write_terminator()?;
            self.sync_append()?;
        }
        self.tail_block.push(LogEntry::new(opcode, arg1, arg2))?;
        let written = if first {
            self.write_tail_block()
        } else {
            self.write_last_entry()
        };
        if let Err(err) = written {
            self.tail_block.entries.pop();
            return Err(err);
        }
        self.stats.entries_appended += 1;
        if self.tail_block.is_full() {
            self.tail += 1;
            self.tail_block = LogBlock::new(self.generation);
            debug!(tail = self.tail, generation = self.generation, "log block sealed");
        }
        Ok(())
    }

    /// Restarts the log after a checkpoint adopted `superblock`.
    pub fn reset(&mut self, superblock: &Superblock) {
        self.generation = superblock.generation;
        self.tail = superblock.log_start;
        self.tail_block = LogBlock::new(superblock.generation);
    }

    /// Writes an empty current-generation block after the tail. Returns false
    /// when the tail is the last block of the region.
    fn write_terminator(&mut self) -> Result<bool> {
        let next = self.tail.saturating_add(1);
        if next >= self.layout.log_blocks() {
            return Ok(false);
        }
        let empty = LogBlock::new(self.generation).encode();
        self.io.write_at(self.layout.block_offset(next), &empty)?;
        self.stats.blocks_written += 1;
        trace!(index = next, generation = self.generation, "log terminator written");
        Ok(true)
    }

    /// First entry of a block: the whole image goes out, clearing whatever an
    /// earlier generation left there.
    fn write_tail_block(&mut self) -> Result<()> {
        let buf = self.tail_block.encode();
        self.io.write_at(self.layout.block_offset(self.tail), &buf)?;
        self.stats.blocks_written += 1;
        self.sync_append()
    }

    /// Later entries: the entry, then the header that publishes it.
    fn write_last_entry(&mut self) -> Result<()> {
        let base = self.layout.block_offset(self.tail);
        let last = self.tail_block.len() - 1;
        let entry = self.tail_block.entries[last].encode();
        self.io
            .write_at(base + LogBlock::entry_offset(last) as u64, &entry)?;
        self.sync_append()?;
        self.io.write_at(base, &self.tail_block.encode_header())?;
        self.stats.blocks_written += 1;
        self.sync_append()
    }

    fn sync_append(&mut self) -> Result<()> {
        if self.synchronous.sync_appends() {
            self.io.sync_all()?;
            self.stats.syncs += 1;
        }
        Ok(())
    }
}
