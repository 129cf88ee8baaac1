use crate::primitives::bytes::{get_u32_le, get_u64_le, put_u32_le, put_u64_le};
use crate::primitives::io::FileIo;
use crate::types::{xor_words, GraphError, Result};

use super::layout::SUPERBLOCK_LEN;

/// Fixed header at offset zero naming the active generation and log extent.
///
/// Encoded as `{checksum: u64, generation: u32, log_start: u32, log_size: u32}`.
/// The checksum is the XOR of the little-endian words of bytes `8..20`, the
/// last word zero-padded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Superblock {
    /// Generation of the checkpoint this superblock adopts.
    pub generation: u32,
    /// Index of the first log block belonging to this generation.
    pub log_start: u32,
    /// Log blocks known committed when the superblock was written.
    pub log_size: u32,
}

impl Superblock {
    /// Superblock for `generation` with an empty log.
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            log_start: 0,
            log_size: 0,
        }
    }

    /// Successor written by a checkpoint: next generation, log reset to empty.
    pub fn next_generation(&self) -> Result<Self> {
        let generation = self
            .generation
            .checked_add(1)
            .ok_or(GraphError::Invalid("generation counter exhausted"))?;
        Ok(Self::new(generation))
    }

    /// Checksum over every field except the checksum itself.
    pub fn checksum(&self) -> u64 {
        let buf = self.encode();
        xor_words(&buf[8..])
    }

    /// Encodes the superblock with its checksum filled in.
    pub fn encode(&self) -> [u8; SUPERBLOCK_LEN] {
        let mut buf = [0u8; SUPERBLOCK_LEN];
        put_u32_le(&mut buf[8..12], self.generation);
        put_u32_le(&mut buf[12..16], self.log_start);
        put_u32_le(&mut buf[16..20], self.log_size);
        let checksum = xor_words(&buf[8..]);
        put_u64_le(&mut buf[0..8], checksum);
        buf
    }

    /// Decodes and validates a superblock.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < SUPERBLOCK_LEN {
            return Err(GraphError::Corruption("superblock truncated"));
        }
        let stored = get_u64_le(&src[0..8]);
        if stored != xor_words(&src[8..SUPERBLOCK_LEN]) {
            return Err(GraphError::Corruption("superblock checksum mismatch"));
        }
        Ok(Self {
            generation: get_u32_le(&src[8..12]),
            log_start: get_u32_le(&src[12..16]),
            log_size: get_u32_le(&src[16..20]),
        })
    }

    /// Reads the superblock from offset zero.
    pub fn read(io: &dyn FileIo) -> Result<Self> {
        if io.len()? < SUPERBLOCK_LEN as u64 {
            return Err(GraphError::Corruption("superblock truncated"));
        }
        let mut buf = [0u8; SUPERBLOCK_LEN];
        io.read_at(0, &mut buf)?;
        Self::decode(&buf)
    }

    /// Writes the superblock to offset zero, syncing when asked.
    pub fn write(&self, io: &dyn FileIo, sync: bool) -> Result<()> {
        io.write_at(0, &self.encode())?;
        if sync {
            io.sync_all()?;
        }
        Ok(())
    }
}
