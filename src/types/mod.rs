#![forbid(unsafe_code)]

//! Identifiers, log opcodes and the crate-wide error type.

mod checksum;

pub use checksum::{xor_words, Checksum, XorWords};

use std::fmt;

/// Identifier of a vertex. Unique across all three partitions.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeId(pub u64);

/// One of the three partitions, numbered 1 through 3.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PartitionId(pub u8);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

impl From<NodeId> for u64 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

/// Operation codes shared by the durable log and the peer RPC surface.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Opcode {
    /// Insert a vertex.
    AddNode = 0,
    /// Insert an undirected edge.
    AddEdge = 1,
    /// Delete a vertex and its incident edges.
    RemoveNode = 2,
    /// Delete an undirected edge.
    RemoveEdge = 3,
    /// Existence probe. Never written to the log.
    GetNode = 4,
}

impl Opcode {
    /// Wire value of the opcode.
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether the opcode changes graph state and therefore belongs in the log.
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Opcode::GetNode)
    }
}

impl TryFrom<u32> for Opcode {
    type Error = GraphError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Opcode::AddNode),
            1 => Ok(Opcode::AddEdge),
            2 => Ok(Opcode::RemoveNode),
            3 => Ok(Opcode::RemoveEdge),
            4 => Ok(Opcode::GetNode),
            _ => Err(GraphError::Corruption("unknown log opcode")),
        }
    }
}

/// Errors produced by the storage engine, the graph index and the partition protocol.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk state failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A request body was missing fields or could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// The vertex is not owned here and the request cannot be forwarded.
    #[error("node {0} is not owned by this partition")]
    WrongPartition(NodeId),
    /// A vertex or edge required by the operation is absent.
    #[error("not found")]
    NotFound,
    /// A peer partition answered with a non-success code.
    #[error("partition {partition} answered {code}")]
    Remote {
        /// Partition that was called.
        partition: PartitionId,
        /// Code it answered with.
        code: u16,
    },
    /// The call to a peer partition did not complete.
    #[error("transport to partition {partition} failed: {reason}")]
    Transport {
        /// Partition that was called.
        partition: PartitionId,
        /// Transport-level description of the failure.
        reason: String,
    },
    /// The log region has no free block left.
    #[error("log capacity exhausted")]
    LogFull,
    /// A checkpoint failed after its superblock write was issued and the
    /// superblock could not be read back. Appends are refused until a
    /// checkpoint succeeds.
    #[error("superblock state unknown after a failed checkpoint")]
    Unsettled,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;
