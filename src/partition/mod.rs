//! Three-way partitioning of the vertex id space.

mod coordinator;
mod map;
mod rpc;

pub use coordinator::PartitionCoordinator;
pub use map::{PartitionMap, PARTITION_COUNT};
pub use rpc::{
    rpc_router, CodeBody, EdgeBody, HttpPeerClient, LoopbackPeers, NodeBody, PeerClient, RpcCode,
    RpcRequest,
};
