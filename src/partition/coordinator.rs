//! Local-vs-remote routing and the cross-partition edge protocol.
//!
//! A cross-partition edge lives on both owning partitions. Each side stores a
//! mirror vertex for the endpoint it does not own. Adding such an edge probes the
//! remote endpoint, has the remote side create the mirror of the local endpoint
//! and record the edge, and only then writes the local mirror and edge. A failed
//! remote edge step leaves the remote mirror vertex in place.
//!
//! Every operation holds the engine lock for its whole duration, remote calls
//! included.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineState, EngineStats};
use crate::graph::EdgeOutcome;
use crate::storage::Superblock;
use crate::types::{GraphError, NodeId, PartitionId, Result};

use super::map::PartitionMap;
use super::rpc::{PeerClient, RpcCode, RpcRequest};

/// Routes graph operations for one partition.
pub struct PartitionCoordinator {
    map: PartitionMap,
    engine: Engine,
    peers: Arc<dyn PeerClient>,
}

impl PartitionCoordinator {
    /// Coordinator for `map.local()` over `engine`, reaching peers via `peers`.
    pub fn new(map: PartitionMap, engine: Engine, peers: Arc<dyn PeerClient>) -> Self {
        Self { map, engine, peers }
    }

    /// Partition this coordinator serves.
    pub fn partition(&self) -> PartitionId {
        self.map.local()
    }

    /// Ownership map.
    pub fn map(&self) -> &PartitionMap {
        &self.map
    }

    /// Underlying engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Adds a vertex owned here. `Ok(false)` if it already existed.
    pub fn add_node(&self, id: NodeId) -> Result<bool> {
        if !self.map.is_local(id) {
            return Err(GraphError::WrongPartition(id));
        }
        self.engine.lock().add_vertex(id)
    }

    /// Removes a vertex owned here, first dropping its cross-partition edges on
    /// the peers that hold them.
    pub fn remove_node(&self, id: NodeId) -> Result<()> {
        if !self.map.is_local(id) {
            return Err(GraphError::WrongPartition(id));
        }
        let mut state = self.engine.lock();
        let Some(neighbors) = state.neighbors(id) else {
            return Err(GraphError::NotFound);
        };
        for neighbor in neighbors.into_iter().filter(|n| !self.map.is_local(*n)) {
            self.call_ok(
                PartitionMap::owner(neighbor),
                RpcRequest::RemoveEdge(id, neighbor),
            )?;
        }
        state.remove_vertex(id)?;
        info!(node = %id, "node removed");
        Ok(())
    }

    /// Adds an edge with at least one endpoint owned here.
    pub fn add_edge(&self, a: NodeId, b: NodeId) -> Result<EdgeOutcome> {
        let (local, remote) = match (self.map.is_local(a), self.map.is_local(b)) {
            (false, false) => return Err(GraphError::WrongPartition(a)),
            (true, true) => return self.engine.lock().add_edge(a, b),
            (true, false) => (a, b),
            (false, true) => (b, a),
        };
        let mut state = self.engine.lock();
        if !state.vertex_exists(local) {
            return Ok(EdgeOutcome::Invalid);
        }
        let owner = PartitionMap::owner(remote);
        self.call_ok(owner, RpcRequest::GetNode(remote))?;
        let mirrored = self.peers.call(owner, RpcRequest::AddNode(local))?;
        if !mirrored.is_ok() && mirrored != RpcCode::EXISTS {
            warn!(%owner, node = %local, code = mirrored.0, "peer did not create mirror vertex");
        }
        match self.peers.call(owner, RpcRequest::AddEdge(a, b))? {
            RpcCode::OK => {}
            RpcCode::EXISTS => return Ok(EdgeOutcome::AlreadyExists),
            code => {
                return Err(GraphError::Remote {
                    partition: owner,
                    code: code.0,
                })
            }
        }
        state.add_vertex(remote)?;
        let outcome = state.add_edge(a, b)?;
        debug!(%a, %b, %owner, ?outcome, "cross-partition edge added");
        Ok(outcome)
    }

    /// Removes an edge with at least one endpoint owned here. The remote half
    /// goes first; the local half only after the peer confirms.
    pub fn remove_edge(&self, a: NodeId, b: NodeId) -> Result<()> {
        let remote = match (self.map.is_local(a), self.map.is_local(b)) {
            (false, false) => return Err(GraphError::WrongPartition(a)),
            (true, true) => None,
            (true, false) => Some(b),
            (false, true) => Some(a),
        };
        let mut state = self.engine.lock();
        if let Some(remote) = remote {
            self.call_ok(PartitionMap::owner(remote), RpcRequest::RemoveEdge(a, b))?;
        }
        if state.remove_edge(a, b)? {
            Ok(())
        } else {
            Err(GraphError::NotFound)
        }
    }

    /// Whether `id` exists on its owning partition.
    pub fn get_node(&self, id: NodeId) -> Result<bool> {
        let state = self.engine.lock();
        if self.map.is_local(id) {
            return Ok(state.vertex_exists(id));
        }
        self.probe(id)
    }

    /// Whether the edge `(a, b)` exists.
    pub fn get_edge(&self, a: NodeId, b: NodeId) -> Result<bool> {
        let state = self.engine.lock();
        if state.vertex_exists(a) && state.vertex_exists(b) {
            return Ok(state.edge_exists(a, b));
        }
        let remote = match (self.map.is_local(a), self.map.is_local(b)) {
            (true, true) => return Err(GraphError::NotFound),
            (false, _) => a,
            (true, false) => b,
        };
        if !self.probe(remote)? {
            return Err(GraphError::NotFound);
        }
        Ok(state.edge_exists(a, b))
    }

    /// Neighbors of `id`, most recent first. Answered from local adjacency,
    /// after confirming a non-owned `id` exists on its owner.
    pub fn get_neighbors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let state = self.engine.lock();
        if self.map.is_local(id) {
            return state.neighbors(id).ok_or(GraphError::NotFound);
        }
        if !self.probe(id)? {
            return Err(GraphError::NotFound);
        }
        Ok(state.neighbors(id).unwrap_or_default())
    }

    /// Hop count between two vertices present here. `Ok(None)` if unreachable.
    pub fn shortest_path(&self, a: NodeId, b: NodeId) -> Result<Option<u32>> {
        let state = self.engine.lock();
        if !state.vertex_exists(a) || !state.vertex_exists(b) {
            return Err(GraphError::NotFound);
        }
        Ok(state.shortest_path(a, b))
    }

    /// Writes a checkpoint.
    pub fn checkpoint(&self) -> Result<Superblock> {
        self.engine.checkpoint()
    }

    /// Engine counters.
    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    /// Applies a request received from a peer. No ownership checks: mirror
    /// vertices are by definition not owned here.
    pub fn handle_rpc(&self, request: RpcRequest) -> RpcCode {
        let mut state = self.engine.lock();
        match apply_rpc(&mut state, request) {
            Ok(code) => code,
            Err(err) => {
                warn!(?request, %err, "rpc failed");
                RpcCode::INTERNAL
            }
        }
    }

    fn probe(&self, id: NodeId) -> Result<bool> {
        let owner = PartitionMap::owner(id);
        match self.peers.call(owner, RpcRequest::GetNode(id))? {
            RpcCode::OK => Ok(true),
            RpcCode::INVALID => Ok(false),
            code => Err(GraphError::Remote {
                partition: owner,
                code: code.0,
            }),
        }
    }

    fn call_ok(&self, partition: PartitionId, request: RpcRequest) -> Result<()> {
        let code = self.peers.call(partition, request)?;
        if code.is_ok() {
            Ok(())
        } else {
            debug!(%partition, ?request, code = code.0, "peer refused");
            Err(GraphError::Remote {
                partition,
                code: code.0,
            })
        }
    }
}

fn apply_rpc(state: &mut EngineState, request: RpcRequest) -> Result<RpcCode> {
    let code = match request {
        RpcRequest::AddNode(id) => {
            if state.add_vertex(id)? {
                RpcCode::OK
            } else {
                RpcCode::EXISTS
            }
        }
        RpcRequest::AddEdge(a, b) => match state.add_edge(a, b)? {
            EdgeOutcome::Created => RpcCode::OK,
            EdgeOutcome::AlreadyExists => RpcCode::EXISTS,
            EdgeOutcome::Invalid => RpcCode::INVALID,
        },
        RpcRequest::RemoveEdge(a, b) => {
            if state.remove_edge(a, b)? {
                RpcCode::OK
            } else {
                RpcCode::INVALID
            }
        }
        RpcRequest::GetNode(id) => {
            if state.vertex_exists(id) {
                RpcCode::OK
            } else {
                RpcCode::INVALID
            }
        }
    };
    Ok(code)
}
