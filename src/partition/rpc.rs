//! Partition-to-partition calls.
//!
//! Each request names one graph operation and is answered with a numeric code
//! (200, 204, 400). Transport failures never produce a code; they surface as
//! [`GraphError::Transport`] and the HTTP layer answers 500 for them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Json, Router};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::types::{GraphError, NodeId, Opcode, PartitionId, Result};

use super::coordinator::PartitionCoordinator;

/// Status code carried by an RPC reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcCode(pub u16);

impl RpcCode {
    /// Applied.
    pub const OK: RpcCode = RpcCode(200);
    /// Nothing to do, the state was already present.
    pub const EXISTS: RpcCode = RpcCode(204);
    /// Rejected or not found.
    pub const INVALID: RpcCode = RpcCode(400);
    /// The receiving partition failed internally.
    pub const INTERNAL: RpcCode = RpcCode(500);

    /// Returns true for 200.
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

/// One operation sent to a peer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RpcRequest {
    /// Create a (mirror) vertex.
    AddNode(NodeId),
    /// Record an edge.
    AddEdge(NodeId, NodeId),
    /// Drop an edge.
    RemoveEdge(NodeId, NodeId),
    /// Existence probe.
    GetNode(NodeId),
}

impl RpcRequest {
    /// Opcode of the operation.
    pub fn opcode(&self) -> Opcode {
        match self {
            RpcRequest::AddNode(_) => Opcode::AddNode,
            RpcRequest::AddEdge(..) => Opcode::AddEdge,
            RpcRequest::RemoveEdge(..) => Opcode::RemoveEdge,
            RpcRequest::GetNode(_) => Opcode::GetNode,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            RpcRequest::AddNode(_) => "/rpc/v1/add_node",
            RpcRequest::AddEdge(..) => "/rpc/v1/add_edge",
            RpcRequest::RemoveEdge(..) => "/rpc/v1/remove_edge",
            RpcRequest::GetNode(_) => "/rpc/v1/get_node",
        }
    }

    fn body(&self) -> RpcBody {
        match *self {
            RpcRequest::AddNode(id) | RpcRequest::GetNode(id) => RpcBody::Node(NodeBody { id: id.0 }),
            RpcRequest::AddEdge(a, b) | RpcRequest::RemoveEdge(a, b) => RpcBody::Edge(EdgeBody {
                id_a: a.0,
                id_b: b.0,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RpcBody {
    Node(NodeBody),
    Edge(EdgeBody),
}

/// `{"id": N}`
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeBody {
    /// Vertex id.
    pub id: u64,
}

/// `{"id_a": A, "id_b": B}`
#[derive(Debug, Serialize, Deserialize)]
pub struct EdgeBody {
    /// First endpoint.
    pub id_a: u64,
    /// Second endpoint.
    pub id_b: u64,
}

/// `{"code": C}`
#[derive(Debug, Serialize, Deserialize)]
pub struct CodeBody {
    /// Reply code.
    pub code: RpcCode,
}

/// Sends requests to other partitions.
///
/// Calls block until the peer answers or the implementation gives up.
pub trait PeerClient: Send + Sync {
    /// Delivers `request` to `partition` and returns its reply code.
    fn call(&self, partition: PartitionId, request: RpcRequest) -> Result<RpcCode>;
}

/// [`PeerClient`] speaking JSON over HTTP.
pub struct HttpPeerClient {
    client: reqwest::blocking::Client,
    peers: FxHashMap<PartitionId, String>,
}

impl HttpPeerClient {
    /// Client for `peers`, given as `host:port` or full `http://` base URLs.
    ///
    /// Must be built outside an async context.
    pub fn new(peers: Vec<(PartitionId, String)>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| GraphError::Transport {
            partition: PartitionId(0),
            reason: err.to_string(),
        })?;
        let peers = peers
            .into_iter()
            .map(|(partition, addr)| (partition, base_url(&addr)))
            .collect();
        Ok(Self { client, peers })
    }
}

fn base_url(addr: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_owned()
    } else {
        format!("http://{addr}")
    }
}

impl PeerClient for HttpPeerClient {
    fn call(&self, partition: PartitionId, request: RpcRequest) -> Result<RpcCode> {
        let transport = |reason: String| GraphError::Transport { partition, reason };
        let base = self
            .peers
            .get(&partition)
            .ok_or_else(|| transport("no address configured".to_owned()))?;
        let url = format!("{base}{}", request.path());
        let response = self
            .client
            .post(&url)
            .json(&request.body())
            .send()
            .map_err(|err| transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Ok(RpcCode(status.as_u16()));
        }
        let reply: CodeBody = response.json().map_err(|err| transport(err.to_string()))?;
        debug!(%partition, ?request, code = reply.code.0, "peer replied");
        Ok(reply.code)
    }
}

/// In-process [`PeerClient`] that calls coordinators directly.
///
/// Holds weak references, so registering a coordinator that itself uses this
/// client does not create a cycle.
#[derive(Default)]
pub struct LoopbackPeers {
    nodes: RwLock<FxHashMap<PartitionId, Weak<PartitionCoordinator>>>,
    offline: RwLock<FxHashSet<PartitionId>>,
}

impl LoopbackPeers {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Routes calls for the coordinator's partition to it.
    pub fn register(&self, coordinator: &Arc<PartitionCoordinator>) {
        self.nodes
            .write()
            .insert(coordinator.partition(), Arc::downgrade(coordinator));
    }

    /// Makes calls to `partition` fail at the transport level.
    pub fn set_offline(&self, partition: PartitionId, offline: bool) {
        let mut set = self.offline.write();
        if offline {
            set.insert(partition);
        } else {
            set.remove(&partition);
        }
    }
}

impl PeerClient for LoopbackPeers {
    fn call(&self, partition: PartitionId, request: RpcRequest) -> Result<RpcCode> {
        if self.offline.read().contains(&partition) {
            return Err(GraphError::Transport {
                partition,
                reason: "partition offline".to_owned(),
            });
        }
        let target = self
            .nodes
            .read()
            .get(&partition)
            .and_then(Weak::upgrade)
            .ok_or_else(|| GraphError::Transport {
                partition,
                reason: "partition not registered".to_owned(),
            })?;
        Ok(target.handle_rpc(request))
    }
}

/// Router serving inbound peer calls.
pub fn rpc_router(coordinator: Arc<PartitionCoordinator>) -> Router {
    Router::new()
        .route("/rpc/v1/add_node", post(add_node_rpc))
        .route("/rpc/v1/add_edge", post(add_edge_rpc))
        .route("/rpc/v1/remove_edge", post(remove_edge_rpc))
        .route("/rpc/v1/get_node", post(get_node_rpc))
        .with_state(coordinator)
        .layer(TraceLayer::new_for_http())
}

type RpcState = Arc<PartitionCoordinator>;

fn parse<T: DeserializeOwned>(body: &Bytes) -> std::result::Result<T, StatusCode> {
    serde_json::from_slice(body).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn dispatch(
    coordinator: RpcState,
    request: RpcRequest,
) -> std::result::Result<Json<CodeBody>, StatusCode> {
    match task::spawn_blocking(move || coordinator.handle_rpc(request)).await {
        Ok(code) => Ok(Json(CodeBody { code })),
        Err(err) => {
            error!(?err, "rpc handler task failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn add_node_rpc(
    State(coordinator): State<RpcState>,
    body: Bytes,
) -> std::result::Result<Json<CodeBody>, StatusCode> {
    let NodeBody { id } = parse(&body)?;
    dispatch(coordinator, RpcRequest::AddNode(NodeId(id))).await
}

async fn add_edge_rpc(
    State(coordinator): State<RpcState>,
    body: Bytes,
) -> std::result::Result<Json<CodeBody>, StatusCode> {
    let EdgeBody { id_a, id_b } = parse(&body)?;
    dispatch(coordinator, RpcRequest::AddEdge(NodeId(id_a), NodeId(id_b))).await
}

async fn remove_edge_rpc(
    State(coordinator): State<RpcState>,
    body: Bytes,
) -> std::result::Result<Json<CodeBody>, StatusCode> {
    let EdgeBody { id_a, id_b } = parse(&body)?;
    dispatch(coordinator, RpcRequest::RemoveEdge(NodeId(id_a), NodeId(id_b))).await
}

async fn get_node_rpc(
    State(coordinator): State<RpcState>,
    body: Bytes,
) -> std::result::Result<Json<CodeBody>, StatusCode> {
    let NodeBody { id } = parse(&body)?;
    dispatch(coordinator, RpcRequest::GetNode(NodeId(id))).await
}
