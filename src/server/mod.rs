//! HTTP front end and listener lifecycle for one partition.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch, task};
use tower_http::trace::TraceLayer;

use crate::graph::EdgeOutcome;
use crate::partition::{rpc_router, PartitionCoordinator};
use crate::types::{GraphError, NodeId};

/// Listener addresses and background work for [`serve`].
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Client-facing API address.
    pub api_addr: SocketAddr,
    /// Peer RPC address.
    pub rpc_addr: SocketAddr,
    /// Period of automatic checkpoints; `None` disables them.
    pub checkpoint_interval: Option<Duration>,
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding a listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Serving failed after startup.
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    /// A server task panicked or was cancelled.
    #[error("server task failed: {0}")]
    Join(#[from] task::JoinError),
}

type AppState = Arc<PartitionCoordinator>;

/// Serves the API and the peer RPC listener until ctrl-c.
pub async fn serve(
    coordinator: Arc<PartitionCoordinator>,
    options: ServerOptions,
) -> Result<(), ServerError> {
    let api_listener = bind(options.api_addr).await?;
    let rpc_listener = bind(options.rpc_addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!(
        partition = %coordinator.partition(),
        api_addr = %options.api_addr,
        rpc_addr = %options.rpc_addr,
        checkpoint_interval = ?options.checkpoint_interval,
        "partition listening"
    );

    let rpc_app = rpc_router(coordinator.clone());
    let rpc_shutdown = shutdown_rx.clone();
    let rpc_task = tokio::spawn(async move {
        axum::serve(rpc_listener, rpc_app.into_make_service())
            .with_graceful_shutdown(wait_for_shutdown(rpc_shutdown))
            .await
    });
    let checkpoint_task = options
        .checkpoint_interval
        .map(|period| spawn_checkpoint_task(coordinator.clone(), period, shutdown_rx.clone()));

    let api_result = axum::serve(api_listener, build_router(coordinator).into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await;

    rpc_task.await??;
    if let Some(handle) = checkpoint_task {
        handle.await?;
    }
    api_result?;
    Ok(())
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Router for the client-facing API.
pub fn build_router(coordinator: Arc<PartitionCoordinator>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/add_node", post(add_node_handler))
        .route("/api/v1/add_edge", post(add_edge_handler))
        .route("/api/v1/remove_node", post(remove_node_handler))
        .route("/api/v1/remove_edge", post(remove_edge_handler))
        .route("/api/v1/get_node", post(get_node_handler))
        .route("/api/v1/get_edge", post(get_edge_handler))
        .route("/api/v1/get_neighbors", post(get_neighbors_handler))
        .route("/api/v1/shortest_path", post(shortest_path_handler))
        .route("/api/v1/checkpoint", post(checkpoint_handler))
        .with_state(coordinator)
        .layer(TraceLayer::new_for_http())
}

fn spawn_checkpoint_task(
    coordinator: Arc<PartitionCoordinator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let coordinator = coordinator.clone();
                    match task::spawn_blocking(move || coordinator.checkpoint()).await {
                        Ok(Ok(superblock)) => {
                            tracing::debug!(generation = superblock.generation, "periodic checkpoint")
                        }
                        Ok(Err(err)) => tracing::warn!(%err, "periodic checkpoint failed"),
                        Err(err) => tracing::error!(?err, "checkpoint task failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => tracing::error!(?err, "failed to listen for shutdown signal"),
    }
}

#[derive(Debug, Deserialize)]
struct NodeRequest {
    node_id: u64,
}

#[derive(Debug, Deserialize)]
struct EdgeRequest {
    node_a_id: u64,
    node_b_id: u64,
}

#[derive(Debug, Serialize)]
struct NodeResponse {
    node_id: u64,
}

#[derive(Debug, Serialize)]
struct EdgeResponse {
    node_a_id: u64,
    node_b_id: u64,
}

#[derive(Debug, Serialize)]
struct InGraphResponse {
    in_graph: u8,
}

#[derive(Debug, Serialize)]
struct NeighborsResponse {
    node_id: u64,
    neighbors: Vec<u64>,
}

#[derive(Debug, Serialize)]
struct DistanceResponse {
    distance: u32,
}

#[derive(Debug, Serialize)]
struct CheckpointResponse {
    generation: u32,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    partition: u8,
    nodes: u64,
    edges: u64,
    generation: u32,
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|err| GraphError::Malformed(err.to_string()).into())
}

async fn run<T, F>(coordinator: AppState, op: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&PartitionCoordinator) -> crate::types::Result<T> + Send + 'static,
{
    Ok(task::spawn_blocking(move || op(coordinator.as_ref())).await??)
}

async fn health_handler(State(coordinator): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let partition = coordinator.partition().0;
    let stats = run(coordinator, |c| Ok(c.stats())).await?;
    Ok(Json(HealthResponse {
        status: "ok",
        partition,
        nodes: stats.nodes,
        edges: stats.edges,
        generation: stats.generation,
    }))
}

async fn add_node_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let NodeRequest { node_id } = parse(&body)?;
    let created = run(coordinator, move |c| c.add_node(NodeId(node_id))).await?;
    if !created {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(NodeResponse { node_id }).into_response())
}

async fn add_edge_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let EdgeRequest {
        node_a_id,
        node_b_id,
    } = parse(&body)?;
    let outcome = run(coordinator, move |c| c.add_edge(NodeId(node_a_id), NodeId(node_b_id))).await?;
    Ok(match outcome {
        EdgeOutcome::Created => Json(EdgeResponse {
            node_a_id,
            node_b_id,
        })
        .into_response(),
        EdgeOutcome::AlreadyExists => StatusCode::NO_CONTENT.into_response(),
        EdgeOutcome::Invalid => StatusCode::BAD_REQUEST.into_response(),
    })
}

async fn remove_node_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Json<NodeResponse>, AppError> {
    let NodeRequest { node_id } = parse(&body)?;
    run(coordinator, move |c| c.remove_node(NodeId(node_id))).await?;
    Ok(Json(NodeResponse { node_id }))
}

async fn remove_edge_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Json<EdgeResponse>, AppError> {
    let EdgeRequest {
        node_a_id,
        node_b_id,
    } = parse(&body)?;
    run(coordinator, move |c| c.remove_edge(NodeId(node_a_id), NodeId(node_b_id))).await?;
    Ok(Json(EdgeResponse {
        node_a_id,
        node_b_id,
    }))
}

async fn get_node_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Json<InGraphResponse>, AppError> {
    let NodeRequest { node_id } = parse(&body)?;
    let found = run(coordinator, move |c| c.get_node(NodeId(node_id))).await?;
    Ok(Json(InGraphResponse {
        in_graph: u8::from(found),
    }))
}

async fn get_edge_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Json<InGraphResponse>, AppError> {
    let EdgeRequest {
        node_a_id,
        node_b_id,
    } = parse(&body)?;
    let found = run(coordinator, move |c| c.get_edge(NodeId(node_a_id), NodeId(node_b_id))).await?;
    Ok(Json(InGraphResponse {
        in_graph: u8::from(found),
    }))
}

async fn get_neighbors_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Json<NeighborsResponse>, AppError> {
    let NodeRequest { node_id } = parse(&body)?;
    let neighbors = run(coordinator, move |c| c.get_neighbors(NodeId(node_id))).await?;
    Ok(Json(NeighborsResponse {
        node_id,
        neighbors: neighbors.into_iter().map(u64::from).collect(),
    }))
}

async fn shortest_path_handler(
    State(coordinator): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let EdgeRequest {
        node_a_id,
        node_b_id,
    } = parse(&body)?;
    let distance =
        run(coordinator, move |c| c.shortest_path(NodeId(node_a_id), NodeId(node_b_id))).await?;
    Ok(match distance {
        Some(distance) => Json(DistanceResponse { distance }).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn checkpoint_handler(
    State(coordinator): State<AppState>,
) -> Result<Json<CheckpointResponse>, AppError> {
    let superblock = run(coordinator, |c| c.checkpoint()).await?;
    Ok(Json(CheckpointResponse {
        generation: superblock.generation,
    }))
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("internal task failure: {0}")]
    Join(#[from] task::JoinError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Graph(
                GraphError::Malformed(_)
                | GraphError::WrongPartition(_)
                | GraphError::NotFound
                | GraphError::Invalid(_),
            ) => StatusCode::BAD_REQUEST,
            AppError::Graph(GraphError::Remote { code, .. }) => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        status.into_response()
    }
}
