#![allow(missing_docs)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use shardgraph::engine::Engine;
use shardgraph::partition::{rpc_router, LoopbackPeers, PartitionCoordinator, PartitionMap};
use shardgraph::primitives::io::MemFileIo;
use shardgraph::server::build_router;
use shardgraph::storage::{StorageLayout, StorageOptions};
use shardgraph::types::PartitionId;
use tower::ServiceExt;

struct Harness {
    peers: Arc<LoopbackPeers>,
    nodes: Vec<Arc<PartitionCoordinator>>,
}

impl Harness {
    fn new() -> Self {
        let peers = LoopbackPeers::new();
        let options = StorageOptions::new().layout(StorageLayout::new(8, 1 << 20).expect("layout"));
        let nodes = (1..=3)
            .map(|n| {
                let (engine, _) =
                    Engine::open(Arc::new(MemFileIo::new()), &options).expect("open engine");
                let map = PartitionMap::new(PartitionId(n)).expect("partition");
                let coordinator = Arc::new(PartitionCoordinator::new(map, engine, peers.clone()));
                peers.register(&coordinator);
                coordinator
            })
            .collect();
        Self { peers, nodes }
    }

    fn api(&self, partition: u8) -> Router {
        build_router(self.nodes[usize::from(partition - 1)].clone())
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, body.to_vec())
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Vec<u8>) {
    let request = Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    send(app, request).await
}

fn json_of(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[tokio::test]
async fn add_node_reports_created_existing_and_foreign_ids() {
    let harness = Harness::new();
    let api = harness.api(1);

    let (status, body) = post(&api, "/api/v1/add_node", json!({"node_id": 3})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"node_id": 3}));

    let (status, body) = post(&api, "/api/v1/add_node", json!({"node_id": 3})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    let (status, body) = post(&api, "/api/v1/add_node", json!({"node_id": 4})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let harness = Harness::new();
    let api = harness.api(1);
    for body in [json!({"node": 3}), json!({"node_id": "three"}), json!({"node_id": -1})] {
        let (status, body) = post(&api, "/api/v1/add_node", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.is_empty());
    }
    let request = Request::post("/api/v1/get_edge")
        .body(Body::from("not json"))
        .expect("request");
    let (status, _) = send(&api, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn local_edges_and_queries() {
    let harness = Harness::new();
    let api = harness.api(1);
    for id in [0, 3, 6, 9] {
        post(&api, "/api/v1/add_node", json!({"node_id": id})).await;
    }

    let edge = json!({"node_a_id": 3, "node_b_id": 6});
    let (status, body) = post(&api, "/api/v1/add_edge", edge.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), edge);
    let (status, _) = post(&api, "/api/v1/add_edge", json!({"node_a_id": 6, "node_b_id": 3})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = post(&api, "/api/v1/add_edge", json!({"node_a_id": 3, "node_b_id": 3})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    post(&api, "/api/v1/add_edge", json!({"node_a_id": 6, "node_b_id": 9})).await;

    let (_, body) = post(&api, "/api/v1/get_node", json!({"node_id": 9})).await;
    assert_eq!(json_of(&body), json!({"in_graph": 1}));
    let (_, body) = post(&api, "/api/v1/get_node", json!({"node_id": 12})).await;
    assert_eq!(json_of(&body), json!({"in_graph": 0}));
    let (_, body) = post(&api, "/api/v1/get_edge", json!({"node_a_id": 9, "node_b_id": 6})).await;
    assert_eq!(json_of(&body), json!({"in_graph": 1}));

    let (status, body) = post(&api, "/api/v1/get_neighbors", json!({"node_id": 6})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"node_id": 6, "neighbors": [9, 3]}));
    let (status, _) = post(&api, "/api/v1/get_neighbors", json!({"node_id": 12})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) =
        post(&api, "/api/v1/shortest_path", json!({"node_a_id": 3, "node_b_id": 9})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"distance": 2}));
    let (status, body) =
        post(&api, "/api/v1/shortest_path", json!({"node_a_id": 0, "node_b_id": 9})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());
}

#[tokio::test]
async fn removals_and_missing_targets() {
    let harness = Harness::new();
    let api = harness.api(1);
    for id in [3, 6] {
        post(&api, "/api/v1/add_node", json!({"node_id": id})).await;
    }
    post(&api, "/api/v1/add_edge", json!({"node_a_id": 3, "node_b_id": 6})).await;

    let edge = json!({"node_a_id": 6, "node_b_id": 3});
    let (status, body) = post(&api, "/api/v1/remove_edge", edge.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), edge);
    let (status, body) = post(&api, "/api/v1/remove_edge", edge).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());

    let (status, body) = post(&api, "/api/v1/remove_node", json!({"node_id": 6})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"node_id": 6}));
    let (status, _) = post(&api, "/api/v1/remove_node", json!({"node_id": 6})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = post(&api, "/api/v1/remove_node", json!({"node_id": 4})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cross_partition_edge_over_http() {
    let harness = Harness::new();
    let p2 = harness.api(2);
    let p3 = harness.api(3);
    post(&p2, "/api/v1/add_node", json!({"node_id": 4})).await;
    post(&p3, "/api/v1/add_node", json!({"node_id": 2})).await;

    let (status, _) = post(&p2, "/api/v1/add_edge", json!({"node_a_id": 2, "node_b_id": 4})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = post(&p3, "/api/v1/get_edge", json!({"node_a_id": 4, "node_b_id": 2})).await;
    assert_eq!(json_of(&body), json!({"in_graph": 1}));

    // Remote endpoint missing: the peer's 400 is passed through.
    let (status, _) = post(&p2, "/api/v1/add_edge", json!({"node_a_id": 4, "node_b_id": 5})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    harness.peers.set_offline(PartitionId(3), true);
    let (status, body) =
        post(&p2, "/api/v1/remove_edge", json!({"node_a_id": 2, "node_b_id": 4})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}

#[tokio::test]
async fn checkpoint_and_health() {
    let harness = Harness::new();
    let api = harness.api(1);
    post(&api, "/api/v1/add_node", json!({"node_id": 3})).await;

    let request = Request::post("/api/v1/checkpoint")
        .body(Body::empty())
        .expect("request");
    let (status, body) = send(&api, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"generation": 1}));

    let request = Request::get("/health").body(Body::empty()).expect("request");
    let (status, body) = send(&api, request).await;
    assert_eq!(status, StatusCode::OK);
    let health = json_of(&body);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["partition"], 1);
    assert_eq!(health["nodes"], 1);
    assert_eq!(health["generation"], 1);
}

#[tokio::test]
async fn rpc_listener_answers_with_codes() {
    let harness = Harness::new();
    let rpc = rpc_router(harness.nodes[2].clone());

    let (status, body) = post(&rpc, "/rpc/v1/add_node", json!({"id": 4})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body), json!({"code": 200}));
    let (_, body) = post(&rpc, "/rpc/v1/add_node", json!({"id": 4})).await;
    assert_eq!(json_of(&body), json!({"code": 204}));
    let (_, body) = post(&rpc, "/rpc/v1/add_edge", json!({"id_a": 2, "id_b": 4})).await;
    assert_eq!(json_of(&body), json!({"code": 400}));
    let (_, body) = post(&rpc, "/rpc/v1/get_node", json!({"id": 4})).await;
    assert_eq!(json_of(&body), json!({"code": 200}));
    let (status, _) = post(&rpc, "/rpc/v1/get_node", json!({"node_id": 4})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
