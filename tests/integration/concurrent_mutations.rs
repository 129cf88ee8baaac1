#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use shardgraph::engine::Engine;
use shardgraph::partition::{LoopbackPeers, PartitionCoordinator, PartitionMap};
use shardgraph::primitives::io::MemFileIo;
use shardgraph::storage::{StorageLayout, StorageOptions};
use shardgraph::types::{NodeId, PartitionId};

const THREADS: u64 = 4;
const PER_THREAD: u64 = 60;

fn options() -> StorageOptions {
    // Small enough that the run crosses several forced checkpoints.
    StorageOptions::new().layout(StorageLayout::new(2, 1 << 20).expect("layout"))
}

fn coordinator(
    peers: &Arc<LoopbackPeers>,
    partition: u8,
    io: MemFileIo,
) -> Arc<PartitionCoordinator> {
    let (engine, _) = Engine::open(Arc::new(io), &options()).expect("open engine");
    let map = PartitionMap::new(PartitionId(partition)).expect("partition");
    let coordinator = Arc::new(PartitionCoordinator::new(map, engine, peers.clone()));
    peers.register(&coordinator);
    coordinator
}

/// The `n`-th id owned by partition 1.
fn p1_id(n: u64) -> NodeId {
    NodeId(n * 3)
}

#[test]
fn parallel_local_writers_keep_counts_consistent() {
    let peers = LoopbackPeers::new();
    let io = MemFileIo::new();
    let p1 = coordinator(&peers, 1, io.clone());

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let p1 = p1.clone();
            thread::spawn(move || {
                let base = t * PER_THREAD;
                for i in 0..PER_THREAD {
                    assert!(p1.add_node(p1_id(base + i)).expect("add node"));
                }
                for i in 1..PER_THREAD {
                    p1.add_edge(p1_id(base + i - 1), p1_id(base + i))
                        .expect("add edge");
                }
                // Readers interleave with the other writers.
                assert_eq!(
                    p1.shortest_path(p1_id(base), p1_id(base + PER_THREAD - 1))
                        .expect("path"),
                    Some(u32::try_from(PER_THREAD - 1).expect("fits"))
                );
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let stats = p1.stats();
    assert_eq!(stats.nodes, THREADS * PER_THREAD);
    assert_eq!(stats.edges, THREADS * (PER_THREAD - 1));
    assert!(stats.generation >= 1);

    drop(p1);
    let p1 = coordinator(&peers, 1, io);
    let stats = p1.stats();
    assert_eq!(stats.nodes, THREADS * PER_THREAD);
    assert_eq!(stats.edges, THREADS * (PER_THREAD - 1));
    assert_eq!(
        p1.shortest_path(p1_id(0), p1_id(PER_THREAD - 1)).expect("path"),
        Some(u32::try_from(PER_THREAD - 1).expect("fits"))
    );
    assert_eq!(p1.shortest_path(p1_id(0), p1_id(PER_THREAD)).expect("path"), None);
}

#[test]
fn parallel_cross_partition_edges_land_on_both_sides() {
    let peers = LoopbackPeers::new();
    let p2 = coordinator(&peers, 2, MemFileIo::new());
    let p3 = coordinator(&peers, 3, MemFileIo::new());
    // Every thread targets hub vertex 2 on partition 3.
    p3.add_node(NodeId(2)).expect("hub");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let p2 = p2.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let id = NodeId((t * PER_THREAD + i) * 3 + 1);
                    p2.add_node(id).expect("add node");
                    p2.add_edge(id, NodeId(2)).expect("add cross edge");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread");
    }

    let total = THREADS * PER_THREAD;
    assert_eq!(p2.stats().edges, total);
    assert_eq!(p3.stats().edges, total);
    // Local vertices plus the hub mirror, and the hub plus every mirror.
    assert_eq!(p2.stats().nodes, total + 1);
    assert_eq!(p3.stats().nodes, total + 1);
    assert_eq!(
        p3.get_neighbors(NodeId(2)).expect("neighbors").len() as u64,
        total
    );
}
