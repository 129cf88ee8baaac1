#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use shardgraph::engine::Engine;
use shardgraph::graph::GraphIndex;
use shardgraph::primitives::io::{FileIo, MemFileIo, StdFileIo};
use shardgraph::storage::layout::ENTRIES_PER_BLOCK;
use shardgraph::storage::{StorageLayout, StorageOptions, Synchronous};
use shardgraph::types::{GraphError, NodeId, Result};
use tempfile::tempdir;

fn small_options(blocks: u32) -> StorageOptions {
    StorageOptions::new().layout(StorageLayout::new(blocks, 1 << 20).expect("layout"))
}

fn node_ids(engine: &Engine) -> Vec<u64> {
    let state = engine.lock();
    let mut ids: Vec<u64> = state.index().vertex_ids().map(u64::from).collect();
    ids.sort_unstable();
    ids
}

fn edge_pairs(engine: &Engine) -> Vec<(u64, u64)> {
    let state = engine.lock();
    let mut edges: Vec<(u64, u64)> = state
        .index()
        .edges()
        .map(|(a, b)| (a.0, b.0))
        .collect();
    edges.sort_unstable();
    edges
}

#[test]
fn file_backed_graph_survives_restart() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("p1.db");
    let options = small_options(8).synchronous(Synchronous::Normal);

    {
        let (engine, report) = Engine::open(Arc::new(StdFileIo::open(&path)?), &options)?;
        assert!(report.formatted);
        let mut state = engine.lock();
        for id in [3, 6, 9, 12] {
            state.add_vertex(NodeId(id))?;
        }
        state.add_edge(NodeId(3), NodeId(6))?;
        state.add_edge(NodeId(6), NodeId(9))?;
        state.add_edge(NodeId(9), NodeId(12))?;
        state.remove_edge(NodeId(6), NodeId(9))?;
        state.remove_vertex(NodeId(12))?;
    } // simulate crash: nothing checkpointed

    let (engine, report) = Engine::open(Arc::new(StdFileIo::open(&path)?), &options)?;
    assert!(!report.formatted);
    assert_eq!(report.generation, 0);
    assert_eq!(report.entries_replayed, 9);
    assert_eq!(node_ids(&engine), vec![3, 6, 9]);
    assert_eq!(edge_pairs(&engine), vec![(3, 6)]);
    Ok(())
}

#[test]
fn checkpoint_then_log_replay_after_restart() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("p2.db");
    let options = small_options(8);

    {
        let (engine, _) = Engine::open(Arc::new(StdFileIo::open(&path)?), &options)?;
        {
            let mut state = engine.lock();
            state.add_vertex(NodeId(1))?;
            state.add_vertex(NodeId(4))?;
            state.add_edge(NodeId(1), NodeId(4))?;
        }
        assert_eq!(engine.checkpoint()?.generation, 1);
        let mut state = engine.lock();
        state.add_vertex(NodeId(7))?;
        state.add_edge(NodeId(4), NodeId(7))?;
    }

    let (engine, report) = Engine::open(Arc::new(StdFileIo::open(&path)?), &options)?;
    assert_eq!(report.generation, 1);
    assert_eq!(report.checkpoint_nodes, 2);
    assert_eq!(report.checkpoint_edges, 1);
    assert_eq!(report.entries_replayed, 2);
    assert_eq!(node_ids(&engine), vec![1, 4, 7]);
    assert_eq!(edge_pairs(&engine), vec![(1, 4), (4, 7)]);
    Ok(())
}

#[test]
fn format_discards_previous_contents() -> Result<()> {
    let dir = tempdir().expect("tmpdir");
    let path = dir.path().join("p3.db");
    let options = small_options(4);
    {
        let (engine, _) = Engine::open(Arc::new(StdFileIo::open(&path)?), &options)?;
        engine.lock().add_vertex(NodeId(2))?;
        engine.checkpoint()?;
        engine.lock().add_vertex(NodeId(5))?;
    }
    {
        let (engine, report) = Engine::format(Arc::new(StdFileIo::open(&path)?), &options)?;
        assert!(report.formatted);
        assert!(node_ids(&engine).is_empty());
    }
    let (engine, report) = Engine::open(Arc::new(StdFileIo::open(&path)?), &options)?;
    assert_eq!(report.generation, 0);
    assert_eq!(report.entries_replayed, 0);
    assert!(node_ids(&engine).is_empty());
    Ok(())
}

#[test]
fn acknowledged_mutations_survive_failed_writes() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(4);
    let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;

    // Every append costs two writes.
    io.fail_after_writes(10);
    let mut acknowledged = Vec::new();
    {
        let mut state = engine.lock();
        for id in 0..10u64 {
            if state.add_vertex(NodeId(id)).is_ok() {
                acknowledged.push(id);
            }
        }
        assert_eq!(state.index().len(), acknowledged.len() as u64);
    }
    assert_eq!(acknowledged, vec![0, 1, 2, 3, 4]);
    drop(engine);

    io.heal();
    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.entries_replayed, 5);
    assert_eq!(node_ids(&engine), acknowledged);
    Ok(())
}

#[test]
fn torn_block_ends_replay_without_losing_sealed_blocks() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(4);
    let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
    let sealed = ENTRIES_PER_BLOCK as u64;
    {
        let mut state = engine.lock();
        for id in 0..sealed {
            state.add_vertex(NodeId(id))?;
        }
        assert_eq!(state.stats().log_tail, 1);
        // The terminator after block 1 lands, the block image tears.
        io.tear_write_after(1, 6);
        assert!(state.add_vertex(NodeId(sealed)).is_err());
        assert!(!state.vertex_exists(NodeId(sealed)));
    }
    drop(engine);

    io.heal();
    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.blocks_replayed, 1);
    assert_eq!(report.entries_replayed, sealed);
    assert_eq!(report.tail, 1);
    assert_eq!(node_ids(&engine).len() as u64, sealed);

    // The torn block is overwritten by the next append.
    engine.lock().add_vertex(NodeId(sealed))?;
    assert_eq!(engine.stats().nodes, sealed + 1);
    Ok(())
}

#[test]
fn stale_generation_blocks_are_not_replayed() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(4);
    let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
    let per_block = ENTRIES_PER_BLOCK as u64;
    let total = per_block + 96;
    {
        let mut state = engine.lock();
        for id in 0..total {
            state.add_vertex(NodeId(id))?;
        }
    }
    engine.checkpoint()?;
    drop(engine);

    // Blocks 0 and 1 still hold the generation-0 additions.
    let (engine, report) = Engine::open(Arc::new(io.clone()), &options)?;
    assert_eq!(report.generation, 1);
    assert_eq!(report.checkpoint_nodes, total);
    assert_eq!(report.blocks_replayed, 0);
    assert_eq!(report.tail, 0);
    {
        let mut state = engine.lock();
        for id in (total - per_block)..total {
            assert!(state.remove_vertex(NodeId(id))?);
        }
        assert_eq!(state.stats().log_tail, 1);
    }
    drop(engine);

    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.blocks_replayed, 1);
    assert_eq!(report.entries_replayed, per_block);
    assert_eq!(node_ids(&engine), (0..total - per_block).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn discarded_blocks_stay_discarded_across_restarts() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(8);
    let per_block = ENTRIES_PER_BLOCK as u64;
    {
        let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
        let mut state = engine.lock();
        for id in 0..3 * per_block {
            state.add_vertex(NodeId(id))?;
        }
    }
    io.corrupt_byte(options.layout.block_offset(1) + 100);

    let (engine, report) = Engine::open(Arc::new(io.clone()), &options)?;
    assert_eq!(report.entries_replayed, per_block);
    assert_eq!(report.tail, 1);
    {
        let mut state = engine.lock();
        assert!(!state.vertex_exists(NodeId(500)));
        for id in 0..per_block {
            state.add_vertex(NodeId(10_000 + id))?;
        }
        assert_eq!(state.stats().log_tail, 2);
    }
    drop(engine);

    // Block 2 held more of the first life's additions; they stay gone.
    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.entries_replayed, 2 * per_block);
    assert_eq!(report.tail, 2);
    let state = engine.lock();
    assert!(!state.vertex_exists(NodeId(500)));
    assert_eq!(state.index().len(), 2 * per_block);
    Ok(())
}

#[test]
fn torn_append_keeps_earlier_entries_of_its_block() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(4);
    let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
    {
        let mut state = engine.lock();
        for id in 0..5 {
            state.add_vertex(NodeId(id))?;
        }
        io.tear_next_write(6);
        assert!(state.add_vertex(NodeId(5)).is_err());
    }
    drop(engine);

    io.heal();
    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.entries_replayed, 5);
    assert_eq!(node_ids(&engine), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[test]
fn interrupted_checkpoint_keeps_previous_generation() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(4);
    let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
    {
        let mut state = engine.lock();
        for id in [10, 13, 16] {
            state.add_vertex(NodeId(id))?;
        }
        state.add_edge(NodeId(10), NodeId(16))?;
    }
    // Snapshot payload lands, superblock write does not.
    io.fail_after_writes(1);
    assert!(engine.checkpoint().is_err());
    assert_eq!(engine.stats().generation, 0);
    drop(engine);

    io.heal();
    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.generation, 0);
    assert_eq!(report.entries_replayed, 4);
    assert_eq!(node_ids(&engine), vec![10, 13, 16]);
    assert_eq!(edge_pairs(&engine), vec![(10, 16)]);
    Ok(())
}

#[test]
fn corrupt_superblock_is_fatal() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(2);
    {
        let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
        engine.lock().add_vertex(NodeId(1))?;
    }
    io.corrupt_byte(9);
    assert!(matches!(
        Engine::open(Arc::new(io), &options),
        Err(GraphError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn truncated_file_is_rejected() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(2);
    drop(Engine::open(Arc::new(io.clone()), &options)?);
    let len = io.len()?;
    io.truncate(len - 1)?;
    assert!(matches!(
        Engine::open(Arc::new(io), &options),
        Err(GraphError::Corruption(_))
    ));
    Ok(())
}

#[test]
fn full_log_rolls_into_checkpoint_and_recovers() -> Result<()> {
    let io = MemFileIo::new();
    let options = small_options(2);
    let (engine, _) = Engine::open(Arc::new(io.clone()), &options)?;
    let count = 2 * ENTRIES_PER_BLOCK as u64 + 10;
    {
        let mut state = engine.lock();
        for id in 0..count {
            state.add_vertex(NodeId(id * 3))?;
        }
    }
    let stats = engine.stats();
    assert_eq!(stats.generation, 1);
    assert_eq!(stats.nodes, count);
    drop(engine);

    let (engine, report) = Engine::open(Arc::new(io), &options)?;
    assert_eq!(report.generation, 1);
    assert_eq!(report.entries_replayed, 10);
    assert_eq!(engine.stats().nodes, count);
    Ok(())
}

#[derive(Clone, Debug)]
enum Step {
    AddNode(u64),
    RemoveNode(u64),
    AddEdge(u64, u64),
    RemoveEdge(u64, u64),
    Checkpoint,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0u64..12).prop_map(Step::AddNode),
        1 => (0u64..12).prop_map(Step::RemoveNode),
        4 => (0u64..12, 0u64..12).prop_map(|(a, b)| Step::AddEdge(a, b)),
        1 => (0u64..12, 0u64..12).prop_map(|(a, b)| Step::RemoveEdge(a, b)),
        1 => Just(Step::Checkpoint),
    ]
}

fn apply(model: &mut GraphIndex, step: &Step) {
    match *step {
        Step::AddNode(id) => {
            model.add_vertex(NodeId(id));
        }
        Step::RemoveNode(id) => {
            model.remove_vertex(NodeId(id));
        }
        Step::AddEdge(a, b) => {
            model.add_edge(NodeId(a), NodeId(b));
        }
        Step::RemoveEdge(a, b) => {
            model.remove_edge(NodeId(a), NodeId(b));
        }
        Step::Checkpoint => {}
    }
}

fn sorted_graph(index: &GraphIndex) -> (Vec<u64>, Vec<(u64, u64)>) {
    let mut nodes: Vec<u64> = index.vertex_ids().map(u64::from).collect();
    let mut edges: Vec<(u64, u64)> = index.edges().map(|(a, b)| (a.0, b.0)).collect();
    nodes.sort_unstable();
    edges.sort_unstable();
    (nodes, edges)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // The process dies at an arbitrary write; the restart must show exactly
    // the mutations that were acknowledged before it.
    #[test]
    fn restart_recovers_exactly_the_acknowledged_prefix(
        steps in prop::collection::vec(step(), 1..120),
        kill_after in 0u64..260,
    ) {
        let io = MemFileIo::new();
        let options = small_options(2);
        let (engine, _) = Engine::open(Arc::new(io.clone()), &options).expect("open");
        io.fail_after_writes(kill_after);
        let mut model = GraphIndex::new();
        {
            let mut state = engine.lock();
            for step in &steps {
                let outcome = match *step {
                    Step::AddNode(id) => state.add_vertex(NodeId(id)).map(drop),
                    Step::RemoveNode(id) => state.remove_vertex(NodeId(id)).map(drop),
                    Step::AddEdge(a, b) => state.add_edge(NodeId(a), NodeId(b)).map(drop),
                    Step::RemoveEdge(a, b) => state.remove_edge(NodeId(a), NodeId(b)).map(drop),
                    Step::Checkpoint => state.checkpoint().map(drop),
                };
                if outcome.is_err() {
                    break;
                }
                apply(&mut model, step);
            }
            prop_assert_eq!(sorted_graph(state.index()), sorted_graph(&model));
        }
        drop(engine);

        io.heal();
        let (engine, _) = Engine::open(Arc::new(io), &options).expect("reopen");
        prop_assert_eq!(sorted_graph(engine.lock().index()), sorted_graph(&model));
    }
}
