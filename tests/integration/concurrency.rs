//! Concurrency behavior: order-independence of the update path, the
//! pause/lock protocol around queries, and ingestion racing a query.

use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use skein::accel::{CpuDeltaEngine, DeltaEngine};
use skein::pipeline::StandaloneGutters;
use skein::sketch::{Bucket, SketchParams};
use skein::{Edge, Graph, GraphConfig, NodeId, Result, SkeinError};

const SEED: u64 = 0xfeed_beef;

/// Directed update list for a random edge multiset, both orientations.
fn directed_updates(num_nodes: NodeId, rng_seed: u64) -> Vec<(NodeId, NodeId)> {
    let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
    let mut updates = Vec::new();
    for u in 0..num_nodes {
        for v in (u + 1)..num_nodes {
            if rng.gen_bool(0.1) {
                updates.push((u, v));
                updates.push((v, u));
            }
        }
    }
    updates
}

fn apply_across_threads(graph: &Graph, updates: &[(NodeId, NodeId)], threads: usize) {
    let chunk = updates.len().div_ceil(threads);
    thread::scope(|scope| {
        for slice in updates.chunks(chunk) {
            scope.spawn(move || {
                for &(src, dst) in slice {
                    graph.batch_update(src, &[dst]).unwrap();
                }
            });
        }
    });
}

fn assert_same_state(a: &Graph, b: &Graph, num_nodes: NodeId) {
    assert_eq!(a.store_footprint(), b.store_footprint());
    for v in 0..num_nodes {
        assert_eq!(
            a.vertex_sketch(v).buckets(),
            b.vertex_sketch(v).buckets(),
            "sketch state diverged at vertex {v}"
        );
    }
}

#[test]
fn interleaving_does_not_change_sketch_state() {
    let num_nodes: NodeId = 32;
    let updates = directed_updates(num_nodes, 1);
    let config = GraphConfig::default().seed(SEED).initial_subgraph(64);

    let serial = Graph::new(num_nodes, config.clone()).unwrap();
    apply_across_threads(&serial, &updates, 1);

    let threaded = Graph::new(num_nodes, config).unwrap();
    apply_across_threads(&threaded, &updates, 4);

    assert_same_state(&serial, &threaded, num_nodes);
}

#[test]
fn interleaving_does_not_change_store_state() {
    let num_nodes: NodeId = 32;
    let updates = directed_updates(num_nodes, 2);
    let config = GraphConfig::default().seed(SEED);

    let serial = Graph::new(num_nodes, config.clone()).unwrap();
    apply_across_threads(&serial, &updates, 1);

    let threaded = Graph::new(num_nodes, config).unwrap();
    apply_across_threads(&threaded, &updates, 4);

    assert_same_state(&serial, &threaded, num_nodes);
    assert_eq!(
        serial.connected_components().unwrap(),
        threaded.connected_components().unwrap()
    );
}

#[test]
fn gutter_pipeline_matches_direct_application() {
    let num_nodes: NodeId = 24;
    let updates = directed_updates(num_nodes, 3);
    let config = GraphConfig::default().seed(SEED).initial_subgraph(64);

    let direct = Graph::new(num_nodes, config.clone()).unwrap();
    apply_across_threads(&direct, &updates, 1);

    let buffered = Graph::new(num_nodes, config.num_workers(4)).unwrap();
    // Feed undirected edges through the external ingress; the graph emits
    // both orientations itself.
    for pair in updates.chunks(2) {
        let (src, dst) = pair[0];
        buffered.update(Edge { src, dst }).unwrap();
    }
    buffered.flush();

    assert_same_state(&direct, &buffered, num_nodes);
}

/// Delta engine that parks inside the query barrier until released, holding
/// the graph in its locked state long enough to observe it.
struct GatedEngine {
    release: Mutex<Receiver<()>>,
}

impl DeltaEngine for GatedEngine {
    fn build_delta(
        &self,
        params: &SketchParams,
        seed: u64,
        edges: &[u64],
        out: &mut [Bucket],
    ) -> Result<()> {
        CpuDeltaEngine.build_delta(params, seed, edges, out)
    }

    fn synchronize(&self) -> Result<()> {
        let _ = self.release.lock().recv();
        Ok(())
    }
}

#[test]
fn updates_are_rejected_while_query_holds_the_graph() {
    let num_nodes: NodeId = 8;
    let (release, gate) = channel();
    let gutters = Arc::new(StandaloneGutters::new(num_nodes, 1024));
    let engine = Box::new(GatedEngine {
        release: Mutex::new(gate),
    });
    let graph = Arc::new(
        Graph::with_collaborators(num_nodes, GraphConfig::default().seed(SEED), gutters, engine)
            .unwrap(),
    );
    graph.batch_update(0, &[1]).unwrap();
    graph.batch_update(1, &[0]).unwrap();

    let query_graph = Arc::clone(&graph);
    let query = thread::spawn(move || query_graph.connected_components().unwrap());

    // The query thread parks inside the snapshot barrier with the update
    // lock held; ingestion must observe the locked state.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut saw_locked = false;
    while Instant::now() < deadline {
        match graph.update(Edge { src: 2, dst: 3 }) {
            Err(SkeinError::UpdateLocked) => {
                saw_locked = true;
                break;
            }
            Ok(()) => thread::sleep(Duration::from_millis(1)),
            Err(err) => panic!("unexpected error during query: {err}"),
        }
    }
    release.send(()).unwrap();
    let report = query.join().unwrap();

    assert!(saw_locked, "query never surfaced the locked state");
    assert!(report
        .components()
        .iter()
        .any(|members| members == &vec![0, 1]));
    // Once the query completes the graph accepts updates again.
    graph.update(Edge { src: 2, dst: 3 }).unwrap();
}

#[test]
fn ingestion_retries_around_queries() {
    let num_nodes: NodeId = 16;
    let graph = Arc::new(
        Graph::new(num_nodes, GraphConfig::default().seed(SEED).num_workers(2)).unwrap(),
    );

    let writer_graph = Arc::clone(&graph);
    let writer = thread::spawn(move || {
        for v in 0..num_nodes - 1 {
            // Back off and retry when a query holds the lock.
            loop {
                match writer_graph.update(Edge { src: v, dst: v + 1 }) {
                    Ok(()) => break,
                    Err(SkeinError::UpdateLocked) => thread::sleep(Duration::from_millis(1)),
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
        }
    });

    // Interleave queries with the writer; every intermediate result is some
    // valid partition, and the final one must be the whole path.
    for _ in 0..5 {
        let report = graph.connected_components().unwrap();
        assert!(report.num_components() >= 1);
        thread::sleep(Duration::from_millis(2));
    }
    writer.join().unwrap();

    let report = graph.connected_components().unwrap();
    assert_eq!(
        report.into_components(),
        vec![(0..num_nodes).collect::<Vec<_>>()]
    );
}
