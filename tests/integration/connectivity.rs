//! End-to-end connectivity queries.
//!
//! The small fixed scenarios run twice: once with the edge store holding
//! every edge in exact adjacency form (the default), and once with the
//! frontier forced all the way up so every update lands in sketches. A
//! BFS reference computed inside the test stands in for the external
//! verifier.

use std::collections::VecDeque;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use skein::{Edge, Graph, GraphConfig, NodeId};

const SEED: u64 = 0x5eed_cafe;

fn store_backed() -> GraphConfig {
    GraphConfig::default().seed(SEED)
}

/// Push the frontier above every representable tag so nothing is stored in
/// adjacency form and queries must run purely on sketches.
fn sketch_only() -> GraphConfig {
    GraphConfig::default().seed(SEED).initial_subgraph(64)
}

fn ingest(graph: &Graph, edges: &[(NodeId, NodeId)]) {
    for &(u, v) in edges {
        graph.update(Edge { src: u, dst: v }).unwrap();
    }
}

fn components_of(config: GraphConfig, num_nodes: NodeId, edges: &[(NodeId, NodeId)]) -> Vec<Vec<NodeId>> {
    let graph = Graph::new(num_nodes, config).unwrap();
    ingest(&graph, edges);
    graph.connected_components().unwrap().into_components()
}

/// Exact reference partition via BFS over an adjacency list.
fn reference_components(num_nodes: NodeId, edges: &[(NodeId, NodeId)]) -> Vec<Vec<NodeId>> {
    let mut adj = vec![Vec::new(); num_nodes as usize];
    for &(u, v) in edges {
        adj[u as usize].push(v);
        adj[v as usize].push(u);
    }
    let mut seen = vec![false; num_nodes as usize];
    let mut components = Vec::new();
    for start in 0..num_nodes {
        if seen[start as usize] {
            continue;
        }
        let mut members = Vec::new();
        let mut queue = VecDeque::from([start]);
        seen[start as usize] = true;
        while let Some(v) = queue.pop_front() {
            members.push(v);
            for &next in &adj[v as usize] {
                if !seen[next as usize] {
                    seen[next as usize] = true;
                    queue.push_back(next);
                }
            }
        }
        members.sort_unstable();
        components.push(members);
    }
    components
}

#[test]
fn chain_connects_all() {
    let edges = [(0, 1), (1, 2), (2, 3)];
    assert_eq!(
        components_of(store_backed(), 4, &edges),
        vec![vec![0, 1, 2, 3]]
    );
    assert_eq!(
        components_of(sketch_only(), 4, &edges),
        vec![vec![0, 1, 2, 3]]
    );
}

#[test]
fn disjoint_pairs_stay_disjoint() {
    let edges = [(0, 1), (2, 3)];
    let expected = vec![vec![0, 1], vec![2, 3]];
    assert_eq!(components_of(store_backed(), 4, &edges), expected);
    assert_eq!(components_of(sketch_only(), 4, &edges), expected);
}

#[test]
fn no_updates_yields_singletons() {
    let expected = vec![vec![0], vec![1], vec![2], vec![3]];
    assert_eq!(components_of(store_backed(), 4, &[]), expected);
    assert_eq!(components_of(sketch_only(), 4, &[]), expected);
}

#[test]
fn repeated_edge_cancels_out() {
    let edges = [(0, 1), (0, 1)];
    let expected = vec![vec![0], vec![1], vec![2], vec![3]];
    assert_eq!(components_of(store_backed(), 4, &edges), expected);
    assert_eq!(components_of(sketch_only(), 4, &edges), expected);
}

#[test]
fn deletion_splits_a_component() {
    let edges = [(0, 1), (1, 2), (1, 2)];
    let expected = vec![vec![0, 1], vec![2], vec![3]];
    assert_eq!(components_of(store_backed(), 4, &edges), expected);
    assert_eq!(components_of(sketch_only(), 4, &edges), expected);
}

#[test]
fn path_graph_converges_on_sketches() {
    let edges: Vec<(NodeId, NodeId)> = (0..7).map(|v| (v, v + 1)).collect();
    assert_eq!(
        components_of(sketch_only(), 8, &edges),
        vec![(0..8).collect::<Vec<_>>()]
    );
}

#[test]
fn star_graph_converges_on_sketches() {
    let edges: Vec<(NodeId, NodeId)> = (1..8).map(|leaf| (0, leaf)).collect();
    assert_eq!(
        components_of(sketch_only(), 8, &edges),
        vec![(0..8).collect::<Vec<_>>()]
    );
}

#[test]
fn split_frontier_mixes_store_and_sketches() {
    // A mid-level frontier leaves shallow-tagged edges in sketches and deep
    // ones in adjacency; the query has to stitch both together.
    let config = GraphConfig::default().seed(SEED).initial_subgraph(2);
    let edges: Vec<(NodeId, NodeId)> = (0..7).map(|v| (v, v + 1)).collect();
    let graph = Graph::new(8, config).unwrap();
    ingest(&graph, &edges);
    assert!(graph.store_footprint() <= 14 * 8);
    assert_eq!(
        graph.connected_components().unwrap().into_components(),
        vec![(0..8).collect::<Vec<_>>()]
    );
}

#[test]
fn parallel_variant_matches_serial() {
    let edges: Vec<(NodeId, NodeId)> = (0..3)
        .map(|v| (v, v + 1))
        .chain((4..7).map(|v| (v, v + 1)))
        .collect();
    for config in [store_backed(), sketch_only()] {
        let serial_graph = Graph::new(8, config.clone()).unwrap();
        ingest(&serial_graph, &edges);
        let serial = serial_graph.connected_components().unwrap();

        let parallel_graph = Graph::new(8, config.num_workers(4)).unwrap();
        ingest(&parallel_graph, &edges);
        let parallel = parallel_graph.connected_components_parallel().unwrap();

        assert_eq!(serial.components(), parallel.components());
    }
}

#[test]
fn random_graph_matches_bfs_reference() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let num_nodes: NodeId = 48;
    let mut edges = Vec::new();
    for u in 0..num_nodes {
        for v in (u + 1)..num_nodes {
            if rng.gen_bool(0.04) {
                edges.push((u, v));
            }
        }
    }

    let graph = Graph::new(num_nodes, store_backed().num_workers(4)).unwrap();
    ingest(&graph, &edges);
    assert_eq!(
        graph.connected_components().unwrap().into_components(),
        reference_components(num_nodes, &edges)
    );
}

#[test]
fn sketch_components_refine_true_components() {
    // Sketch sampling may under-merge with small probability, but a
    // reported component must never span two true components.
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let num_nodes: NodeId = 32;
    let mut edges = Vec::new();
    for u in 0..num_nodes {
        for v in (u + 1)..num_nodes {
            if rng.gen_bool(0.08) {
                edges.push((u, v));
            }
        }
    }
    let config = sketch_only().sketches_factor(3.0);
    let graph = Graph::new(num_nodes, config).unwrap();
    ingest(&graph, &edges);
    let reported = graph.connected_components().unwrap();

    let truth = reference_components(num_nodes, &edges);
    let mut true_comp_of = vec![0usize; num_nodes as usize];
    for (idx, members) in truth.iter().enumerate() {
        for &v in members {
            true_comp_of[v as usize] = idx;
        }
    }
    for members in reported.components() {
        let first = true_comp_of[members[0] as usize];
        assert!(
            members.iter().all(|&v| true_comp_of[v as usize] == first),
            "component {members:?} spans multiple true components"
        );
    }
}

#[test]
fn spanning_forest_witnesses_every_merge() {
    let edges: Vec<(NodeId, NodeId)> = (0..5).map(|v| (v, v + 1)).collect();
    let graph = Graph::new(8, store_backed()).unwrap();
    ingest(&graph, &edges);
    let report = graph.connected_components().unwrap();

    let num_nodes = 8usize;
    assert_eq!(
        report.spanning_forest().len(),
        num_nodes - report.num_components()
    );
    for edge in report.spanning_forest() {
        let in_same = report
            .components()
            .iter()
            .any(|members| members.contains(&edge.src) && members.contains(&edge.dst));
        assert!(in_same, "forest edge {edge:?} crosses components");
    }
}

#[test]
fn queries_are_repeatable() {
    let edges: Vec<(NodeId, NodeId)> = (0..7).map(|v| (v, v + 1)).collect();
    let graph = Graph::new(8, sketch_only()).unwrap();
    ingest(&graph, &edges);

    let first = graph.connected_components().unwrap();
    let second = graph.connected_components().unwrap();
    assert_eq!(first, second);
    // The backup discipline also restores the sample budget.
    for v in 0..8 {
        assert_eq!(graph.vertex_sketch(v).samples_consumed(), 0);
    }
}

#[test]
fn partition_covers_every_vertex_once() {
    let edges = [(0, 5), (3, 9), (9, 11)];
    let graph = Graph::new(12, store_backed()).unwrap();
    ingest(&graph, &edges);
    let report = graph.connected_components().unwrap();

    let mut seen: Vec<NodeId> = report
        .components()
        .iter()
        .flat_map(|members| members.iter().copied())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..12).collect::<Vec<_>>());
    assert!(report.components().iter().all(|members| !members.is_empty()));
}
