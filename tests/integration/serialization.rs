//! The raw sketch serialization format and the disk-backed query backup
//! path built on top of it.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use tempfile::tempdir;

use skein::sketch::{bucket, Sketch, SketchParams, BUCKET_BYTES};
use skein::types::edge_id;
use skein::{Edge, Graph, GraphConfig, NodeId};

#[test]
fn sketch_round_trips_through_a_file() {
    let params = SketchParams::for_vertices(256, 1.0);
    let mut sketch = Sketch::new(params, 99);
    for dst in 1..64u32 {
        sketch.update(edge_id(0, dst));
    }

    let dir = tempdir().unwrap();
    let path = dir.path().join("sketch.bin");
    let mut file = File::create(&path).unwrap();
    sketch.serialize(&mut file).unwrap();
    file.sync_all().unwrap();
    assert_eq!(
        file.metadata().unwrap().len(),
        params.serialized_size() as u64
    );

    let mut file = File::open(&path).unwrap();
    let restored = Sketch::deserialize(params, 99, &mut file).unwrap();
    assert_eq!(restored.buckets(), sketch.buckets());
}

#[test]
fn serialized_layout_is_alpha_then_gamma_little_endian() {
    let params = SketchParams::for_vertices(16, 1.0);
    let mut sketch = Sketch::new(params, 5);
    let id = edge_id(2, 3);
    sketch.update(id);

    let mut bytes = Vec::new();
    sketch.serialize(&mut bytes).unwrap();
    assert_eq!(bytes.len(), params.num_buckets() * BUCKET_BYTES);

    // The deterministic bucket is the final record and holds the only
    // update verbatim.
    let det = &bytes[(params.num_buckets() - 1) * BUCKET_BYTES..];
    assert_eq!(&det[..8], &id.to_le_bytes());
    assert_eq!(&det[8..12], &bucket::index_hash(id, 5).to_le_bytes());
}

#[test]
fn deserialize_is_the_readers_responsibility_to_frame() {
    // Two sketches written back to back with no framing; the reader must
    // know the shape out of band to split them.
    let params = SketchParams::for_vertices(64, 1.0);
    let mut first = Sketch::new(params, 1);
    first.update(edge_id(0, 1));
    let mut second = Sketch::new(params, 1);
    second.update(edge_id(2, 3));

    let dir = tempdir().unwrap();
    let path = dir.path().join("pair.bin");
    let mut file = File::create(&path).unwrap();
    first.serialize(&mut file).unwrap();
    second.serialize(&mut file).unwrap();
    file.flush().unwrap();

    let mut file = File::open(&path).unwrap();
    let a = Sketch::deserialize(params, 1, &mut file).unwrap();
    let b = Sketch::deserialize(params, 1, &mut file).unwrap();
    assert_eq!(a.buckets(), first.buckets());
    assert_eq!(b.buckets(), second.buckets());

    // Seeking into the middle of a record yields garbage or EOF, never a
    // silent partial read.
    file.seek(SeekFrom::End(-3)).unwrap();
    assert!(Sketch::deserialize(params, 1, &mut file).is_err());
}

#[test]
fn disk_backed_backup_keeps_queries_repeatable() {
    let dir = tempdir().unwrap();
    let config = GraphConfig::default()
        .seed(0xd15c)
        .initial_subgraph(64)
        .backup_in_mem(false)
        .disk_dir(dir.path());
    let graph = Graph::new(8, config).unwrap();
    for v in 0..7u32 {
        graph.update(Edge { src: v, dst: v + 1 }).unwrap();
    }

    let before: Vec<_> = (0..8).map(|v| graph.vertex_sketch(v)).collect();
    let first = graph.connected_components().unwrap();
    let second = graph.connected_components().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.into_components(), vec![(0..8u32).collect::<Vec<_>>()]);
    for (v, saved) in before.iter().enumerate() {
        let now = graph.vertex_sketch(v as NodeId);
        assert_eq!(now.buckets(), saved.buckets(), "vertex {v} not restored");
        assert_eq!(now.samples_consumed(), 0);
    }

    // The spill file is cleaned up after each restore.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .collect();
    assert!(leftovers.is_empty(), "backup files left behind: {leftovers:?}");
}

#[test]
fn disk_and_memory_backups_agree() {
    let dir = tempdir().unwrap();
    let base = GraphConfig::default().seed(31).initial_subgraph(64);
    let edges: Vec<(u32, u32)> = (0..5).map(|v| (v, v + 1)).collect();

    let mem_graph = Graph::new(6, base.clone()).unwrap();
    let disk_graph = Graph::new(
        6,
        base.backup_in_mem(false).disk_dir(dir.path()),
    )
    .unwrap();
    for &(src, dst) in &edges {
        mem_graph.update(Edge { src, dst }).unwrap();
        disk_graph.update(Edge { src, dst }).unwrap();
    }

    assert_eq!(
        mem_graph.connected_components().unwrap(),
        disk_graph.connected_components().unwrap()
    );
}
