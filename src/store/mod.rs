//! Hybrid exact/sketched edge storage.
//!
//! The store keeps freshly seen edges in per-vertex adjacency maps, which
//! are exact and cheap at low multiplicity, and hands edges back to the
//! caller for sketch representation once they fall below the current
//! subgraph frontier. Every edge is tagged with a depth derived from its
//! identifier; the frontier `cur_subgraph` rises when the store's footprint
//! exceeds its budget, and a cooperative contraction sweep then evicts
//! under-frontier entries vertex by vertex.

use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::sketch::bucket;
use crate::types::{edge_id, Edge, NodeId, SubgraphId};

/// An edge destination together with the depth tag of the full edge.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SubgraphTaggedUpdate {
    /// Depth tag of the edge, a pure function of its identifier.
    pub subgraph: SubgraphId,
    /// The neighbor the edge leads to.
    pub dst: NodeId,
}

/// Edges handed back by the store for sketch representation.
///
/// Owned by whichever component currently processes it; the updates all
/// share the source vertex `src`.
#[derive(Clone, Debug)]
pub struct TaggedUpdateBatch {
    /// Source vertex of every update in the batch.
    pub src: NodeId,
    /// Deepest sketch level the batch applies to (`first_es_subgraph - 1`).
    pub min_subgraph: u32,
    /// The store's subgraph frontier observed while building the batch.
    pub first_es_subgraph: u32,
    /// The edges to fold into `src`'s sketch.
    pub updates: Vec<SubgraphTaggedUpdate>,
}

impl TaggedUpdateBatch {
    fn empty(first_es_subgraph: u32) -> Self {
        Self {
            src: 0,
            min_subgraph: first_es_subgraph.saturating_sub(1),
            first_es_subgraph,
            updates: Vec::new(),
        }
    }
}

/// Bytes one adjacency record occupies, used for the footprint estimate.
pub const EDGE_RECORD_BYTES: usize = std::mem::size_of::<SubgraphTaggedUpdate>();

/// Memory-bounded hybrid edge store.
///
/// Adjacency entries hold edges tagged at or above `cur_subgraph`; anything
/// lower belongs in sketches and is handed back rather than stored. The
/// sharded lock table (one lock per vertex) serializes all mutation of a
/// vertex's map; global counters are atomic.
pub struct EdgeStore {
    seed: u64,
    num_vertices: NodeId,
    num_subgraphs: u32,
    cur_subgraph: AtomicU32,
    true_min_subgraph: AtomicU32,
    num_edges: AtomicI64,
    needs_contraction: AtomicU64,
    adjlist: Vec<Mutex<FxHashMap<NodeId, SubgraphId>>>,
    vertex_contracted: Vec<AtomicBool>,
    sketch_bytes: usize,
    contract_lock: Mutex<()>,
}

impl EdgeStore {
    /// Creates a store for `num_vertices` vertices with a footprint budget
    /// of `sketch_bytes`. `start_subgraph` sets the initial frontier; with
    /// the maximum value every edge is handed straight back for sketching.
    pub fn new(
        seed: u64,
        num_vertices: NodeId,
        sketch_bytes: usize,
        num_subgraphs: u32,
        start_subgraph: u32,
    ) -> Self {
        let mut adjlist = Vec::with_capacity(num_vertices as usize);
        let mut vertex_contracted = Vec::with_capacity(num_vertices as usize);
        for _ in 0..num_vertices {
            adjlist.push(Mutex::new(FxHashMap::default()));
            vertex_contracted.push(AtomicBool::new(true));
        }
        Self {
            seed,
            num_vertices,
            num_subgraphs,
            cur_subgraph: AtomicU32::new(start_subgraph),
            true_min_subgraph: AtomicU32::new(start_subgraph),
            num_edges: AtomicI64::new(0),
            needs_contraction: AtomicU64::new(u64::from(num_vertices)),
            adjlist,
            vertex_contracted,
            sketch_bytes,
            contract_lock: Mutex::new(()),
        }
    }

    /// Depth tag of an edge identifier under this store's hash seed.
    pub fn edge_subgraph(&self, edge: u64) -> SubgraphId {
        bucket::index_depth(edge, self.seed, self.num_subgraphs)
    }

    /// Inserts (or cancels) raw destination lists for `src`, computing tags
    /// in-store. Entry point while the caller knows of no sketch subgraphs.
    ///
    /// The returned batch carries every update that must be folded into a
    /// sketch instead: edges below the frontier, plus any entries evicted
    /// when this call had to contract a vertex on touch.
    pub fn insert_adj_edges(&self, src: NodeId, dst_vertices: &[NodeId]) -> TaggedUpdateBatch {
        let mut edges_delta: i64 = 0;
        let mut handed_back: Vec<SubgraphTaggedUpdate>;
        let cur_first;
        {
            let mut adj = self.adjlist[src as usize].lock();
            cur_first = self.cur_subgraph.load(Ordering::Acquire);
            handed_back = self.contract_on_touch(&mut adj, src, cur_first, &mut edges_delta);

            for &dst in dst_vertices {
                let tag = self.edge_subgraph(edge_id(src, dst));
                if tag < cur_first {
                    handed_back.push(SubgraphTaggedUpdate { subgraph: tag, dst });
                    continue;
                }
                toggle_edge(&mut adj, src, dst, tag, &mut edges_delta);
            }
        }
        self.add_edges(edges_delta);
        self.finish_insert(src, cur_first, handed_back)
    }

    /// Inserts (or cancels) pre-tagged destinations for `src`. Entry point
    /// once the caller computes tags itself; updates that fell below the
    /// frontier since the caller observed it bounce back in the batch.
    pub fn insert_tagged_edges(
        &self,
        src: NodeId,
        caller_first_es_subgraph: u32,
        dst_data: &[SubgraphTaggedUpdate],
    ) -> TaggedUpdateBatch {
        let mut edges_delta: i64 = 0;
        let mut handed_back: Vec<SubgraphTaggedUpdate>;
        let cur_first;
        {
            let mut adj = self.adjlist[src as usize].lock();
            cur_first = self.cur_subgraph.load(Ordering::Acquire);
            debug_assert!(caller_first_es_subgraph <= cur_first);
            handed_back = self.contract_on_touch(&mut adj, src, cur_first, &mut edges_delta);

            for &data in dst_data {
                if data.subgraph < cur_first {
                    handed_back.push(data);
                    continue;
                }
                toggle_edge(&mut adj, src, data.dst, data.subgraph, &mut edges_delta);
            }
        }
        self.add_edges(edges_delta);
        self.finish_insert(src, cur_first, handed_back)
    }

    /// Takes one step of a pending contraction sweep and returns the evicted
    /// entries of the swept vertex. Work distribution is lock-free: each
    /// caller claims the next vertex off a monotone counter. The caller that
    /// exhausts the counter publishes completion.
    pub fn vertex_advance_subgraph(&self, cur_first_es_subgraph: u32) -> TaggedUpdateBatch {
        loop {
            let claim = self.needs_contraction.fetch_add(1, Ordering::AcqRel);
            if claim >= u64::from(self.num_vertices) {
                if claim == u64::from(self.num_vertices) {
                    let _guard = self.contract_lock.lock();
                    #[cfg(debug_assertions)]
                    self.assert_contract_complete();
                    self.true_min_subgraph.fetch_add(1, Ordering::AcqRel);
                    info!(
                        cur_subgraph = self.cur_subgraph.load(Ordering::Acquire),
                        "edge store contraction complete"
                    );
                }
                return TaggedUpdateBatch::empty(cur_first_es_subgraph);
            }
            let src = claim as NodeId;

            let mut adj = self.adjlist[src as usize].lock();
            if !adj.is_empty() && !self.vertex_contracted[src as usize].load(Ordering::Relaxed) {
                let mut edges_delta = 0i64;
                let updates = self.contract_vertex(&mut adj, src, &mut edges_delta);
                drop(adj);
                self.add_edges(edges_delta);
                return TaggedUpdateBatch {
                    src,
                    min_subgraph: cur_first_es_subgraph.saturating_sub(1),
                    first_es_subgraph: cur_first_es_subgraph,
                    updates,
                };
            }
            self.vertex_contracted[src as usize].store(true, Ordering::Relaxed);
        }
    }

    /// Snapshot of the raw adjacency edge set, one entry per stored
    /// orientation. Only valid while no contraction is in progress.
    pub fn get_edges(&self) -> Vec<Edge> {
        debug_assert!(!self.contract_in_progress());
        let mut ret = Vec::with_capacity(self.num_edges());
        for src in 0..self.num_vertices {
            let adj = self.adjlist[src as usize].lock();
            for (&dst, _) in adj.iter() {
                ret.push(Edge { src, dst });
            }
        }
        ret
    }

    /// Number of stored adjacency records.
    pub fn num_edges(&self) -> usize {
        self.num_edges.load(Ordering::Relaxed).max(0) as usize
    }

    /// Estimated bytes of adjacency storage.
    pub fn footprint(&self) -> usize {
        self.num_edges() * EDGE_RECORD_BYTES
    }

    /// The current subgraph frontier.
    pub fn first_store_subgraph(&self) -> u32 {
        self.cur_subgraph.load(Ordering::Acquire)
    }

    /// Whether a contraction sweep has been started but not completed.
    pub fn contract_in_progress(&self) -> bool {
        self.true_min_subgraph.load(Ordering::Acquire) < self.cur_subgraph.load(Ordering::Acquire)
    }

    /// Evicts the touched vertex if a sweep is pending and it has not been
    /// contracted yet. Caller must hold the vertex's adjacency lock.
    fn contract_on_touch(
        &self,
        adj: &mut FxHashMap<NodeId, SubgraphId>,
        src: NodeId,
        cur_first: u32,
        edges_delta: &mut i64,
    ) -> Vec<SubgraphTaggedUpdate> {
        if self.true_min_subgraph.load(Ordering::Acquire) < cur_first
            && !self.vertex_contracted[src as usize].load(Ordering::Relaxed)
        {
            self.contract_vertex(adj, src, edges_delta)
        } else {
            Vec::new()
        }
    }

    /// Drops every under-frontier entry of `src` and returns them. Caller
    /// must hold the vertex's adjacency lock.
    fn contract_vertex(
        &self,
        adj: &mut FxHashMap<NodeId, SubgraphId>,
        src: NodeId,
        edges_delta: &mut i64,
    ) -> Vec<SubgraphTaggedUpdate> {
        if self.vertex_contracted[src as usize].swap(true, Ordering::Relaxed) {
            return Vec::new();
        }
        if adj.is_empty() {
            return Vec::new();
        }
        let cur = self.cur_subgraph.load(Ordering::Acquire);
        let mut evicted = Vec::new();
        adj.retain(|&dst, tag| {
            if *tag < cur {
                evicted.push(SubgraphTaggedUpdate {
                    subgraph: *tag,
                    dst,
                });
                false
            } else {
                true
            }
        });
        *edges_delta -= evicted.len() as i64;
        evicted
    }

    fn finish_insert(
        &self,
        src: NodeId,
        cur_first: u32,
        updates: Vec<SubgraphTaggedUpdate>,
    ) -> TaggedUpdateBatch {
        if updates.is_empty() && self.true_min_subgraph.load(Ordering::Acquire) < cur_first {
            // Nothing to hand back; contribute a sweep step instead.
            self.vertex_advance_subgraph(cur_first)
        } else {
            self.check_if_too_big();
            TaggedUpdateBatch {
                src,
                min_subgraph: cur_first.saturating_sub(1),
                first_es_subgraph: cur_first,
                updates,
            }
        }
    }

    /// Begins a contraction when the footprint exceeds the budget and no
    /// sweep is already running.
    fn check_if_too_big(&self) {
        let num_edges = self.num_edges();
        if num_edges * EDGE_RECORD_BYTES < self.sketch_bytes {
            return;
        }

        let _guard = self.contract_lock.lock();
        let cur = self.cur_subgraph.load(Ordering::Acquire);
        if self.true_min_subgraph.load(Ordering::Acquire) < cur {
            // Another thread already started the sweep.
            return;
        }
        if cur > self.num_subgraphs {
            // Every representable tag is already below the frontier.
            return;
        }

        for flag in &self.vertex_contracted {
            flag.store(false, Ordering::Relaxed);
        }
        self.needs_contraction.store(0, Ordering::Release);
        let new_frontier = self.cur_subgraph.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            cur_subgraph = new_frontier,
            num_edges,
            footprint = num_edges * EDGE_RECORD_BYTES,
            sketch_bytes = self.sketch_bytes,
            "edge store contracting"
        );
    }

    fn add_edges(&self, delta: i64) {
        if delta != 0 {
            self.num_edges.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Verifies that no under-frontier entry survived a completed sweep.
    /// A violation means the adjacency/sketch split is corrupt, which would
    /// silently poison every later query, so it aborts.
    #[cfg(debug_assertions)]
    fn assert_contract_complete(&self) {
        let cur = self.cur_subgraph.load(Ordering::Acquire);
        for src in 0..self.num_vertices {
            let adj = self.adjlist[src as usize].lock();
            for (&dst, &tag) in adj.iter() {
                assert!(
                    tag >= cur,
                    "contraction left edge ({src},{dst}) at subgraph {tag} below frontier {cur}"
                );
            }
        }
    }
}

/// Inserts the entry, or removes it when already present (symmetric
/// difference). A stored tag that disagrees with the incoming one means the
/// tagging function drifted; the store aborts rather than continue split
/// across representations.
fn toggle_edge(
    adj: &mut FxHashMap<NodeId, SubgraphId>,
    src: NodeId,
    dst: NodeId,
    tag: SubgraphId,
    edges_delta: &mut i64,
) {
    match adj.entry(dst) {
        Entry::Occupied(entry) => {
            let existing = entry.remove();
            assert_eq!(existing, tag, "edge store tag drifted for ({src},{dst})");
            *edges_delta -= 1;
        }
        Entry::Vacant(slot) => {
            slot.insert(tag);
            *edges_delta += 1;
        }
    }
}
