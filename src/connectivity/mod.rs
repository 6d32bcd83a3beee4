//! The graph orchestrator: ingestion surface and connectivity queries.
//!
//! [`Graph`] owns one [`Supernode`] per vertex, the hybrid [`EdgeStore`],
//! and the worker pool that drains buffered updates into both. A
//! connectivity query is a Boruvka fixpoint over the current representative
//! set: every component samples one candidate cross-component edge from its
//! merged sketch and components that find one are united, until a full pass
//! merges nothing.

use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::accel::{CpuDeltaEngine, DeltaEngine};
use crate::config::GraphConfig;
use crate::error::{Result, SkeinError};
use crate::pipeline::{GutterSystem, StandaloneGutters, WorkerPool};
use crate::sketch::{Bucket, Sketch, SketchParams, SketchSample, Supernode};
use crate::store::{EdgeStore, SubgraphTaggedUpdate, TaggedUpdateBatch};
use crate::types::{edge_id, other_endpoint, unpack_edge, Edge, EdgeId, NodeId};

pub mod union_find;

pub use union_find::UnionFind;

/// A partition of the vertex set, as computed by a connectivity query.
///
/// Components are sorted by their smallest member and each component's
/// members are ascending, so two reports over the same partition compare
/// equal. The spanning forest holds one witness edge per merge the query
/// performed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConnectedComponents {
    components: Vec<Vec<NodeId>>,
    spanning_forest: Vec<Edge>,
}

impl ConnectedComponents {
    fn from_union_find(uf: &mut UnionFind, num_nodes: NodeId, mut forest: Vec<Edge>) -> Self {
        let mut by_root: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        for v in 0..num_nodes {
            by_root.entry(uf.find(v)).or_default().push(v);
        }
        let mut components: Vec<Vec<NodeId>> = by_root.into_values().collect();
        components.sort_by_key(|members| members[0]);
        forest.sort();
        Self {
            components,
            spanning_forest: forest,
        }
    }

    /// The disjoint vertex sets, covering `[0, num_nodes)` exactly once.
    pub fn components(&self) -> &[Vec<NodeId>] {
        &self.components
    }

    /// Number of components.
    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// One witness edge per merge performed by the query.
    pub fn spanning_forest(&self) -> &[Edge] {
        &self.spanning_forest
    }

    /// Consumes the report, yielding the raw partition.
    pub fn into_components(self) -> Vec<Vec<NodeId>> {
        self.components
    }
}

#[derive(Clone, Copy, Debug)]
enum QueryMode {
    Serial,
    Parallel,
}

/// Streaming connectivity over a fixed vertex set.
///
/// Constructed with a fixed `num_nodes`; mutated by [`Graph::update`] /
/// [`Graph::batch_update`] until a query pauses ingestion; queried with
/// [`Graph::connected_components`]. Union-find state is rebuilt by each
/// query, and sketch state is snapshotted around it, so queries are
/// repeatable.
pub struct Graph {
    inner: Arc<GraphInner>,
    gutters: Arc<dyn GutterSystem>,
    pool: WorkerPool,
    query_lock: Mutex<()>,
}

pub(crate) struct GraphInner {
    num_nodes: NodeId,
    seed: u64,
    params: SketchParams,
    supernodes: Vec<Supernode>,
    store: EdgeStore,
    engine: Box<dyn DeltaEngine>,
    update_locked: AtomicBool,
    num_updates: AtomicU64,
    backup_in_mem: bool,
    disk_dir: PathBuf,
}

impl Graph {
    /// Creates a graph with the standalone gutter backend and the CPU delta
    /// engine.
    pub fn new(num_nodes: NodeId, config: GraphConfig) -> Result<Graph> {
        let params = SketchParams::for_vertices(num_nodes.max(1), config.sketches_factor);
        let batch_size = desired_updates_per_batch(&params, config.batch_factor);
        let gutters = Arc::new(StandaloneGutters::new(num_nodes, batch_size));
        Self::with_collaborators(num_nodes, config, gutters, Box::new(CpuDeltaEngine))
    }

    /// Creates a graph with explicit buffering and accelerator
    /// collaborators. The gutter system feeds the worker pool; the delta
    /// engine computes bucket deltas for the sketch update path.
    pub fn with_collaborators(
        num_nodes: NodeId,
        config: GraphConfig,
        gutters: Arc<dyn GutterSystem>,
        engine: Box<dyn DeltaEngine>,
    ) -> Result<Graph> {
        if num_nodes == 0 {
            return Err(SkeinError::InvalidArgument(
                "graph requires at least one vertex".into(),
            ));
        }
        let seed = config.seed.unwrap_or_else(rand::random);
        let params = SketchParams::for_vertices(num_nodes, config.sketches_factor);
        let supernodes = (0..num_nodes)
            .map(|_| Supernode::new(Sketch::new(params, seed)))
            .collect();
        let num_subgraphs = num_nodes.next_power_of_two().trailing_zeros() + 1;
        let sketch_bytes = params.serialized_size() * num_nodes as usize;
        let store = EdgeStore::new(
            seed,
            num_nodes,
            sketch_bytes,
            num_subgraphs,
            config.initial_subgraph,
        );

        let inner = Arc::new(GraphInner {
            num_nodes,
            seed,
            params,
            supernodes,
            store,
            engine,
            update_locked: AtomicBool::new(false),
            num_updates: AtomicU64::new(0),
            backup_in_mem: config.backup_in_mem,
            disk_dir: config.disk_dir.clone(),
        });
        let pool = WorkerPool::start(config.num_workers, Arc::clone(&inner), Arc::clone(&gutters));
        info!(
            num_nodes,
            seed,
            workers = config.num_workers,
            num_buckets = params.num_buckets(),
            "graph initialized"
        );
        Ok(Graph {
            inner,
            gutters,
            pool,
            query_lock: Mutex::new(()),
        })
    }

    /// Number of vertices the graph was constructed with.
    pub fn num_nodes(&self) -> NodeId {
        self.inner.num_nodes
    }

    /// The seed of the sketch hash family.
    pub fn seed(&self) -> u64 {
        self.inner.seed
    }

    /// Total edge updates applied to sketches and the edge store so far.
    pub fn num_updates(&self) -> u64 {
        self.inner.num_updates.load(Ordering::Relaxed)
    }

    /// Buffers one undirected edge update. Both orientations enter the
    /// pipeline so each endpoint's sketch sees the edge; inserting an edge
    /// that is already present deletes it (symmetric difference).
    ///
    /// # Errors
    ///
    /// [`SkeinError::UpdateLocked`] while a query is running;
    /// [`SkeinError::InvalidArgument`] for out-of-range ids or self loops.
    pub fn update(&self, edge: Edge) -> Result<()> {
        self.ensure_unlocked()?;
        self.validate_endpoints(edge.src, edge.dst)?;
        self.gutters.insert(edge.src, edge.dst);
        self.gutters.insert(edge.dst, edge.src);
        Ok(())
    }

    /// Applies a batch of updates for one source vertex directly, bypassing
    /// the gutters. The caller is responsible for orientation symmetry: an
    /// undirected edge must eventually be applied from both endpoints.
    pub fn batch_update(&self, src: NodeId, dsts: &[NodeId]) -> Result<()> {
        for &dst in dsts {
            self.validate_endpoints(src, dst)?;
        }
        self.inner.apply_update_batch(src, dsts)
    }

    /// Drains every buffered update and waits until the pipeline is idle.
    /// On return, all updates issued before the call are visible to a
    /// subsequent query or state inspection.
    pub fn flush(&self) {
        let _query = self.query_lock.lock();
        self.gutters.force_flush();
        self.pool.pause();
        self.pool.resume();
    }

    /// Computes the connected components with the canonical serial
    /// Boruvka loop.
    ///
    /// # Errors
    ///
    /// [`SkeinError::OutOfQueries`] if a component's sketch runs out of
    /// sample slots before the fixpoint; retry with a larger
    /// `sketches_factor`. I/O errors only with disk-backed backups.
    pub fn connected_components(&self) -> Result<ConnectedComponents> {
        self.run_query(QueryMode::Serial)
    }

    /// Computes the connected components sampling each round's
    /// representatives in parallel. Produces the same partition as
    /// [`Graph::connected_components`] for the same sketch contents.
    pub fn connected_components_parallel(&self) -> Result<ConnectedComponents> {
        self.run_query(QueryMode::Parallel)
    }

    /// Clone of one vertex's sketch, for diagnostics and state comparison.
    pub fn vertex_sketch(&self, v: NodeId) -> Sketch {
        self.inner.supernodes[v as usize].snapshot()
    }

    /// Current byte footprint of the exact-adjacency side of the store.
    pub fn store_footprint(&self) -> usize {
        self.inner.store.footprint()
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.inner.update_locked.load(Ordering::Acquire) {
            return Err(SkeinError::UpdateLocked);
        }
        Ok(())
    }

    fn validate_endpoints(&self, src: NodeId, dst: NodeId) -> Result<()> {
        if src == dst {
            return Err(SkeinError::InvalidArgument(format!(
                "self loop on vertex {src}"
            )));
        }
        if src >= self.inner.num_nodes || dst >= self.inner.num_nodes {
            return Err(SkeinError::InvalidArgument(format!(
                "edge ({src},{dst}) outside [0,{})",
                self.inner.num_nodes
            )));
        }
        Ok(())
    }

    fn run_query(&self, mode: QueryMode) -> Result<ConnectedComponents> {
        let _query = self.query_lock.lock();
        debug!(?mode, "connectivity query: draining pipeline");
        self.gutters.force_flush();
        self.pool.pause();
        self.inner.update_locked.store(true, Ordering::Release);

        let outcome = self.run_locked_query(mode);

        self.inner.update_locked.store(false, Ordering::Release);
        self.pool.resume();
        outcome
    }

    fn run_locked_query(&self, mode: QueryMode) -> Result<ConnectedComponents> {
        let inner = &self.inner;
        // The snapshot barrier: outstanding contraction work and accelerator
        // batches must land before sampling begins.
        while inner.store.contract_in_progress() {
            let batch = inner
                .store
                .vertex_advance_subgraph(inner.store.first_store_subgraph());
            inner.apply_tagged_batch(&batch)?;
        }
        inner.engine.synchronize()?;

        let backup = inner.backup_sketches()?;
        let outcome = self.boruvka(mode);
        inner.restore_sketches(backup)?;
        outcome
    }

    fn boruvka(&self, mode: QueryMode) -> Result<ConnectedComponents> {
        let inner = &self.inner;
        let mut uf = UnionFind::new(inner.num_nodes);
        let mut reps: BTreeSet<NodeId> = (0..inner.num_nodes).collect();
        let mut forest: Vec<Edge> = Vec::new();

        // Adjacency-resident edges are exact; union them without sampling.
        for edge in inner.store.get_edges() {
            self.apply_merge(&mut uf, &mut reps, &mut forest, edge.src, edge.dst);
        }
        debug!(components = reps.len(), "exact edge phase complete");

        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let merged = match mode {
                QueryMode::Serial => self.sample_round_serial(&mut uf, &mut reps, &mut forest)?,
                QueryMode::Parallel => {
                    self.sample_round_parallel(&mut uf, &mut reps, &mut forest)?
                }
            };
            if !merged {
                break;
            }
        }
        debug!(rounds, components = reps.len(), "sampling fixpoint reached");
        Ok(ConnectedComponents::from_union_find(
            &mut uf,
            inner.num_nodes,
            forest,
        ))
    }

    /// One serial round: sample every live representative once.
    fn sample_round_serial(
        &self,
        uf: &mut UnionFind,
        reps: &mut BTreeSet<NodeId>,
        forest: &mut Vec<Edge>,
    ) -> Result<bool> {
        let mut merged = false;
        let roots: Vec<NodeId> = reps.iter().copied().collect();
        for root in roots {
            if uf.find(root) != root {
                continue;
            }
            match self.inner.supernodes[root as usize].sample()? {
                // No cross-component edge found this round; not an error.
                SketchSample::Zero | SketchSample::Fail => {}
                SketchSample::Good(id) => {
                    let edge = unpack_edge(id);
                    if self.apply_merge(uf, reps, forest, edge.src, edge.dst) {
                        merged = true;
                    }
                }
            }
        }
        Ok(merged)
    }

    /// One parallel round: all representatives sample concurrently, then
    /// merges resolve serially with union by size.
    fn sample_round_parallel(
        &self,
        uf: &mut UnionFind,
        reps: &mut BTreeSet<NodeId>,
        forest: &mut Vec<Edge>,
    ) -> Result<bool> {
        let inner = &self.inner;
        let roots: Vec<NodeId> = reps.iter().copied().collect();
        if roots.is_empty() {
            return Ok(false);
        }
        let threads = self.pool.num_workers().clamp(1, roots.len());
        let chunk = roots.len().div_ceil(threads);
        let samples: Mutex<Vec<(NodeId, Result<SketchSample>)>> =
            Mutex::new(Vec::with_capacity(roots.len()));
        thread::scope(|scope| {
            for slice in roots.chunks(chunk) {
                let samples = &samples;
                scope.spawn(move || {
                    let local: Vec<_> = slice
                        .iter()
                        .map(|&root| (root, inner.supernodes[root as usize].sample()))
                        .collect();
                    samples.lock().extend(local);
                });
            }
        });

        let mut merged = false;
        for (root, sample) in samples.into_inner() {
            match sample? {
                SketchSample::Zero | SketchSample::Fail => {}
                SketchSample::Good(id) => {
                    let edge = unpack_edge(id);
                    // The sampled edge crosses out of root's component;
                    // reconstruct its far endpoint from the near one.
                    let near = if uf.find(edge.src) == uf.find(root) {
                        edge.src
                    } else {
                        edge.dst
                    };
                    let far = other_endpoint(edge, near);
                    if self.apply_merge(uf, reps, forest, near, far) {
                        merged = true;
                    }
                }
            }
        }
        Ok(merged)
    }

    /// Unites two endpoints and mirrors the merge onto sketch state: the
    /// absorbed root's sketch folds into the survivor's, and the absorbed
    /// root leaves the representative set.
    fn apply_merge(
        &self,
        uf: &mut UnionFind,
        reps: &mut BTreeSet<NodeId>,
        forest: &mut Vec<Edge>,
        a: NodeId,
        b: NodeId,
    ) -> bool {
        match uf.union(a, b) {
            None => false,
            Some((survivor, absorbed)) => {
                self.inner.supernodes[survivor as usize]
                    .merge_from(&self.inner.supernodes[absorbed as usize]);
                reps.remove(&absorbed);
                forest.push(unpack_edge(edge_id(a, b)));
                true
            }
        }
    }
}

impl GraphInner {
    /// Applies one batch of destinations for `src`, splitting it across the
    /// edge store and the sketch according to each edge's depth tag, and
    /// folds any handed-back updates into the sketch.
    pub(crate) fn apply_update_batch(&self, src: NodeId, dsts: &[NodeId]) -> Result<()> {
        if self.update_locked.load(Ordering::Acquire) {
            return Err(SkeinError::UpdateLocked);
        }
        if dsts.is_empty() {
            return Ok(());
        }

        let cur_first = self.store.first_store_subgraph();
        let batch = if cur_first == 0 {
            // No sketch subgraphs yet; the store tags everything itself.
            self.store.insert_adj_edges(src, dsts)
        } else {
            let mut sketch_bound: Vec<EdgeId> = Vec::new();
            let mut store_bound: Vec<SubgraphTaggedUpdate> = Vec::with_capacity(dsts.len());
            for &dst in dsts {
                let id = edge_id(src, dst);
                let tag = self.store.edge_subgraph(id);
                if tag < cur_first {
                    sketch_bound.push(id);
                } else {
                    store_bound.push(SubgraphTaggedUpdate {
                        subgraph: tag,
                        dst,
                    });
                }
            }
            if !sketch_bound.is_empty() {
                self.apply_sketch_updates(src, &sketch_bound)?;
            }
            self.store.insert_tagged_edges(src, cur_first, &store_bound)
        };
        self.num_updates.fetch_add(dsts.len() as u64, Ordering::Relaxed);
        self.apply_tagged_batch(&batch)
    }

    /// Folds a store hand-back batch into the source vertex's sketch.
    pub(crate) fn apply_tagged_batch(&self, batch: &TaggedUpdateBatch) -> Result<()> {
        if batch.updates.is_empty() {
            return Ok(());
        }
        let ids: Vec<EdgeId> = batch
            .updates
            .iter()
            .map(|upd| edge_id(batch.src, upd.dst))
            .collect();
        self.apply_sketch_updates(batch.src, &ids)
    }

    /// Sketch update path: build a bucket delta through the accelerator
    /// contract, then XOR it into the vertex's sketch.
    fn apply_sketch_updates(&self, src: NodeId, edges: &[EdgeId]) -> Result<()> {
        let mut delta = vec![Bucket::default(); self.params.num_buckets()];
        self.engine.build_delta(&self.params, self.seed, edges, &mut delta)?;
        self.supernodes[src as usize].apply_delta(&delta);
        Ok(())
    }

    fn backup_sketches(&self) -> Result<SketchBackup> {
        if self.backup_in_mem {
            return Ok(SketchBackup::Memory(
                self.supernodes.iter().map(Supernode::snapshot).collect(),
            ));
        }
        fs::create_dir_all(&self.disk_dir)?;
        let path = self
            .disk_dir
            .join(format!("skein-query-backup-{}.bin", std::process::id()));
        let mut writer = BufWriter::new(fs::File::create(&path)?);
        for node in &self.supernodes {
            node.with_sketch(|sketch| -> Result<()> {
                // Cursor header first; the bucket dump itself is unframed.
                writer.write_all(&(sketch.samples_consumed() as u64).to_le_bytes())?;
                sketch.serialize(&mut writer)
            })?;
        }
        writer.flush()?;
        debug!(path = %path.display(), "sketch state spilled for query");
        Ok(SketchBackup::Disk(path))
    }

    fn restore_sketches(&self, backup: SketchBackup) -> Result<()> {
        match backup {
            SketchBackup::Memory(sketches) => {
                for (node, sketch) in self.supernodes.iter().zip(sketches) {
                    node.restore(sketch);
                }
            }
            SketchBackup::Disk(path) => {
                let mut reader = BufReader::new(fs::File::open(&path)?);
                for node in &self.supernodes {
                    let mut header = [0u8; 8];
                    reader.read_exact(&mut header)?;
                    let mut sketch = Sketch::deserialize(self.params, self.seed, &mut reader)?;
                    sketch.set_samples_consumed(u64::from_le_bytes(header) as usize);
                    node.restore(sketch);
                }
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

enum SketchBackup {
    Memory(Vec<Sketch>),
    Disk(PathBuf),
}

/// Batch size relative to one sketch's footprint, the way the buffering
/// collaborator sizes its leaves.
fn desired_updates_per_batch(params: &SketchParams, batch_factor: f64) -> usize {
    let per_sketch = params.serialized_size() / std::mem::size_of::<NodeId>();
    ((per_sketch as f64 * batch_factor) as usize).clamp(1, 1 << 20)
}
