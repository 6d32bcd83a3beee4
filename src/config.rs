//! Construction-time configuration for the graph orchestrator.

use std::path::PathBuf;

/// Tunables consumed by [`crate::Graph`] at construction.
///
/// Setters follow the builder-by-value convention so a configuration can be
/// assembled inline:
///
/// ```
/// use skein::GraphConfig;
/// let config = GraphConfig::default().num_workers(4).sketches_factor(1.5);
/// ```
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Number of ingestion worker threads.
    pub num_workers: usize,
    /// Multiplier on the default number of sample slots per sketch. Values
    /// above 1.0 trade memory for a lower query failure probability.
    pub sketches_factor: f64,
    /// Size of buffered update batches relative to the size of one sketch.
    pub batch_factor: f64,
    /// Back up sketch state in memory during a query. When `false`, state is
    /// spilled to `disk_dir` in the serialized sketch format instead.
    pub backup_in_mem: bool,
    /// Scratch directory for on-disk structures (query backups).
    pub disk_dir: PathBuf,
    /// Fixed seed for the sketch hash family. `None` draws a random seed;
    /// fix it to make two graphs bucket-comparable.
    pub seed: Option<u64>,
    /// Subgraph frontier the edge store starts at. Zero (the default) keeps
    /// every incoming edge in exact adjacency form until memory pressure
    /// forces a contraction; the maximum routes everything into sketches
    /// immediately.
    pub initial_subgraph: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            sketches_factor: 1.0,
            batch_factor: 1.0,
            backup_in_mem: true,
            disk_dir: PathBuf::from("."),
            seed: None,
            initial_subgraph: 0,
        }
    }
}

impl GraphConfig {
    /// More workers and larger batches; suited to high-velocity streams.
    pub fn high_throughput() -> Self {
        Self::default().num_workers(4).batch_factor(2.0)
    }

    /// Larger sketches and disk-backed query backups; suited to graphs near
    /// the memory budget.
    pub fn low_memory() -> Self {
        Self::default().backup_in_mem(false).batch_factor(0.5)
    }

    /// Sets the number of ingestion worker threads.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    /// Sets the sample-slot multiplier.
    pub fn sketches_factor(mut self, factor: f64) -> Self {
        self.sketches_factor = factor.max(1.0);
        self
    }

    /// Sets the update-batch size factor.
    pub fn batch_factor(mut self, factor: f64) -> Self {
        self.batch_factor = factor;
        self
    }

    /// Chooses between in-memory and on-disk query backups.
    pub fn backup_in_mem(mut self, backup_in_mem: bool) -> Self {
        self.backup_in_mem = backup_in_mem;
        self
    }

    /// Sets the scratch directory for on-disk structures.
    pub fn disk_dir(mut self, disk_dir: impl Into<PathBuf>) -> Self {
        self.disk_dir = disk_dir.into();
        self
    }

    /// Fixes the sketch hash seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the edge store's starting subgraph frontier.
    pub fn initial_subgraph(mut self, initial_subgraph: u32) -> Self {
        self.initial_subgraph = initial_subgraph;
        self
    }
}
