//! Per-vertex ownership wrapper around a sketch.

use parking_lot::Mutex;

use crate::error::Result;
use crate::sketch::{Bucket, Sketch, SketchSample};
use crate::types::EdgeId;

/// One vertex's sketch behind its own lock.
///
/// The lock is the per-vertex exclusivity point of the update path: two
/// workers holding batches for the same source serialize here, while updates
/// to distinct vertices proceed in parallel. Update order within a vertex is
/// irrelevant because sketch updates commute.
#[derive(Debug)]
pub struct Supernode {
    sketch: Mutex<Sketch>,
}

impl Supernode {
    /// Wraps a freshly built sketch.
    pub fn new(sketch: Sketch) -> Self {
        Self {
            sketch: Mutex::new(sketch),
        }
    }

    /// Folds a batch of edge updates into the vertex's sketch.
    pub fn batch_update(&self, edges: &[EdgeId]) {
        let mut sketch = self.sketch.lock();
        sketch.batch_update(edges);
    }

    /// XORs a precomputed delta bucket array into the vertex's sketch.
    pub fn apply_delta(&self, deltas: &[Bucket]) {
        self.sketch.lock().merge_raw_buckets(deltas);
    }

    /// Consumes one sample slot of the vertex's sketch.
    pub fn sample(&self) -> Result<SketchSample> {
        self.sketch.lock().sample()
    }

    /// Merges `other`'s sketch into this one. Called only from the query's
    /// merge phase, where the pause protocol guarantees no concurrent
    /// updates; the two locks are taken in call order.
    pub fn merge_from(&self, other: &Supernode) {
        let other_sketch = other.sketch.lock();
        self.sketch.lock().merge(&other_sketch);
    }

    /// Clones the current sketch state.
    pub fn snapshot(&self) -> Sketch {
        self.sketch.lock().clone()
    }

    /// Replaces the sketch state wholesale (query restore path).
    pub fn restore(&self, sketch: Sketch) {
        *self.sketch.lock() = sketch;
    }

    /// Runs `f` against the locked sketch.
    pub fn with_sketch<T>(&self, f: impl FnOnce(&Sketch) -> T) -> T {
        f(&self.sketch.lock())
    }
}
