//! The accelerator contract for batched sketch updates.
//!
//! The graph never applies a batch of edge ids to a sketch directly; it
//! asks a [`DeltaEngine`] for the resulting bucket deltas and XORs them in.
//! Any implementation (a GPU kernel, a SIMD loop) is valid as long as its
//! deltas equal the effect of applying the updates one bucket at a time on
//! the CPU; [`CpuDeltaEngine`] is that reference loop.

use crate::error::{Result, SkeinError};
use crate::sketch::{self, Bucket, SketchParams};
use crate::types::EdgeId;

/// Computes bucket deltas for batches of edge updates.
pub trait DeltaEngine: Send + Sync {
    /// Fills `out` with the delta produced by applying `edges` to an empty
    /// bucket array of the given shape. `out` is zeroed by the caller and
    /// must be `params.num_buckets()` long.
    fn build_delta(
        &self,
        params: &SketchParams,
        seed: u64,
        edges: &[EdgeId],
        out: &mut [Bucket],
    ) -> Result<()>;

    /// Blocks until every previously submitted batch is visible. Queries
    /// call this before treating sketch state as a stable snapshot.
    fn synchronize(&self) -> Result<()>;
}

/// The reference engine: a sequential CPU loop over the batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuDeltaEngine;

impl DeltaEngine for CpuDeltaEngine {
    fn build_delta(
        &self,
        params: &SketchParams,
        seed: u64,
        edges: &[EdgeId],
        out: &mut [Bucket],
    ) -> Result<()> {
        if out.len() != params.num_buckets() {
            return Err(SkeinError::InvalidArgument(format!(
                "delta buffer holds {} buckets, sketch shape needs {}",
                out.len(),
                params.num_buckets()
            )));
        }
        sketch::apply_updates(params, seed, edges, out);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        // Deltas are computed synchronously; there is never outstanding work.
        Ok(())
    }
}
