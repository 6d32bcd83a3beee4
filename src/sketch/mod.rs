//! Linear sketches of incident-edge multisets.
//!
//! A [`Sketch`] summarizes the multiset of edges incident to one vertex in a
//! fixed number of XOR accumulator cells. Inserting the same edge twice
//! cancels, so deletions are modeled as repeat insertions; two sketches
//! built with the same parameters and seed merge by pairwise XOR, and the
//! merge of two vertices' sketches summarizes the symmetric difference of
//! their edge sets. [`Sketch::sample`] recovers, with high probability, one
//! surviving edge from that summary.

use std::io::{Read, Write};

use crate::error::{Result, SkeinError};
use crate::types::{EdgeId, NodeId};

pub mod bucket;
pub mod supernode;

pub use bucket::{Bucket, BUCKET_BYTES};
pub use supernode::Supernode;

/// Shape of a sketch: how many independent sample slots it carries and how
/// wide each slot's bucket grid is.
///
/// Two sketches are merge-compatible iff their parameters and seed agree.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SketchParams {
    /// Number of independent sample slots; each connectivity round consumes
    /// one slot per component.
    pub num_samples: usize,
    /// Columns backing each sample slot.
    pub cols_per_sample: usize,
    /// Depth levels per column.
    pub num_guesses: usize,
}

impl SketchParams {
    /// Parameters sized for a graph on `num_nodes` vertices.
    ///
    /// Depth levels cover the edge-id domain (`~num_nodes^2`); the sample
    /// budget grows with `log2(num_nodes)` and is scaled by
    /// `sketches_factor`.
    pub fn for_vertices(num_nodes: NodeId, sketches_factor: f64) -> Self {
        let lg = ceil_log2(u64::from(num_nodes.max(2)));
        let base_samples = ((f64::from(lg) / 0.585).ceil() as usize).max(1);
        let num_samples = ((base_samples as f64 * sketches_factor.max(1.0)).ceil() as usize).max(1);
        Self {
            num_samples,
            cols_per_sample: 1,
            num_guesses: (2 * lg as usize + 2).min(63),
        }
    }

    /// Total number of columns across all sample slots.
    pub fn num_columns(&self) -> usize {
        self.num_samples * self.cols_per_sample
    }

    /// Total number of buckets, including the deterministic bucket.
    pub fn num_buckets(&self) -> usize {
        self.num_columns() * self.num_guesses + 1
    }

    /// Size of one serialized sketch with these parameters.
    pub fn serialized_size(&self) -> usize {
        self.num_buckets() * BUCKET_BYTES
    }
}

fn ceil_log2(x: u64) -> u32 {
    debug_assert!(x >= 1);
    64 - (x - 1).leading_zeros()
}

/// Outcome of sampling one slot of a sketch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SketchSample {
    /// The sketch has never seen an edge (or every edge canceled out).
    Zero,
    /// A single surviving edge was recovered.
    Good(EdgeId),
    /// No bucket passed the checksum test this round; the slot is spent.
    Fail,
}

/// A fixed-size randomized summary of an edge multiset.
///
/// Sampling is destructive in the information-theoretic sense: each slot may
/// be consumed once, and a sketch whose slots are exhausted refuses further
/// queries. Callers that need repeatable queries must snapshot and restore
/// sketch state around each one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Sketch {
    params: SketchParams,
    seed: u64,
    buckets: Vec<Bucket>,
    sample_idx: usize,
}

impl Sketch {
    /// Creates an empty sketch.
    pub fn new(params: SketchParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            buckets: vec![Bucket::default(); params.num_buckets()],
            sample_idx: 0,
        }
    }

    /// The sketch's shape.
    pub fn params(&self) -> SketchParams {
        self.params
    }

    /// The seed of the sketch's hash family.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Raw bucket contents, in serialization order.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Number of sample slots already consumed.
    pub fn samples_consumed(&self) -> usize {
        self.sample_idx
    }

    /// Whether the sketch currently summarizes the empty multiset.
    pub fn is_zero(&self) -> bool {
        self.buckets[self.params.num_buckets() - 1].is_empty()
    }

    /// Folds one edge update into the sketch.
    pub fn update(&mut self, edge: EdgeId) {
        apply_update(&self.params, self.seed, edge, &mut self.buckets);
    }

    /// Folds a batch of edge updates into the sketch.
    pub fn batch_update(&mut self, edges: &[EdgeId]) {
        for &edge in edges {
            self.update(edge);
        }
    }

    /// XORs `other` into `self` bucket-for-bucket.
    ///
    /// Merging is commutative and associative, so concurrent merge orders
    /// during a query all land on the same state. `self`'s sample cursor is
    /// untouched: sampling only reads buckets, so slots consumed from
    /// `other` never perturb the merged contents.
    ///
    /// # Panics
    ///
    /// Panics if the two sketches' parameters or seeds differ; merging
    /// incompatible sketches would corrupt every later query.
    pub fn merge(&mut self, other: &Sketch) {
        assert_eq!(self.params, other.params, "sketch parameter mismatch in merge");
        assert_eq!(self.seed, other.seed, "sketch seed mismatch in merge");
        if other.is_zero() {
            return;
        }
        for (mine, theirs) in self.buckets.iter_mut().zip(other.buckets.iter()) {
            mine.alpha ^= theirs.alpha;
            mine.gamma ^= theirs.gamma;
        }
    }

    /// XORs a raw delta bucket array over the sketch, the hand-back half of
    /// the accelerator contract.
    ///
    /// # Panics
    ///
    /// Panics on a length mismatch, which indicates a delta built for a
    /// different sketch shape.
    pub fn merge_raw_buckets(&mut self, deltas: &[Bucket]) {
        assert_eq!(deltas.len(), self.buckets.len(), "delta bucket count mismatch");
        for (mine, delta) in self.buckets.iter_mut().zip(deltas.iter()) {
            mine.alpha ^= delta.alpha;
            mine.gamma ^= delta.gamma;
        }
    }

    /// Consumes one sample slot and tries to recover a single edge.
    ///
    /// The deterministic bucket is checked first: it covers the whole
    /// multiset, so an all-zero value means the multiset is empty and a good
    /// value short-circuits the column scan entirely (the common case for
    /// low-degree vertices). Otherwise the slot's column/guess grid is
    /// scanned for any good bucket.
    ///
    /// # Errors
    ///
    /// [`SkeinError::OutOfQueries`] once every slot has been consumed.
    pub fn sample(&mut self) -> Result<SketchSample> {
        if self.sample_idx >= self.params.num_samples {
            return Err(SkeinError::OutOfQueries);
        }
        let idx = self.sample_idx;
        self.sample_idx += 1;

        let det = self.buckets[self.params.num_buckets() - 1];
        if det.is_empty() {
            return Ok(SketchSample::Zero);
        }
        if det.is_good(self.seed) {
            return Ok(SketchSample::Good(det.alpha));
        }

        let first_column = idx * self.params.cols_per_sample;
        for col in first_column..first_column + self.params.cols_per_sample {
            for guess in 0..self.params.num_guesses {
                let candidate = self.buckets[col * self.params.num_guesses + guess];
                if candidate.is_good(self.seed) {
                    return Ok(SketchSample::Good(candidate.alpha));
                }
            }
        }
        Ok(SketchSample::Fail)
    }

    /// Zeroes every bucket and rewinds the sample cursor.
    pub fn reset(&mut self) {
        self.buckets.fill(Bucket::default());
        self.sample_idx = 0;
    }

    /// Writes the bucket array in order: `alpha` then `gamma`, little-endian,
    /// no framing. Readers must know the parameters and seed out of band.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = vec![0u8; self.params.serialized_size()];
        for (i, bkt) in self.buckets.iter().enumerate() {
            bkt.write_to(&mut buf[i * BUCKET_BYTES..(i + 1) * BUCKET_BYTES]);
        }
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Reads a sketch previously written by [`Sketch::serialize`]. The
    /// parameters and seed are supplied by the caller; the cursor starts at
    /// zero and callers tracking a cursor restore it separately.
    pub fn deserialize<R: Read>(params: SketchParams, seed: u64, reader: &mut R) -> Result<Sketch> {
        let mut buf = vec![0u8; params.serialized_size()];
        reader.read_exact(&mut buf)?;
        let buckets = buf
            .chunks_exact(BUCKET_BYTES)
            .map(Bucket::read_from)
            .collect();
        Ok(Sketch {
            params,
            seed,
            buckets,
            sample_idx: 0,
        })
    }

    pub(crate) fn set_samples_consumed(&mut self, sample_idx: usize) {
        self.sample_idx = sample_idx;
    }
}

pub(crate) fn column_seed(seed: u64, column: usize) -> u64 {
    seed.wrapping_add(5 * (column as u64 + 1))
}

/// Applies one edge update to a raw bucket array. This is the sequential
/// reference behavior accelerator implementations must reproduce.
#[cfg(not(feature = "strict-l0"))]
pub(crate) fn apply_update(params: &SketchParams, seed: u64, edge: EdgeId, buckets: &mut [Bucket]) {
    let checksum = bucket::index_hash(edge, seed);
    buckets[params.num_buckets() - 1].update(edge, checksum);
    for col in 0..params.num_columns() {
        let depth = bucket::index_depth(edge, column_seed(seed, col), params.num_guesses as u32);
        if (depth as usize) < params.num_guesses {
            buckets[col * params.num_guesses + depth as usize].update(edge, checksum);
        }
    }
}

/// Strict L0 mode: update every bucket at depth `<=` the computed depth, so
/// each bucket sees a uniform subsample of the multiset.
#[cfg(feature = "strict-l0")]
pub(crate) fn apply_update(params: &SketchParams, seed: u64, edge: EdgeId, buckets: &mut [Bucket]) {
    let checksum = bucket::index_hash(edge, seed);
    buckets[params.num_buckets() - 1].update(edge, checksum);
    for col in 0..params.num_columns() {
        let depth = bucket::index_depth(edge, column_seed(seed, col), params.num_guesses as u32);
        if (depth as usize) < params.num_guesses {
            for guess in 0..=depth as usize {
                buckets[col * params.num_guesses + guess].update(edge, checksum);
            }
        }
    }
}

pub(crate) fn apply_updates(
    params: &SketchParams,
    seed: u64,
    edges: &[EdgeId],
    buckets: &mut [Bucket],
) {
    for &edge in edges {
        apply_update(params, seed, edge, buckets);
    }
}
