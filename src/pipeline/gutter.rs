//! The buffering collaborator contract and the in-memory standalone backend.
//!
//! Guttering batches raw per-source updates before they reach a worker, so
//! sketch updates amortize over whole batches. The core consumes the
//! subsystem only through [`GutterSystem`]; heavier disk-backed backends can
//! be provided externally.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::types::NodeId;

/// A batch of buffered updates, all sharing one source vertex.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkBatch {
    /// Source vertex of every update in the batch.
    pub src: NodeId,
    /// Destination vertices, in arrival order.
    pub dsts: Vec<NodeId>,
}

/// The insert/flush contract between the graph and its buffering
/// collaborator.
pub trait GutterSystem: Send + Sync {
    /// Buffers one directed half-edge update.
    fn insert(&self, src: NodeId, dst: NodeId);

    /// Moves every partially filled buffer into the ready queue.
    fn force_flush(&self);

    /// Switches [`GutterSystem::get_data`] between blocking and
    /// non-blocking behavior. Non-blocking mode is how the pause protocol
    /// lets workers drain the queue and park.
    fn set_non_block(&self, non_block: bool);

    /// Pulls the next ready batch. Blocks while the queue is empty unless
    /// non-blocking mode is set; returns `None` when there is nothing to
    /// return (non-blocking) or the system has shut down.
    fn get_data(&self) -> Option<WorkBatch>;

    /// Wakes every blocked consumer and makes all future pulls return
    /// `None`.
    fn shutdown(&self);
}

struct QueueState {
    ready: VecDeque<WorkBatch>,
    non_block: bool,
    shutdown: bool,
}

/// In-memory guttering: one leaf buffer per source vertex plus a shared
/// ready queue.
pub struct StandaloneGutters {
    leaves: Vec<Mutex<Vec<NodeId>>>,
    state: Mutex<QueueState>,
    available: Condvar,
    leaf_capacity: usize,
}

impl StandaloneGutters {
    /// Creates gutters for `num_leaves` sources; a leaf flushes into the
    /// ready queue once it holds `leaf_capacity` updates.
    pub fn new(num_leaves: NodeId, leaf_capacity: usize) -> Self {
        Self {
            leaves: (0..num_leaves).map(|_| Mutex::new(Vec::new())).collect(),
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                non_block: false,
                shutdown: false,
            }),
            available: Condvar::new(),
            leaf_capacity: leaf_capacity.max(1),
        }
    }

    fn push_ready(&self, batch: WorkBatch) {
        let mut state = self.state.lock();
        state.ready.push_back(batch);
        drop(state);
        self.available.notify_one();
    }
}

impl GutterSystem for StandaloneGutters {
    fn insert(&self, src: NodeId, dst: NodeId) {
        let full = {
            let mut leaf = self.leaves[src as usize].lock();
            leaf.push(dst);
            if leaf.len() >= self.leaf_capacity {
                Some(std::mem::take(&mut *leaf))
            } else {
                None
            }
        };
        if let Some(dsts) = full {
            self.push_ready(WorkBatch { src, dsts });
        }
    }

    fn force_flush(&self) {
        for (src, leaf) in self.leaves.iter().enumerate() {
            let dsts = std::mem::take(&mut *leaf.lock());
            if !dsts.is_empty() {
                self.push_ready(WorkBatch {
                    src: src as NodeId,
                    dsts,
                });
            }
        }
    }

    fn set_non_block(&self, non_block: bool) {
        let mut state = self.state.lock();
        state.non_block = non_block;
        drop(state);
        self.available.notify_all();
    }

    fn get_data(&self) -> Option<WorkBatch> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(batch) = state.ready.pop_front() {
                return Some(batch);
            }
            if state.non_block {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.available.notify_all();
    }
}
