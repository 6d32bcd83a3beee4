//! The fixed pool of ingestion workers and its pause/resume protocol.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::connectivity::GraphInner;
use crate::pipeline::GutterSystem;

struct PoolState {
    pause_requested: bool,
    shutdown: bool,
    parked: usize,
}

struct PoolShared {
    state: Mutex<PoolState>,
    // Workers wait here while paused; the coordinator waits on the other
    // side for the last worker to park.
    worker_cv: Condvar,
    coordinator_cv: Condvar,
}

/// A fixed set of long-lived threads pulling ready batches from the gutter
/// system and applying them to the graph.
///
/// Owned by the graph orchestrator; all dependencies are passed in at
/// construction. Lifecycle: [`WorkerPool::start`], then any number of
/// [`WorkerPool::pause`] / [`WorkerPool::resume`] cycles around queries,
/// and a final stop on drop.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    gutters: Arc<dyn GutterSystem>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `num_workers` threads draining `gutters` into `graph`.
    pub(crate) fn start(
        num_workers: usize,
        graph: Arc<GraphInner>,
        gutters: Arc<dyn GutterSystem>,
    ) -> WorkerPool {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                pause_requested: false,
                shutdown: false,
                parked: 0,
            }),
            worker_cv: Condvar::new(),
            coordinator_cv: Condvar::new(),
        });
        let handles = (0..num_workers.max(1))
            .map(|id| {
                let graph = Arc::clone(&graph);
                let gutters = Arc::clone(&gutters);
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(id, graph, gutters, shared))
            })
            .collect();
        WorkerPool {
            shared,
            gutters,
            handles,
        }
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.handles.len()
    }

    /// Parks every worker. Workers first drain the ready queue (the gutter
    /// system is switched to non-blocking so none of them can sleep on it),
    /// then report in; this call returns once the last one is parked, at
    /// which point no update is in flight.
    pub fn pause(&self) {
        {
            let mut state = self.shared.state.lock();
            state.pause_requested = true;
        }
        self.gutters.set_non_block(true);
        let mut state = self.shared.state.lock();
        while state.parked < self.handles.len() {
            self.shared.coordinator_cv.wait(&mut state);
        }
        debug!(workers = self.handles.len(), "worker pool paused");
    }

    /// Wakes every parked worker and restores blocking pulls.
    pub fn resume(&self) {
        {
            let mut state = self.shared.state.lock();
            state.pause_requested = false;
        }
        self.gutters.set_non_block(false);
        self.shared.worker_cv.notify_all();
    }

    fn stop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.gutters.shutdown();
        self.shared.worker_cv.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    id: usize,
    graph: Arc<GraphInner>,
    gutters: Arc<dyn GutterSystem>,
    shared: Arc<PoolShared>,
) {
    debug!(worker = id, "worker thread started");
    loop {
        match gutters.get_data() {
            Some(batch) => {
                if let Err(err) = graph.apply_update_batch(batch.src, &batch.dsts) {
                    // Reaching here means the pause handshake was violated.
                    warn!(worker = id, %err, "dropping update batch");
                }
            }
            None => {
                let mut state = shared.state.lock();
                if state.shutdown {
                    break;
                }
                if state.pause_requested {
                    state.parked += 1;
                    shared.coordinator_cv.notify_one();
                    while state.pause_requested && !state.shutdown {
                        shared.worker_cv.wait(&mut state);
                    }
                    state.parked -= 1;
                    if state.shutdown {
                        break;
                    }
                }
            }
        }
    }
    debug!(worker = id, "worker thread exiting");
}
