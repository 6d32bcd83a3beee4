//! Concurrent ingestion: the buffering contract and the worker pool that
//! drains it.

pub mod gutter;
pub mod worker;

pub use gutter::{GutterSystem, StandaloneGutters, WorkBatch};
pub use worker::WorkerPool;
