//! Streaming connected components over sketched graph streams.
//!
//! `skein` maintains a sub-linear-memory summary of an undirected graph that
//! is presented as a stream of edge insertions and deletions, and answers
//! connected-component queries from that summary. Each vertex carries a
//! randomized linear sketch of its incident-edge multiset; a hybrid edge
//! store keeps recently seen edges in exact adjacency form until memory
//! pressure pushes them into the sketches; a fixed pool of worker threads
//! drains buffered updates; and a Boruvka-style query samples one candidate
//! cross-component edge per component until a fixpoint is reached.

#![warn(missing_docs)]

pub mod accel;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod pipeline;
pub mod sketch;
pub mod store;
pub mod types;

pub use config::GraphConfig;
pub use connectivity::{ConnectedComponents, Graph};
pub use error::{Result, SkeinError};
pub use types::{Edge, EdgeId, NodeId};
