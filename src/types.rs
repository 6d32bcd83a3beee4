//! Identifier types and the canonical edge encoding.

use serde::Serialize;

/// Identifier of a vertex, in `[0, num_nodes)`.
pub type NodeId = u32;

/// Canonical identifier of an undirected edge: the packed endpoint pair.
pub type EdgeId = u64;

/// Depth tag assigned to an edge by hashing its identifier; decides whether
/// the edge lives in raw adjacency or in sketch form.
pub type SubgraphId = u32;

/// An undirected edge between two vertices.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    /// One endpoint.
    pub src: NodeId,
    /// The other endpoint.
    pub dst: NodeId,
}

/// Packs an endpoint pair into its canonical edge identifier.
///
/// Both orientations of an undirected edge map to the same id: the smaller
/// endpoint occupies the high half. Self loops have no identifier.
pub fn edge_id(u: NodeId, v: NodeId) -> EdgeId {
    debug_assert_ne!(u, v, "self loops carry no edge id");
    let (lo, hi) = if u < v { (u, v) } else { (v, u) };
    (u64::from(lo) << 32) | u64::from(hi)
}

/// Recovers both endpoints from a canonical edge identifier.
pub fn unpack_edge(id: EdgeId) -> Edge {
    Edge {
        src: (id >> 32) as NodeId,
        dst: (id & 0xffff_ffff) as NodeId,
    }
}

/// Given one endpoint of an edge, reconstructs the other without a lookup.
pub fn other_endpoint(edge: Edge, endpoint: NodeId) -> NodeId {
    debug_assert!(endpoint == edge.src || endpoint == edge.dst);
    edge.src ^ edge.dst ^ endpoint
}
