//! Flat-array union-find used during connectivity queries.

use crate::types::NodeId;

/// Disjoint-set forest over vertex ids, stored as a parent index array with
/// path halving on `find` and union by size. No parent pointers, no
/// ownership cycles; the structure is rebuilt by every query.
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<NodeId>,
    size: Vec<u32>,
}

impl UnionFind {
    /// `n` singleton sets.
    pub fn new(n: NodeId) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n as usize],
        }
    }

    /// Representative of `x`'s set. Each visited node is re-pointed at its
    /// grandparent, which halves the path without a second pass.
    pub fn find(&mut self, mut x: NodeId) -> NodeId {
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Merges the sets containing `a` and `b` by size.
    ///
    /// Returns `(survivor, absorbed)` roots when a merge happened, `None`
    /// when the two were already in the same set. The caller mirrors the
    /// merge onto whatever per-root state it maintains.
    pub fn union(&mut self, a: NodeId, b: NodeId) -> Option<(NodeId, NodeId)> {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return None;
        }
        let (survivor, absorbed) = if self.size[ra as usize] < self.size[rb as usize] {
            (rb, ra)
        } else {
            (ra, rb)
        };
        self.parent[absorbed as usize] = survivor;
        self.size[survivor as usize] += self.size[absorbed as usize];
        Some((survivor, absorbed))
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.parent.len()
    }

    /// Whether the structure is empty.
    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}
