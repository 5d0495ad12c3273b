//! Binary-lifting LCA queries over a dominator tree.
//!
//! Precomputes `up[k][v]`, the `2^k`-th ancestor of `v`, in O(V log V);
//! each query then costs O(log depth). Roots are their own ancestors at
//! every level, so lifting saturates instead of walking off the tree.

use std::collections::HashMap;

use super::DominatorTree;

/// Ancestor tables for O(log depth) lowest-common-ancestor queries.
#[derive(Debug)]
pub struct LcaEngine {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    depth: Vec<u32>,
    /// `up[k][v]` is the `2^k`-th ancestor of `v`.
    up: Vec<Vec<u32>>,
    entry: String,
}

impl LcaEngine {
    /// Builds the lifting tables from a dominator tree.
    pub fn new(tree: &DominatorTree) -> Self {
        let ids: Vec<String> = tree.rpo().to_vec();
        let n = ids.len();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.clone(), idx))
            .collect();

        let mut depth = vec![0u32; n];
        let mut parent = vec![0u32; n];
        for (idx, id) in ids.iter().enumerate() {
            depth[idx] = tree.depth_of(id).unwrap_or(0);
            let idom = tree.immediate_dom(id).unwrap_or(id);
            parent[idx] = index.get(idom).copied().unwrap_or(idx) as u32;
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let levels = (u64::BITS - u64::from(max_depth).leading_zeros()).max(1) as usize;

        let mut up = Vec::with_capacity(levels);
        up.push(parent);
        for k in 1..levels {
            let prev = &up[k - 1];
            let next: Vec<u32> = (0..n).map(|v| prev[prev[v] as usize]).collect();
            up.push(next);
        }

        LcaEngine {
            ids,
            index,
            depth,
            up,
            entry: tree.entry().to_string(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn depth_of(&self, node: &str) -> Option<u32> {
        self.index.get(node).map(|&idx| self.depth[idx])
    }

    /// Lowest common ancestor of `a` and `b` in the dominator tree.
    ///
    /// Unknown nodes degrade to the entry, matching the lowest-common-
    /// dominator convention.
    pub fn query(&self, a: &str, b: &str) -> String {
        let (Some(&xa), Some(&xb)) = (self.index.get(a), self.index.get(b)) else {
            return self.entry.clone();
        };
        let (mut x, mut y) = if self.depth[xa] >= self.depth[xb] {
            (xa, xb)
        } else {
            (xb, xa)
        };

        // Lift the deeper node to the shallower depth.
        let mut diff = self.depth[x] - self.depth[y];
        let mut k = 0;
        while diff > 0 {
            if diff & 1 == 1 {
                x = self.up[k][x] as usize;
            }
            diff >>= 1;
            k += 1;
        }
        if x == y {
            return self.ids[x].clone();
        }

        // Descend over the deepest ancestor pair that still differs.
        for k in (0..self.up.len()).rev() {
            if self.up[k][x] != self.up[k][y] {
                x = self.up[k][x] as usize;
                y = self.up[k][y] as usize;
            }
        }
        let px = self.up[0][x] as usize;
        let py = self.up[0][y] as usize;
        if px != py {
            // Separate roots of a post-dominator forest.
            return self.entry.clone();
        }
        self.ids[px].clone()
    }
}
