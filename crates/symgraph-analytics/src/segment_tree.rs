//! Array-backed segment tree with lazy range additions.
//!
//! 1-indexed, padded to the next power of two; padded leaves hold the
//! aggregation identity so non-power-of-two lengths fold correctly. Range
//! updates exist only for SUM and defer per-element deltas in a lazy
//! array. Queries are `&self`: pending deltas are applied logically on the
//! way down instead of being pushed, so a reader-writer lock can serve
//! concurrent queries (see [`SharedSegmentTree`]).
//!
//! SUM combines saturate on overflow instead of wrapping; a saturation is
//! logged as a diagnostic.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use symgraph_core::AnalyticsError;

/// Supported aggregation functions and their identity elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Min,
    Max,
    Gcd,
}

impl Aggregation {
    pub fn identity(self) -> i64 {
        match self {
            Aggregation::Sum => 0,
            Aggregation::Min => i64::MAX,
            Aggregation::Max => i64::MIN,
            Aggregation::Gcd => 0,
        }
    }

    fn combine(self, a: i64, b: i64) -> i64 {
        match self {
            Aggregation::Sum => match a.checked_add(b) {
                Some(sum) => sum,
                None => {
                    warn!(a, b, "segment tree SUM saturated");
                    a.saturating_add(b)
                }
            },
            Aggregation::Min => a.min(b),
            Aggregation::Max => a.max(b),
            Aggregation::Gcd => gcd(a, b),
        }
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a as i64
}

/// Counters exposed by [`SegmentTree::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTreeStats {
    pub length: usize,
    pub padded_size: usize,
    pub version: u64,
    pub aggregation: Aggregation,
}

/// The tree itself. Mutation requires `&mut`; use [`SharedSegmentTree`]
/// for concurrent access.
#[derive(Debug, Clone)]
pub struct SegmentTree {
    /// Logical length (the backing array's length).
    n: usize,
    /// Padded leaf count, a power of two.
    size: usize,
    /// 1-indexed aggregate array of length `2 * size`.
    tree: Vec<i64>,
    /// Pending per-element delta for each internal node's children.
    lazy: Vec<i64>,
    has_lazy: Vec<bool>,
    agg: Aggregation,
    /// Increments on every mutation; part of the cache key.
    version: u64,
}

impl SegmentTree {
    /// Builds bottom-up in O(N). Fails on an empty source array or a
    /// length whose padded tree would overflow.
    pub fn new(values: &[i64], agg: Aggregation) -> Result<Self, AnalyticsError> {
        if values.is_empty() {
            return Err(AnalyticsError::invalid_input("empty source array"));
        }
        let size = values
            .len()
            .checked_next_power_of_two()
            .and_then(|size| size.checked_mul(2).map(|_| size))
            .ok_or_else(|| AnalyticsError::invalid_input("array size overflow"))?;

        let mut tree = vec![agg.identity(); 2 * size];
        tree[size..size + values.len()].copy_from_slice(values);
        for node in (1..size).rev() {
            tree[node] = agg.combine(tree[2 * node], tree[2 * node + 1]);
        }
        Ok(SegmentTree {
            n: values.len(),
            size,
            tree,
            lazy: vec![0; 2 * size],
            has_lazy: vec![false; 2 * size],
            agg,
            version: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn aggregation(&self) -> Aggregation {
        self.agg
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn check_range(&self, left: usize, right: usize) -> Result<(), AnalyticsError> {
        if left > right || right >= self.n {
            return Err(AnalyticsError::InvalidInput {
                reason: format!("invalid range [{left}, {right}] for length {}", self.n),
            });
        }
        Ok(())
    }

    /// Inclusive range query. Lazy deltas along the descent are applied
    /// logically, so this never mutates the tree.
    pub fn query(&self, left: usize, right: usize) -> Result<i64, AnalyticsError> {
        self.check_range(left, right)?;
        Ok(self.query_rec(1, 0, self.size - 1, left, right, 0))
    }

    fn query_rec(
        &self,
        node: usize,
        node_lo: usize,
        node_hi: usize,
        left: usize,
        right: usize,
        pending: i64,
    ) -> i64 {
        if right < node_lo || node_hi < left {
            return self.agg.identity();
        }
        if left <= node_lo && node_hi <= right {
            return self.apply_pending(self.tree[node], pending, node_hi - node_lo + 1);
        }
        let child_pending = if self.has_lazy[node] {
            pending + self.lazy[node]
        } else {
            pending
        };
        let mid = (node_lo + node_hi) / 2;
        let low = self.query_rec(2 * node, node_lo, mid, left, right, child_pending);
        let high = self.query_rec(2 * node + 1, mid + 1, node_hi, left, right, child_pending);
        self.agg.combine(low, high)
    }

    /// A pending per-element delta applied to a whole node. Only SUM ever
    /// has pending deltas.
    fn apply_pending(&self, value: i64, pending: i64, span: usize) -> i64 {
        if pending == 0 {
            return value;
        }
        self.agg
            .combine(value, pending.saturating_mul(span as i64))
    }

    /// Physically pushes a node's lazy delta one level down.
    fn push_down(&mut self, node: usize, node_lo: usize, node_hi: usize) {
        if !self.has_lazy[node] {
            return;
        }
        let delta = self.lazy[node];
        let mid = (node_lo + node_hi) / 2;
        let spans = [(2 * node, mid - node_lo + 1), (2 * node + 1, node_hi - mid)];
        for (child, span) in spans {
            self.tree[child] = self.apply_pending(self.tree[child], delta, span);
            if child < self.size {
                self.lazy[child] += delta;
                self.has_lazy[child] = true;
            }
        }
        self.lazy[node] = 0;
        self.has_lazy[node] = false;
    }

    /// Point assignment. Pushes pending deltas down the path, rewrites
    /// the leaf, recomputes ancestors.
    pub fn update(&mut self, index: usize, value: i64) -> Result<(), AnalyticsError> {
        self.check_range(index, index)?;
        self.update_rec(1, 0, self.size - 1, index, value);
        self.version += 1;
        Ok(())
    }

    fn update_rec(&mut self, node: usize, node_lo: usize, node_hi: usize, index: usize, value: i64) {
        if node_lo == node_hi {
            self.tree[node] = value;
            return;
        }
        self.push_down(node, node_lo, node_hi);
        let mid = (node_lo + node_hi) / 2;
        if index <= mid {
            self.update_rec(2 * node, node_lo, mid, index, value);
        } else {
            self.update_rec(2 * node + 1, mid + 1, node_hi, index, value);
        }
        self.tree[node] = self.agg.combine(self.tree[2 * node], self.tree[2 * node + 1]);
    }

    /// Adds `delta` to every element of the inclusive range. SUM only.
    pub fn range_update(
        &mut self,
        left: usize,
        right: usize,
        delta: i64,
    ) -> Result<(), AnalyticsError> {
        if self.agg != Aggregation::Sum {
            return Err(AnalyticsError::invalid_input(
                "range update requires the SUM aggregation",
            ));
        }
        self.check_range(left, right)?;
        self.range_update_rec(1, 0, self.size - 1, left, right, delta);
        self.version += 1;
        Ok(())
    }

    fn range_update_rec(
        &mut self,
        node: usize,
        node_lo: usize,
        node_hi: usize,
        left: usize,
        right: usize,
        delta: i64,
    ) {
        if right < node_lo || node_hi < left {
            return;
        }
        if left <= node_lo && node_hi <= right {
            let span = node_hi - node_lo + 1;
            self.tree[node] = self.apply_pending(self.tree[node], delta, span);
            if node < self.size {
                self.lazy[node] += delta;
                self.has_lazy[node] = true;
            }
            return;
        }
        let mid = (node_lo + node_hi) / 2;
        self.range_update_rec(2 * node, node_lo, mid, left, right, delta);
        self.range_update_rec(2 * node + 1, mid + 1, node_hi, left, right, delta);
        self.tree[node] = self.agg.combine(self.tree[2 * node], self.tree[2 * node + 1]);
    }

    /// Current value of one element, pending deltas included.
    pub fn get_value(&self, index: usize) -> Result<i64, AnalyticsError> {
        self.check_range(index, index)?;
        let mut pending = 0i64;
        let mut node = 1usize;
        let (mut lo, mut hi) = (0usize, self.size - 1);
        while lo < hi {
            if self.has_lazy[node] {
                pending += self.lazy[node];
            }
            let mid = (lo + hi) / 2;
            if index <= mid {
                node = 2 * node;
                hi = mid;
            } else {
                node = 2 * node + 1;
                lo = mid + 1;
            }
        }
        Ok(self.tree[node] + pending)
    }

    /// Structural self-check: the root must equal the fold of all elements
    /// and every internal node must equal the combine of its children.
    /// Nodes with a pending lazy delta are skipped (their children are
    /// intentionally stale).
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        let mut fold = self.get_value(0)?;
        for index in 1..self.n {
            fold = self.agg.combine(fold, self.get_value(index)?);
        }
        if self.tree[1] != fold {
            return Err(AnalyticsError::consistency(format!(
                "root {} does not equal element fold {fold}",
                self.tree[1]
            )));
        }
        for node in 1..self.size {
            if self.has_lazy[node] {
                continue;
            }
            let expected = self.agg.combine(self.tree[2 * node], self.tree[2 * node + 1]);
            if self.tree[node] != expected {
                return Err(AnalyticsError::consistency(format!(
                    "node {node} holds {} but its children combine to {expected}",
                    self.tree[node]
                )));
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> SegmentTreeStats {
        SegmentTreeStats {
            length: self.n,
            padded_size: self.size,
            version: self.version,
            aggregation: self.agg,
        }
    }

    /// Stable cache key over structure and version.
    pub fn cache_key(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{:?}", self.agg).as_bytes());
        hasher.update(&(self.n as u64).to_le_bytes());
        hasher.update(&(self.size as u64).to_le_bytes());
        hasher.update(&self.version.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Reader-writer guarded tree: queries take the read lock, mutations the
/// write lock.
#[derive(Debug)]
pub struct SharedSegmentTree {
    inner: RwLock<SegmentTree>,
}

impl SharedSegmentTree {
    pub fn new(values: &[i64], agg: Aggregation) -> Result<Self, AnalyticsError> {
        Ok(SharedSegmentTree {
            inner: RwLock::new(SegmentTree::new(values, agg)?),
        })
    }

    pub fn query(&self, left: usize, right: usize) -> Result<i64, AnalyticsError> {
        self.inner.read().unwrap().query(left, right)
    }

    pub fn get_value(&self, index: usize) -> Result<i64, AnalyticsError> {
        self.inner.read().unwrap().get_value(index)
    }

    pub fn update(&self, index: usize, value: i64) -> Result<(), AnalyticsError> {
        self.inner.write().unwrap().update(index, value)
    }

    pub fn range_update(&self, left: usize, right: usize, delta: i64) -> Result<(), AnalyticsError> {
        self.inner.write().unwrap().range_update(left, right, delta)
    }

    pub fn validate(&self) -> Result<(), AnalyticsError> {
        self.inner.read().unwrap().validate()
    }

    pub fn stats(&self) -> SegmentTreeStats {
        self.inner.read().unwrap().stats()
    }

    pub fn cache_key(&self) -> String {
        self.inner.read().unwrap().cache_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: [i64; 8] = [3, 1, 4, 2, 5, 7, 6, 8];

    #[test]
    fn empty_array_is_rejected() {
        assert!(SegmentTree::new(&[], Aggregation::Sum).is_err());
    }

    #[test]
    fn sum_queries_on_the_sample() {
        let tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        assert_eq!(tree.query(2, 5).unwrap(), 18);
        assert_eq!(tree.query(0, 7).unwrap(), 36);
        assert_eq!(tree.query(4, 4).unwrap(), 5);
    }

    #[test]
    fn range_update_then_full_query() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        tree.range_update(1, 4, 10).unwrap();
        assert_eq!(tree.query(0, 7).unwrap(), 76);
        assert_eq!(tree.query(1, 1).unwrap(), 11);
        assert_eq!(tree.query(0, 0).unwrap(), 3);
        assert_eq!(tree.get_value(4).unwrap(), 15);
        assert_eq!(tree.get_value(5).unwrap(), 7);
        tree.validate().unwrap();
    }

    #[test]
    fn min_max_gcd_aggregations() {
        let min = SegmentTree::new(&SAMPLE, Aggregation::Min).unwrap();
        assert_eq!(min.query(0, 7).unwrap(), 1);
        assert_eq!(min.query(4, 6).unwrap(), 5);

        let max = SegmentTree::new(&SAMPLE, Aggregation::Max).unwrap();
        assert_eq!(max.query(0, 7).unwrap(), 8);
        assert_eq!(max.query(0, 3).unwrap(), 4);

        let g = SegmentTree::new(&[12, 18, 24], Aggregation::Gcd).unwrap();
        assert_eq!(g.query(0, 2).unwrap(), 6);
        assert_eq!(g.query(0, 1).unwrap(), 6);
        assert_eq!(g.query(2, 2).unwrap(), 24);
    }

    #[test]
    fn non_power_of_two_lengths_pad_with_identity() {
        let sum = SegmentTree::new(&[1, 2, 3], Aggregation::Sum).unwrap();
        assert_eq!(sum.query(0, 2).unwrap(), 6);
        let min = SegmentTree::new(&[5, 9, 7], Aggregation::Min).unwrap();
        assert_eq!(min.query(0, 2).unwrap(), 5);
        let max = SegmentTree::new(&[-5, -9, -7], Aggregation::Max).unwrap();
        assert_eq!(max.query(0, 2).unwrap(), -5);
    }

    #[test]
    fn point_update_recomputes_ancestors() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        tree.update(3, 100).unwrap();
        assert_eq!(tree.query(0, 7).unwrap(), 134);
        assert_eq!(tree.get_value(3).unwrap(), 100);
        tree.validate().unwrap();
    }

    #[test]
    fn point_update_after_range_update() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        tree.range_update(0, 7, 1).unwrap();
        tree.update(0, 0).unwrap();
        assert_eq!(tree.get_value(0).unwrap(), 0);
        assert_eq!(tree.get_value(1).unwrap(), 2);
        assert_eq!(tree.query(0, 7).unwrap(), 40);
        tree.validate().unwrap();
    }

    #[test]
    fn range_update_requires_sum() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Min).unwrap();
        let err = tree.range_update(0, 3, 1).unwrap_err();
        assert!(err.to_string().contains("SUM"));
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        assert!(tree.query(3, 2).is_err());
        assert!(tree.query(0, 8).is_err());
        assert!(tree.get_value(8).is_err());
    }

    #[test]
    fn sum_saturates_instead_of_wrapping() {
        let tree = SegmentTree::new(&[i64::MAX, i64::MAX], Aggregation::Sum).unwrap();
        assert_eq!(tree.query(0, 1).unwrap(), i64::MAX);
    }

    #[test]
    fn version_increments_on_every_mutation() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        assert_eq!(tree.version(), 0);
        tree.update(0, 9).unwrap();
        tree.range_update(0, 3, 1).unwrap();
        assert_eq!(tree.version(), 2);
        // Failed mutations leave the version alone.
        assert!(tree.range_update(9, 10, 1).is_err());
        assert_eq!(tree.version(), 2);
    }

    #[test]
    fn cache_key_tracks_version() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        let before = tree.cache_key();
        assert_eq!(before, tree.cache_key());
        tree.update(0, 42).unwrap();
        assert_ne!(before, tree.cache_key());
    }

    #[test]
    fn validate_matches_fold_after_update_sequences() {
        let mut tree = SegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap();
        tree.range_update(2, 6, 3).unwrap();
        tree.update(5, -4).unwrap();
        tree.range_update(0, 1, -1).unwrap();
        tree.validate().unwrap();
        let fold: i64 = (0..8).map(|i| tree.get_value(i).unwrap()).sum();
        assert_eq!(tree.query(0, 7).unwrap(), fold);
    }

    #[test]
    fn shared_tree_serves_concurrent_readers() {
        use std::sync::Arc;
        let tree = Arc::new(SharedSegmentTree::new(&SAMPLE, Aggregation::Sum).unwrap());
        let mut handles = Vec::new();
        for t in 0..4 {
            let tree = Arc::clone(&tree);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    if t == 0 && i % 10 == 0 {
                        tree.range_update(0, 7, 1).unwrap();
                    } else {
                        let _ = tree.query(0, 7).unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        tree.validate().unwrap();
        assert_eq!(tree.stats().version, 10);
    }
}
