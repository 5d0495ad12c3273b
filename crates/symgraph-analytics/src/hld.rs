//! Heavy-light decomposition of a rooted tree.
//!
//! The input graph is read as an undirected tree (multi-tree forests and
//! cycles are rejected); vertices get dense indices 0..V-1. The
//! linearisation visits heavy children first, so every heavy path occupies
//! a contiguous range of positions and any root-to-node path crosses at
//! most O(log V) light edges. LCA, distance and path decomposition all
//! ride on that invariant.
//!
//! Query statistics are atomic counters and eventually consistent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use symgraph_core::{AnalyticsError, CancelToken, SymbolGraph};

/// In-flight bound for the batch APIs.
const BATCH_WORKERS: usize = 8;

/// Cancellation poll stride inside the LCA lift loop.
const LCA_POLL_STRIDE: u64 = 10;

/// Traversal poll stride during construction.
const BUILD_POLL_STRIDE: usize = 100;

/// One contiguous piece of a decomposed path. `start` and `end` are
/// positions in the linearisation; an upward segment runs from the deeper
/// position to the shallower one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub start: usize,
    pub end: usize,
    pub upward: bool,
}

#[derive(Debug, Default)]
struct HldStats {
    query_count: AtomicU64,
    total_iterations: AtomicU64,
    max_iterations: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// Point-in-time view of the query counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HldStatsSnapshot {
    pub query_count: u64,
    pub total_iterations: u64,
    pub max_iterations: u64,
    pub avg_iterations: f64,
    pub total_duration_ms: u64,
}

/// The decomposition: dense per-vertex arrays plus the id mapping.
#[derive(Debug)]
pub struct Hld {
    parent: Vec<Option<usize>>,
    depth: Vec<u32>,
    /// First vertex of the heavy path containing each vertex.
    head: Vec<usize>,
    /// Position in the linearisation.
    pos: Vec<usize>,
    /// Inverse of `pos`: position -> vertex.
    order: Vec<usize>,
    idx_to_node: Vec<String>,
    node_to_idx: HashMap<String, usize>,
    /// Fingerprint of the source graph, for staleness checks.
    graph_hash: String,
    stats: HldStats,
}

/// Builds the decomposition of the tree rooted at `root`.
///
/// The graph's edges are read undirected; self-loops and parallel edges
/// are ignored. Fails with `InvalidInput` when the root is missing, the
/// graph contains a cycle, or not every node is reachable (a forest).
pub fn build_hld(
    graph: &SymbolGraph,
    root: &str,
    cancel: &CancelToken,
) -> Result<Hld, AnalyticsError> {
    if root.is_empty() {
        return Err(AnalyticsError::invalid_input("empty root id"));
    }
    let Some(root_idx) = graph.index_of(root) else {
        return Err(AnalyticsError::InvalidInput {
            reason: format!("root node not found: '{root}'"),
        });
    };
    let n = graph.node_count();

    // Undirected, deduplicated adjacency in edge order.
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    {
        let mut seen: std::collections::HashSet<(usize, usize)> = std::collections::HashSet::new();
        for edge in graph.edges() {
            let u = graph.index_of(&edge.from).unwrap();
            let v = graph.index_of(&edge.to).unwrap();
            if u == v {
                continue;
            }
            let key = if u < v { (u, v) } else { (v, u) };
            if seen.insert(key) {
                adj[u].push(v);
                adj[v].push(u);
            }
        }
    }

    // BFS from the root: parents, depths, cycle and forest detection.
    let mut parent: Vec<Option<usize>> = vec![None; n];
    let mut depth = vec![0u32; n];
    let mut visited = vec![false; n];
    let mut bfs_order = Vec::with_capacity(n);
    let mut queue = std::collections::VecDeque::new();
    visited[root_idx] = true;
    queue.push_back(root_idx);
    while let Some(u) = queue.pop_front() {
        if bfs_order.len() % BUILD_POLL_STRIDE == 0 {
            cancel.checkpoint()?;
        }
        bfs_order.push(u);
        for &v in &adj[u] {
            if Some(v) == parent[u] {
                continue;
            }
            if visited[v] {
                return Err(AnalyticsError::invalid_input(
                    "input graph is not a tree: cycle detected",
                ));
            }
            visited[v] = true;
            parent[v] = Some(u);
            depth[v] = depth[u] + 1;
            queue.push_back(v);
        }
    }
    if bfs_order.len() < n {
        return Err(AnalyticsError::invalid_input(
            "input graph is a forest: heavy-light decomposition requires a single tree",
        ));
    }

    // Subtree sizes: children finish before parents in reverse BFS order.
    let mut subtree = vec![1usize; n];
    for &u in bfs_order.iter().rev() {
        if let Some(p) = parent[u] {
            subtree[p] += subtree[u];
        }
    }

    // Children lists in adjacency order; the heavy child leads.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &u in &bfs_order {
        if let Some(p) = parent[u] {
            children[p].push(u);
        }
    }
    // Heavy child: largest subtree, first child on ties.
    let mut heavy: Vec<Option<usize>> = vec![None; n];
    for u in 0..n {
        for &c in &children[u] {
            match heavy[u] {
                Some(best) if subtree[best] >= subtree[c] => {}
                _ => heavy[u] = Some(c),
            }
        }
    }

    // Linearisation: heavy child immediately after its parent.
    let mut head = vec![root_idx; n];
    let mut pos = vec![0usize; n];
    let mut order = vec![0usize; n];
    let mut next_pos = 0usize;
    let mut stack = vec![root_idx];
    while let Some(u) = stack.pop() {
        if next_pos % BUILD_POLL_STRIDE == 0 {
            cancel.checkpoint()?;
        }
        pos[u] = next_pos;
        order[next_pos] = u;
        next_pos += 1;
        // Light children are pushed first so the heavy child pops next.
        for &c in children[u].iter().rev() {
            if Some(c) != heavy[u] {
                head[c] = c;
                stack.push(c);
            }
        }
        if let Some(c) = heavy[u] {
            head[c] = head[u];
            stack.push(c);
        }
    }

    debug!(nodes = n, root = %root, "heavy-light decomposition built");
    Ok(Hld {
        parent,
        depth,
        head,
        pos,
        order,
        idx_to_node: graph.node_ids().map(str::to_string).collect(),
        node_to_idx: graph
            .node_ids()
            .enumerate()
            .map(|(idx, id)| (id.to_string(), idx))
            .collect(),
        graph_hash: graph.hash().to_string(),
        stats: HldStats::default(),
    })
}

impl Hld {
    pub fn node_count(&self) -> usize {
        self.idx_to_node.len()
    }

    pub fn idx_of(&self, node: &str) -> Option<usize> {
        self.node_to_idx.get(node).copied()
    }

    pub fn node_at(&self, idx: usize) -> Option<&str> {
        self.idx_to_node.get(idx).map(String::as_str)
    }

    pub fn parent_of(&self, idx: usize) -> Option<usize> {
        self.parent.get(idx).copied().flatten()
    }

    pub fn depth_at(&self, idx: usize) -> Option<u32> {
        self.depth.get(idx).copied()
    }

    pub fn head_of(&self, idx: usize) -> Option<usize> {
        self.head.get(idx).copied()
    }

    pub fn pos_of(&self, idx: usize) -> Option<usize> {
        self.pos.get(idx).copied()
    }

    /// Vertex at a linearisation position.
    pub fn vertex_at(&self, position: usize) -> Option<usize> {
        self.order.get(position).copied()
    }

    /// The stored fingerprint of the source graph.
    pub fn graph_hash(&self) -> &str {
        &self.graph_hash
    }

    /// True while the decomposition still matches the graph's content.
    pub fn validate_graph_hash(&self, graph: &SymbolGraph) -> bool {
        self.graph_hash == graph.hash()
    }

    fn resolve(&self, node: &str) -> Result<usize, AnalyticsError> {
        self.idx_of(node).ok_or_else(|| AnalyticsError::InvalidInput {
            reason: format!("node not in decomposition: '{node}'"),
        })
    }

    /// Head-climbing LCA over dense indices. Records query statistics.
    fn lca_idx(
        &self,
        mut u: usize,
        mut v: usize,
        cancel: &CancelToken,
    ) -> Result<usize, AnalyticsError> {
        let started = Instant::now();
        let cap = 2 * self.node_count() as u64;
        let mut iterations = 0u64;
        while self.head[u] != self.head[v] {
            iterations += 1;
            if iterations % LCA_POLL_STRIDE == 0 {
                cancel.checkpoint()?;
            }
            if iterations > cap {
                return Err(AnalyticsError::ConvergenceExceeded {
                    algorithm: "hld-lca",
                    iterations: iterations as usize,
                });
            }
            if self.depth[self.head[u]] >= self.depth[self.head[v]] {
                u = self.parent[self.head[u]].ok_or_else(|| {
                    AnalyticsError::consistency("head of a non-root path has no parent")
                })?;
            } else {
                v = self.parent[self.head[v]].ok_or_else(|| {
                    AnalyticsError::consistency("head of a non-root path has no parent")
                })?;
            }
        }
        let lca = if self.depth[u] <= self.depth[v] { u } else { v };

        self.stats.query_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_iterations
            .fetch_add(iterations, Ordering::Relaxed);
        let mut seen_max = self.stats.max_iterations.load(Ordering::Relaxed);
        while iterations > seen_max {
            match self.stats.max_iterations.compare_exchange_weak(
                seen_max,
                iterations,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => seen_max = actual,
            }
        }
        self.stats
            .total_duration_ms
            .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
        Ok(lca)
    }

    /// Lowest common ancestor of two nodes, O(log V).
    pub fn lca(&self, u: &str, v: &str, cancel: &CancelToken) -> Result<String, AnalyticsError> {
        let lca = self.lca_idx(self.resolve(u)?, self.resolve(v)?, cancel)?;
        Ok(self.idx_to_node[lca].clone())
    }

    /// Tree distance `depth[u] + depth[v] - 2 * depth[lca]`.
    pub fn distance(&self, u: &str, v: &str, cancel: &CancelToken) -> Result<u64, AnalyticsError> {
        let ui = self.resolve(u)?;
        let vi = self.resolve(v)?;
        let lca = self.lca_idx(ui, vi, cancel)?;
        let d = i64::from(self.depth[ui]) + i64::from(self.depth[vi])
            - 2 * i64::from(self.depth[lca]);
        if d < 0 {
            // A negative distance means the depth array is corrupted.
            return Err(AnalyticsError::consistency(format!(
                "negative distance between '{u}' and '{v}'"
            )));
        }
        Ok(d as u64)
    }

    /// `u` is an ancestor of `v` iff it is their LCA.
    pub fn is_ancestor(
        &self,
        u: &str,
        v: &str,
        cancel: &CancelToken,
    ) -> Result<bool, AnalyticsError> {
        let ui = self.resolve(u)?;
        let vi = self.resolve(v)?;
        Ok(self.lca_idx(ui, vi, cancel)? == ui)
    }

    /// Ordered heavy-path segments covering the path u -> v, at most
    /// O(log V) of them. Each segment lies on one heavy path, so a
    /// downstream range structure can aggregate non-commutatively.
    pub fn decompose_path(
        &self,
        u: &str,
        v: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<PathSegment>, AnalyticsError> {
        let ui = self.resolve(u)?;
        let vi = self.resolve(v)?;
        let lca = self.lca_idx(ui, vi, cancel)?;
        let mut segments = Vec::new();

        // Upward leg: u climbs to the LCA, emitting one segment per
        // heavy path.
        if ui != lca {
            let mut cur = ui;
            while self.depth[self.head[cur]] > self.depth[lca] {
                segments.push(PathSegment {
                    start: self.pos[cur],
                    end: self.pos[self.head[cur]],
                    upward: true,
                });
                cur = self.parent[self.head[cur]].ok_or_else(|| {
                    AnalyticsError::consistency("path head above the lca has no parent")
                })?;
            }
            segments.push(PathSegment {
                start: self.pos[cur],
                end: self.pos[lca],
                upward: true,
            });
        }

        // Downward leg: collected bottom-up, emitted reversed. The LCA
        // itself belongs to the upward leg (or to this one when u == lca).
        if vi != lca {
            let mut tail: Vec<(usize, usize)> = Vec::new();
            let mut cur = vi;
            while self.depth[self.head[cur]] > self.depth[lca] {
                tail.push((self.pos[self.head[cur]], self.pos[cur]));
                cur = self.parent[self.head[cur]].ok_or_else(|| {
                    AnalyticsError::consistency("path head above the lca has no parent")
                })?;
            }
            if cur != lca {
                let top = if ui == lca {
                    self.pos[lca]
                } else {
                    self.pos[lca] + 1
                };
                tail.push((top, self.pos[cur]));
            } else if ui == lca {
                // Degenerate: the whole downward leg already emitted, but
                // the LCA still needs covering.
                tail.push((self.pos[lca], self.pos[lca]));
            }
            for (top, bottom) in tail.into_iter().rev() {
                segments.push(PathSegment {
                    start: top,
                    end: bottom,
                    upward: false,
                });
            }
        } else if ui == lca {
            // u == v == lca: a single one-node segment.
            segments.push(PathSegment {
                start: self.pos[lca],
                end: self.pos[lca],
                upward: true,
            });
        }
        Ok(segments)
    }

    /// The full ordered node path u -> v, O(distance).
    pub fn path_nodes(
        &self,
        u: &str,
        v: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, AnalyticsError> {
        let segments = self.decompose_path(u, v, cancel)?;
        let mut nodes = Vec::new();
        for segment in segments {
            if segment.upward {
                let mut position = segment.start;
                loop {
                    nodes.push(self.idx_to_node[self.order[position]].clone());
                    if position == segment.end {
                        break;
                    }
                    position -= 1;
                }
            } else {
                for position in segment.start..=segment.end {
                    nodes.push(self.idx_to_node[self.order[position]].clone());
                }
            }
        }
        Ok(nodes)
    }

    /// Conservative upper bound on LCA work: `max(depth[u], depth[v])`.
    pub fn estimate_lca_cost(&self, u: &str, v: &str) -> Result<u64, AnalyticsError> {
        let ui = self.resolve(u)?;
        let vi = self.resolve(v)?;
        Ok(u64::from(self.depth[ui].max(self.depth[vi])))
    }

    pub fn estimate_distance_cost(&self, u: &str, v: &str) -> Result<u64, AnalyticsError> {
        self.estimate_lca_cost(u, v)
    }

    /// Path materialisation touches both legs: twice the LCA bound.
    pub fn estimate_path_cost(&self, u: &str, v: &str) -> Result<u64, AnalyticsError> {
        Ok(2 * self.estimate_lca_cost(u, v)?)
    }

    fn batch<T, F>(&self, pairs: &[(String, String)], cancel: &CancelToken, op: F) -> Vec<Result<T, AnalyticsError>>
    where
        T: Send,
        F: Fn(&str, &str) -> Result<T, AnalyticsError> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(BATCH_WORKERS.min(pairs.len().max(1)))
            .build();
        let run = |pairs: &[(String, String)]| {
            pairs
                .par_iter()
                .map(|(u, v)| {
                    // Pairs not yet started observe the cancellation.
                    cancel.checkpoint()?;
                    op(u, v)
                })
                .collect()
        };
        match pool {
            Ok(pool) => pool.install(|| run(pairs)),
            Err(err) => vec![Err(AnalyticsError::Internal {
                message: format!("batch pool unavailable: {err}"),
            })],
        }
    }

    /// Batch LCA with bounded parallelism and per-pair error isolation.
    pub fn batch_lca(
        &self,
        pairs: &[(String, String)],
        cancel: &CancelToken,
    ) -> Vec<Result<String, AnalyticsError>> {
        self.batch(pairs, cancel, |u, v| self.lca(u, v, cancel))
    }

    pub fn batch_distance(
        &self,
        pairs: &[(String, String)],
        cancel: &CancelToken,
    ) -> Vec<Result<u64, AnalyticsError>> {
        self.batch(pairs, cancel, |u, v| self.distance(u, v, cancel))
    }

    pub fn batch_decompose_path(
        &self,
        pairs: &[(String, String)],
        cancel: &CancelToken,
    ) -> Vec<Result<Vec<PathSegment>, AnalyticsError>> {
        self.batch(pairs, cancel, |u, v| self.decompose_path(u, v, cancel))
    }

    pub fn stats(&self) -> HldStatsSnapshot {
        let query_count = self.stats.query_count.load(Ordering::Relaxed);
        let total_iterations = self.stats.total_iterations.load(Ordering::Relaxed);
        HldStatsSnapshot {
            query_count,
            total_iterations,
            max_iterations: self.stats.max_iterations.load(Ordering::Relaxed),
            avg_iterations: if query_count == 0 {
                0.0
            } else {
                total_iterations as f64 / query_count as f64
            },
            total_duration_ms: self.stats.total_duration_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symgraph_core::{EdgeKind, GraphBuilder, Location, Symbol, SymbolKind};

    fn tree_of(nodes: &[&str], edges: &[(&str, &str)]) -> SymbolGraph {
        let mut builder = GraphBuilder::new();
        for id in nodes {
            builder
                .add_symbol(*id, Symbol::new(*id, SymbolKind::Function))
                .unwrap();
        }
        for (from, to) in edges {
            builder
                .add_edge(from, to, EdgeKind::Calls, Location::new("f", 1))
                .unwrap();
        }
        builder.freeze()
    }

    fn chain5() -> SymbolGraph {
        tree_of(
            &["n1", "n2", "n3", "n4", "n5"],
            &[("n1", "n2"), ("n2", "n3"), ("n3", "n4"), ("n4", "n5")],
        )
    }

    /// Balanced-ish tree:
    ///        r
    ///      /   \
    ///     a     b
    ///    / \     \
    ///   c   d     e
    ///       |
    ///       f
    fn branchy() -> SymbolGraph {
        tree_of(
            &["r", "a", "b", "c", "d", "e", "f"],
            &[
                ("r", "a"),
                ("r", "b"),
                ("a", "c"),
                ("a", "d"),
                ("b", "e"),
                ("d", "f"),
            ],
        )
    }

    #[test]
    fn rejects_bad_roots_and_non_trees() {
        let graph = chain5();
        assert!(build_hld(&graph, "", &CancelToken::new()).is_err());
        assert!(build_hld(&graph, "ghost", &CancelToken::new()).is_err());

        let forest = tree_of(&["a", "b", "c"], &[("a", "b")]);
        let err = build_hld(&forest, "a", &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("forest"));

        let cyclic = tree_of(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "a")]);
        let err = build_hld(&cyclic, "a", &CancelToken::new()).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn positions_are_a_permutation() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let mut seen = vec![false; hld.node_count()];
        for idx in 0..hld.node_count() {
            let position = hld.pos_of(idx).unwrap();
            assert!(!seen[position]);
            seen[position] = true;
            assert_eq!(hld.vertex_at(position), Some(idx));
        }
    }

    #[test]
    fn heads_are_never_deeper_than_their_members() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        for idx in 0..hld.node_count() {
            let head = hld.head_of(idx).unwrap();
            assert!(hld.depth_at(head).unwrap() <= hld.depth_at(idx).unwrap());
        }
    }

    #[test]
    fn heavy_paths_are_contiguous() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        for idx in 0..hld.node_count() {
            // Walk from idx up to its head; positions must decrease by 1.
            let mut cur = idx;
            let head = hld.head_of(idx).unwrap();
            while cur != head {
                let parent = hld.parent_of(cur).unwrap();
                assert_eq!(hld.pos_of(cur).unwrap(), hld.pos_of(parent).unwrap() + 1);
                cur = parent;
            }
        }
    }

    #[test]
    fn chain_queries_match_the_spec_scenario() {
        let graph = chain5();
        let hld = build_hld(&graph, "n1", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        assert_eq!(hld.lca("n3", "n5", &cancel).unwrap(), "n3");
        assert_eq!(hld.distance("n1", "n5", &cancel).unwrap(), 4);
        let segments = hld.decompose_path("n1", "n5", &cancel).unwrap();
        assert_eq!(segments.len(), 1);
        let segment = segments[0];
        assert!(!segment.upward);
        assert_eq!(
            (segment.end - segment.start) + 1,
            5,
            "one segment covering all five nodes"
        );
    }

    #[test]
    fn lca_on_branchy_tree() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        assert_eq!(hld.lca("c", "f", &cancel).unwrap(), "a");
        assert_eq!(hld.lca("c", "e", &cancel).unwrap(), "r");
        assert_eq!(hld.lca("d", "f", &cancel).unwrap(), "d");
        assert_eq!(hld.lca("r", "f", &cancel).unwrap(), "r");
    }

    #[test]
    fn naive_lca_agrees_everywhere() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        let naive = |mut u: usize, mut v: usize| {
            while hld.depth_at(u) != hld.depth_at(v) {
                if hld.depth_at(u).unwrap() > hld.depth_at(v).unwrap() {
                    u = hld.parent_of(u).unwrap();
                } else {
                    v = hld.parent_of(v).unwrap();
                }
            }
            while u != v {
                u = hld.parent_of(u).unwrap();
                v = hld.parent_of(v).unwrap();
            }
            u
        };
        for u in 0..hld.node_count() {
            for v in 0..hld.node_count() {
                let expected = hld.node_at(naive(u, v)).unwrap();
                let got = hld
                    .lca(hld.node_at(u).unwrap(), hld.node_at(v).unwrap(), &cancel)
                    .unwrap();
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn distance_is_a_metric_on_the_tree() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        assert_eq!(hld.distance("c", "c", &cancel).unwrap(), 0);
        assert_eq!(hld.distance("c", "f", &cancel).unwrap(), 3);
        assert_eq!(
            hld.distance("c", "e", &cancel).unwrap(),
            hld.distance("e", "c", &cancel).unwrap()
        );
    }

    #[test]
    fn path_nodes_walks_the_full_route() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        assert_eq!(
            hld.path_nodes("c", "e", &cancel).unwrap(),
            vec!["c", "a", "r", "b", "e"]
        );
        assert_eq!(hld.path_nodes("f", "f", &cancel).unwrap(), vec!["f"]);
        assert_eq!(
            hld.path_nodes("r", "f", &cancel).unwrap(),
            vec!["r", "a", "d", "f"]
        );
        assert_eq!(
            hld.path_nodes("f", "r", &cancel).unwrap(),
            vec!["f", "d", "a", "r"]
        );
    }

    #[test]
    fn path_nodes_length_matches_distance() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        for u in 0..hld.node_count() {
            for v in 0..hld.node_count() {
                let a = hld.node_at(u).unwrap();
                let b = hld.node_at(v).unwrap();
                let nodes = hld.path_nodes(a, b, &cancel).unwrap();
                let distance = hld.distance(a, b, &cancel).unwrap();
                assert_eq!(nodes.len() as u64, distance + 1, "path {a} -> {b}");
                assert_eq!(nodes.first().map(String::as_str), Some(a));
                assert_eq!(nodes.last().map(String::as_str), Some(b));
            }
        }
    }

    #[test]
    fn decompose_path_segment_count_is_logarithmic() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        for u in 0..hld.node_count() {
            for v in 0..hld.node_count() {
                let segments = hld
                    .decompose_path(hld.node_at(u).unwrap(), hld.node_at(v).unwrap(), &cancel)
                    .unwrap();
                assert!(!segments.is_empty());
                assert!(segments.len() <= 6);
            }
        }
    }

    #[test]
    fn is_ancestor_matches_lca() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        assert!(hld.is_ancestor("r", "f", &cancel).unwrap());
        assert!(hld.is_ancestor("a", "c", &cancel).unwrap());
        assert!(!hld.is_ancestor("c", "a", &cancel).unwrap());
        assert!(!hld.is_ancestor("b", "c", &cancel).unwrap());
        assert!(hld.is_ancestor("d", "d", &cancel).unwrap());
    }

    #[test]
    fn cost_estimates_are_conservative() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        assert_eq!(hld.estimate_lca_cost("c", "f").unwrap(), 3);
        assert_eq!(hld.estimate_distance_cost("c", "e").unwrap(), 2);
        assert_eq!(hld.estimate_path_cost("c", "f").unwrap(), 6);
    }

    #[test]
    fn unknown_nodes_are_invalid_input() {
        let graph = chain5();
        let hld = build_hld(&graph, "n1", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        assert!(hld.lca("n1", "ghost", &cancel).is_err());
        assert!(hld.distance("ghost", "n1", &cancel).is_err());
    }

    #[test]
    fn stats_accumulate() {
        let graph = chain5();
        let hld = build_hld(&graph, "n1", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        hld.lca("n1", "n5", &cancel).unwrap();
        hld.distance("n2", "n4", &cancel).unwrap();
        let stats = hld.stats();
        assert_eq!(stats.query_count, 2);
        assert!(stats.avg_iterations >= 0.0);
    }

    #[test]
    fn graph_hash_staleness() {
        let graph = chain5();
        let hld = build_hld(&graph, "n1", &CancelToken::new()).unwrap();
        assert!(hld.validate_graph_hash(&graph));
        let other = branchy();
        assert!(!hld.validate_graph_hash(&other));
    }

    #[test]
    fn batch_lca_isolates_errors_per_pair() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let pairs = vec![
            ("c".to_string(), "f".to_string()),
            ("c".to_string(), "ghost".to_string()),
            ("b".to_string(), "e".to_string()),
        ];
        let results = hld.batch_lca(&pairs, &CancelToken::new());
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), "a");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), "b");
    }

    #[test]
    fn batch_on_cancelled_token_yields_cancelled() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let pairs = vec![("c".to_string(), "f".to_string())];
        let results = hld.batch_distance(&pairs, &token);
        assert!(matches!(results[0], Err(AnalyticsError::Cancelled)));
    }

    #[test]
    fn batch_distance_matches_serial() {
        let graph = branchy();
        let hld = build_hld(&graph, "r", &CancelToken::new()).unwrap();
        let cancel = CancelToken::new();
        let pairs: Vec<(String, String)> = vec![
            ("c".into(), "f".into()),
            ("c".into(), "e".into()),
            ("r".into(), "f".into()),
        ];
        let batch = hld.batch_distance(&pairs, &cancel);
        for ((u, v), got) in pairs.iter().zip(batch) {
            assert_eq!(got.unwrap(), hld.distance(u, v, &cancel).unwrap());
        }
    }
}
