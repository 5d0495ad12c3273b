//! Dominator trees via Cooper-Harvey-Kennedy iterative data-flow.
//!
//! The solver runs over a dense universe: reverse postorder is computed
//! with an explicit-stack DFS, predecessors are restricted to reachable
//! nodes, and the idom vector converges by repeated two-finger
//! intersection in rpo positions. A safety cap of `2 * V` passes guards
//! against malformed inputs; well-formed graphs converge in a handful.
//!
//! Derived queries (`dominates`, ancestry chains, subtree, lowest common
//! dominator) live on [`DominatorTree`]; the children map is materialised
//! lazily exactly once.

pub mod lca;
pub mod postdom;

pub use lca::LcaEngine;
pub use postdom::{compute_post_dominators, VIRTUAL_EXIT_ID};

use std::collections::HashMap;
use std::sync::OnceLock;

use tracing::{debug, warn};

use symgraph_core::{AnalyticsError, CancelToken, SymbolGraph};

/// Cancellation poll stride inside traversals.
const POLL_STRIDE: usize = 100;

/// A dense flow graph over an explicit id universe. Built differently for
/// forward dominators, post-dominators, and the virtual-exit variant.
pub(crate) struct FlowGraph {
    pub ids: Vec<String>,
    pub succs: Vec<Vec<usize>>,
}

/// Reverse postorder of the nodes reachable from `entry`, as universe
/// indices. Iterative DFS; no recursion.
pub(crate) fn reverse_postorder(
    flow: &FlowGraph,
    entry: usize,
    cancel: &CancelToken,
) -> Result<Vec<usize>, AnalyticsError> {
    let n = flow.ids.len();
    let mut visited = vec![false; n];
    let mut postorder = Vec::new();
    // (node, next successor offset)
    let mut stack: Vec<(usize, usize)> = vec![(entry, 0)];
    visited[entry] = true;
    let mut steps = 0usize;

    while let Some((node, offset)) = stack.pop() {
        steps += 1;
        if steps % POLL_STRIDE == 0 {
            cancel.checkpoint()?;
        }
        match flow.succs[node].get(offset) {
            Some(&next) => {
                stack.push((node, offset + 1));
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            }
            None => postorder.push(node),
        }
    }
    postorder.reverse();
    Ok(postorder)
}

/// CHK fixed-point over a precomputed rpo. Returns idoms as rpo positions.
pub(crate) fn chk_idoms(
    flow: &FlowGraph,
    rpo: &[usize],
    cancel: &CancelToken,
) -> Result<Vec<usize>, AnalyticsError> {
    const UNDEF: usize = usize::MAX;
    let reachable = rpo.len();

    let mut rpo_pos = vec![UNDEF; flow.ids.len()];
    for (pos, &node) in rpo.iter().enumerate() {
        rpo_pos[node] = pos;
    }
    // Predecessor lists in rpo positions, reachable nodes only.
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); reachable];
    for (pos, &node) in rpo.iter().enumerate() {
        for &succ in &flow.succs[node] {
            if rpo_pos[succ] != UNDEF {
                preds[rpo_pos[succ]].push(pos);
            }
        }
    }

    let mut idom = vec![UNDEF; reachable];
    idom[0] = 0;

    let intersect = |idom: &[usize], mut a: usize, mut b: usize| {
        // Deeper nodes carry larger rpo positions; walk the deeper finger
        // up its idom chain until the fingers meet.
        while a != b {
            while a > b {
                a = idom[a];
            }
            while b > a {
                b = idom[b];
            }
        }
        a
    };

    let cap = 2 * reachable;
    let mut passes = 0usize;
    loop {
        cancel.checkpoint()?;
        let mut changed = false;
        for pos in 1..reachable {
            let mut new_idom = UNDEF;
            for &pred in &preds[pos] {
                if idom[pred] == UNDEF {
                    continue;
                }
                new_idom = if new_idom == UNDEF {
                    pred
                } else {
                    intersect(&idom, pred, new_idom)
                };
            }
            if new_idom != UNDEF && idom[pos] != new_idom {
                idom[pos] = new_idom;
                changed = true;
            }
        }
        passes += 1;
        if !changed {
            break;
        }
        if passes >= cap {
            return Err(AnalyticsError::ConvergenceExceeded {
                algorithm: "dominators",
                iterations: passes,
            });
        }
    }
    debug!(passes, nodes = reachable, "dominator fixed point");
    Ok(idom)
}

/// An immutable dominator (or post-dominator) tree.
#[derive(Debug)]
pub struct DominatorTree {
    entry: String,
    /// Node -> immediate dominator. Roots (the entry; rewritten real exits
    /// in multi-exit post-dominator trees) map to themselves.
    idom: HashMap<String, String>,
    depth: HashMap<String, u32>,
    rpo: Vec<String>,
    rpo_index: HashMap<String, usize>,
    children: OnceLock<HashMap<String, Vec<String>>>,
    exit_count: usize,
    used_virtual_exit: bool,
}

impl DominatorTree {
    pub(crate) fn from_parts(
        entry: String,
        idom: HashMap<String, String>,
        depth: HashMap<String, u32>,
        rpo: Vec<String>,
        exit_count: usize,
        used_virtual_exit: bool,
    ) -> Self {
        let rpo_index = rpo
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.clone(), pos))
            .collect();
        DominatorTree {
            entry,
            idom,
            depth,
            rpo,
            rpo_index,
            children: OnceLock::new(),
            exit_count,
            used_virtual_exit,
        }
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Reachable nodes in reverse postorder.
    pub fn rpo(&self) -> &[String] {
        &self.rpo
    }

    pub fn rpo_index(&self, node: &str) -> Option<usize> {
        self.rpo_index.get(node).copied()
    }

    pub fn node_count(&self) -> usize {
        self.rpo.len()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.idom.contains_key(node)
    }

    pub fn immediate_dom(&self, node: &str) -> Option<&str> {
        self.idom.get(node).map(String::as_str)
    }

    pub fn depth_of(&self, node: &str) -> Option<u32> {
        self.depth.get(node).copied()
    }

    pub fn exit_count(&self) -> usize {
        self.exit_count
    }

    pub fn used_virtual_exit(&self) -> bool {
        self.used_virtual_exit
    }

    /// True iff `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: &str, b: &str) -> bool {
        if !self.contains(a) || !self.contains(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            let parent = &self.idom[cur];
            if parent == cur {
                return false;
            }
            cur = parent;
        }
    }

    /// The dominator chain from `node` to its root, inclusive on both ends.
    pub fn dominators_of(&self, node: &str) -> Vec<String> {
        let mut chain = Vec::new();
        if !self.contains(node) {
            return chain;
        }
        let mut cur = node;
        loop {
            chain.push(cur.to_string());
            let parent = &self.idom[cur];
            if parent == cur {
                return chain;
            }
            cur = parent;
        }
    }

    /// Children map, built once on first use. Child lists follow rpo order.
    fn children(&self) -> &HashMap<String, Vec<String>> {
        self.children.get_or_init(|| {
            let mut children: HashMap<String, Vec<String>> = HashMap::new();
            for node in &self.rpo {
                let parent = &self.idom[node];
                if parent != node {
                    children.entry(parent.clone()).or_default().push(node.clone());
                }
            }
            children
        })
    }

    pub fn children_of(&self, node: &str) -> &[String] {
        self.children().get(node).map_or(&[], Vec::as_slice)
    }

    /// Every node dominated by `node`: its subtree, in preorder.
    pub fn dominated_by(&self, node: &str) -> Vec<String> {
        let mut subtree = Vec::new();
        if !self.contains(node) {
            return subtree;
        }
        let mut stack = vec![node];
        while let Some(cur) = stack.pop() {
            subtree.push(cur.to_string());
            for child in self.children_of(cur).iter().rev() {
                stack.push(child);
            }
        }
        subtree
    }

    /// Deterministic preorder walk from the entry.
    pub fn iter_dfs(&self) -> Vec<String> {
        self.dominated_by(&self.entry)
    }

    /// Deepest node dominating both `a` and `b`.
    ///
    /// Empty arguments return `""`; unknown nodes degrade to the entry.
    pub fn lowest_common_dominator(&self, a: &str, b: &str) -> String {
        if a.is_empty() || b.is_empty() {
            return String::new();
        }
        if !self.contains(a) || !self.contains(b) {
            return self.entry.clone();
        }
        let mut x = a;
        let mut y = b;
        // Lift the deeper side first, then both together.
        while self.depth[x] > self.depth[y] {
            let parent = &self.idom[x];
            if parent == x {
                break;
            }
            x = parent;
        }
        while self.depth[y] > self.depth[x] {
            let parent = &self.idom[y];
            if parent == y {
                break;
            }
            y = parent;
        }
        while x != y {
            let px = &self.idom[x];
            let py = &self.idom[y];
            if px == x && py == y {
                // Distinct roots of a multi-root (post-dominator) forest.
                return self.entry.clone();
            }
            x = px;
            y = py;
        }
        x.to_string()
    }

    /// Associative fold of [`lowest_common_dominator`]; exits early once
    /// the running result reaches the entry.
    ///
    /// [`lowest_common_dominator`]: Self::lowest_common_dominator
    pub fn lowest_common_dominator_multiple(&self, nodes: &[&str]) -> String {
        let mut iter = nodes.iter();
        let Some(first) = iter.next() else {
            return String::new();
        };
        let mut acc = if self.contains(first) {
            (*first).to_string()
        } else {
            self.entry.clone()
        };
        for node in iter {
            if acc == self.entry {
                return acc;
            }
            acc = self.lowest_common_dominator(&acc, node);
        }
        acc
    }
}

/// Computes the dominator tree rooted at `entry`.
///
/// Fails when the entry id is empty or not in the graph. Unreachable nodes
/// are absent from the result.
pub fn compute_dominators(
    graph: &SymbolGraph,
    entry: &str,
    cancel: &CancelToken,
) -> Result<DominatorTree, AnalyticsError> {
    if entry.is_empty() {
        return Err(AnalyticsError::invalid_input("empty entry id"));
    }
    let Some(entry_idx) = graph.index_of(entry) else {
        return Err(AnalyticsError::InvalidInput {
            reason: format!("entry node not found: '{entry}'"),
        });
    };

    let ids: Vec<String> = graph.node_ids().map(str::to_string).collect();
    let succs: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            graph
                .outgoing(id)
                .map(|edge| graph.index_of(&edge.to).unwrap())
                .collect()
        })
        .collect();
    let flow = FlowGraph { ids, succs };

    let rpo = reverse_postorder(&flow, entry_idx, cancel)?;
    let idom_pos = chk_idoms(&flow, &rpo, cancel)?;
    let exit_count = rpo
        .iter()
        .filter(|&&node| flow.succs[node].is_empty())
        .count();

    Ok(assemble_tree(&flow, &rpo, &idom_pos, exit_count, false))
}

/// Materialises a [`DominatorTree`] from the dense solver output. Depths
/// come from one pass over the rpo (`depth[n] = depth[idom[n]] + 1`);
/// self-referential roots sit at depth 0.
pub(crate) fn assemble_tree(
    flow: &FlowGraph,
    rpo: &[usize],
    idom_pos: &[usize],
    exit_count: usize,
    used_virtual_exit: bool,
) -> DominatorTree {
    const UNDEF: usize = usize::MAX;
    let mut idom = HashMap::new();
    let mut depth = HashMap::new();
    let mut rpo_ids = Vec::with_capacity(rpo.len());
    let mut depths_dense = vec![0u32; rpo.len()];

    for (pos, &node) in rpo.iter().enumerate() {
        let id = flow.ids[node].clone();
        let parent_pos = idom_pos[pos];
        if parent_pos == UNDEF || parent_pos == pos {
            idom.insert(id.clone(), id.clone());
            depths_dense[pos] = 0;
        } else {
            idom.insert(id.clone(), flow.ids[rpo[parent_pos]].clone());
            depths_dense[pos] = depths_dense[parent_pos] + 1;
        }
        depth.insert(id.clone(), depths_dense[pos]);
        rpo_ids.push(id);
    }

    // An idom referencing a non-key node signals solver drift; it is
    // logged and counted, never fatal.
    let mut dangling = 0usize;
    for (node, parent) in &idom {
        if !idom.contains_key(parent) {
            dangling += 1;
            warn!(node = %node, parent = %parent, "idom references unknown node");
        }
    }
    if dangling > 0 {
        warn!(count = dangling, "dominator tree has dangling idom references");
    }

    let entry = rpo_ids.first().cloned().unwrap_or_default();
    DominatorTree::from_parts(entry, idom, depth, rpo_ids, exit_count, used_virtual_exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symgraph_core::{EdgeKind, GraphBuilder, Location, Symbol, SymbolKind};

    fn graph_of(nodes: &[&str], edges: &[(&str, &str)]) -> SymbolGraph {
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

    fn diamond() -> SymbolGraph {
        graph_of(
            &["entry", "a", "b", "c", "exit"],
            &[
                ("entry", "a"),
                ("entry", "b"),
                ("a", "c"),
                ("b", "c"),
                ("c", "exit"),
            ],
        )
    }

    #[test]
    fn empty_and_absent_entries_fail() {
        let graph = diamond();
        assert!(compute_dominators(&graph, "", &CancelToken::new()).is_err());
        assert!(compute_dominators(&graph, "ghost", &CancelToken::new()).is_err());
    }

    #[test]
    fn diamond_idoms() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        assert_eq!(tree.immediate_dom("entry"), Some("entry"));
        assert_eq!(tree.immediate_dom("a"), Some("entry"));
        assert_eq!(tree.immediate_dom("b"), Some("entry"));
        assert_eq!(tree.immediate_dom("c"), Some("entry"));
        assert_eq!(tree.immediate_dom("exit"), Some("c"));
    }

    #[test]
    fn diamond_depths() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        assert_eq!(tree.depth_of("entry"), Some(0));
        assert_eq!(tree.depth_of("a"), Some(1));
        assert_eq!(tree.depth_of("c"), Some(1));
        assert_eq!(tree.depth_of("exit"), Some(2));
    }

    #[test]
    fn entry_dominates_everything_reflexively() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        for node in tree.rpo() {
            assert!(tree.dominates("entry", node));
            assert!(tree.dominates(node, node));
        }
        assert!(!tree.dominates("a", "c"));
        assert!(tree.dominates("c", "exit"));
    }

    #[test]
    fn lcd_on_diamond() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        assert_eq!(tree.lowest_common_dominator("a", "b"), "entry");
        assert_eq!(tree.lowest_common_dominator("c", "c"), "c");
        assert_eq!(tree.lowest_common_dominator("c", "exit"), "c");
    }

    #[test]
    fn lcd_edge_conventions() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        assert_eq!(tree.lowest_common_dominator("", "a"), "");
        assert_eq!(tree.lowest_common_dominator("ghost", "a"), "entry");
        assert_eq!(tree.lowest_common_dominator_multiple(&[]), "");
        assert_eq!(
            tree.lowest_common_dominator_multiple(&["a", "b", "exit"]),
            "entry"
        );
        assert_eq!(tree.lowest_common_dominator_multiple(&["c", "exit"]), "c");
    }

    #[test]
    fn lcd_dominates_both_arguments() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        for a in tree.rpo() {
            for b in tree.rpo() {
                let lcd = tree.lowest_common_dominator(a, b);
                assert!(tree.dominates(&lcd, a), "{lcd} should dominate {a}");
                assert!(tree.dominates(&lcd, b), "{lcd} should dominate {b}");
            }
        }
    }

    #[test]
    fn dominators_of_is_the_chain_to_entry() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        assert_eq!(tree.dominators_of("exit"), vec!["exit", "c", "entry"]);
        assert_eq!(tree.dominators_of("ghost"), Vec::<String>::new());
    }

    #[test]
    fn dominated_by_returns_the_subtree() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        let sub = tree.dominated_by("c");
        assert_eq!(sub, vec!["c", "exit"]);
        assert_eq!(tree.dominated_by("entry").len(), 5);
    }

    #[test]
    fn unreachable_nodes_are_excluded() {
        let graph = graph_of(
            &["entry", "a", "island"],
            &[("entry", "a"), ("island", "a")],
        );
        let tree = compute_dominators(&graph, "entry", &CancelToken::new()).unwrap();
        assert!(!tree.contains("island"));
        assert_eq!(tree.node_count(), 2);
        // The predecessor from the unreachable island is ignored.
        assert_eq!(tree.immediate_dom("a"), Some("entry"));
    }

    #[test]
    fn cycles_converge() {
        let graph = graph_of(
            &["entry", "head", "body", "exit"],
            &[
                ("entry", "head"),
                ("head", "body"),
                ("body", "head"),
                ("head", "exit"),
            ],
        );
        let tree = compute_dominators(&graph, "entry", &CancelToken::new()).unwrap();
        assert_eq!(tree.immediate_dom("body"), Some("head"));
        assert_eq!(tree.immediate_dom("exit"), Some("head"));
    }

    #[test]
    fn single_node_is_its_own_dominator() {
        let graph = graph_of(&["solo"], &[]);
        let tree = compute_dominators(&graph, "solo", &CancelToken::new()).unwrap();
        assert_eq!(tree.immediate_dom("solo"), Some("solo"));
        assert_eq!(tree.depth_of("solo"), Some(0));
        assert!(tree.dominates("solo", "solo"));
    }

    #[test]
    fn pre_cancelled_token_aborts() {
        let token = CancelToken::new();
        token.cancel();
        let err = compute_dominators(&diamond(), "entry", &token).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn iter_dfs_is_preorder_from_entry() {
        let tree = compute_dominators(&diamond(), "entry", &CancelToken::new()).unwrap();
        let walk = tree.iter_dfs();
        assert_eq!(walk[0], "entry");
        assert_eq!(walk.len(), 5);
        let pos =
            |id: &str| walk.iter().position(|node| node == id).unwrap();
        assert!(pos("c") < pos("exit"));
    }

    #[test]
    fn deterministic_across_runs() {
        let graph = diamond();
        let t1 = compute_dominators(&graph, "entry", &CancelToken::new()).unwrap();
        let t2 = compute_dominators(&graph, "entry", &CancelToken::new()).unwrap();
        assert_eq!(t1.rpo(), t2.rpo());
        for node in t1.rpo() {
            assert_eq!(t1.immediate_dom(node), t2.immediate_dom(node));
        }
    }
}
