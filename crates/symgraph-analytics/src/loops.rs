//! Natural loop detection over a dominator tree.
//!
//! A back edge is an edge whose target dominates its source; each header
//! (back-edge target) anchors one loop whose body is found by reverse BFS
//! from the back-edge sources, stopping at the header. Nesting assigns
//! every loop to the smallest other loop whose body contains its header.
//!
//! Irreducible regions (bodies containing nodes the header does not
//! dominate) are detected and logged, never rejected; their bodies are a
//! best-effort overapproximation.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use symgraph_core::{AnalyticsError, CancelToken, SymbolGraph};

use crate::dominators::DominatorTree;

/// Diagnostics thresholds.
const DEEP_NEST_WARNING: u32 = 10;
const LARGE_BODY_WARNING: usize = 1000;
const POLL_STRIDE: usize = 100;

/// One natural loop. Cross-references are indices into
/// [`LoopNest::loops`], keeping ownership unidirectional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    pub header: String,
    /// `(source, target)` pairs; every target is the header.
    pub back_edges: Vec<(String, String)>,
    /// Body nodes including the header, ordered by reverse postorder.
    pub body: Vec<String>,
    /// Nesting depth; top-level loops sit at 1.
    pub depth: u32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// All loops plus the nesting hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopNest {
    pub loops: Vec<Loop>,
    /// Indices of loops without a parent.
    pub top_level: Vec<usize>,
    /// Node -> index of its innermost containing loop.
    pub loop_of: HashMap<String, usize>,
    pub max_depth: u32,
}

impl LoopNest {
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Innermost loop containing `node`, if any.
    pub fn innermost(&self, node: &str) -> Option<&Loop> {
        self.loop_of.get(node).map(|&idx| &self.loops[idx])
    }
}

/// Discovers all natural loops of `graph` under the given dominator tree.
pub fn detect_loops(
    graph: &SymbolGraph,
    tree: &DominatorTree,
    cancel: &CancelToken,
) -> Result<LoopNest, AnalyticsError> {
    // Back edges grouped by header, in edge order. Edges touching nodes
    // outside the tree (unreachable) are skipped.
    let mut by_header: IndexMap<String, Vec<(String, String)>> = IndexMap::new();
    for (count, edge) in graph.edges().enumerate() {
        if count % POLL_STRIDE == 0 {
            cancel.checkpoint()?;
        }
        if !tree.contains(&edge.from) || !tree.contains(&edge.to) {
            continue;
        }
        if tree.dominates(&edge.to, &edge.from) {
            by_header
                .entry(edge.to.clone())
                .or_default()
                .push((edge.from.clone(), edge.to.clone()));
        }
    }

    let mut loops: Vec<Loop> = Vec::with_capacity(by_header.len());
    let mut bodies: Vec<HashSet<String>> = Vec::with_capacity(by_header.len());
    for (header, back_edges) in by_header {
        let body_set = loop_body(graph, tree, &header, &back_edges, cancel)?;
        let mut body: Vec<String> = body_set.iter().cloned().collect();
        body.sort_unstable_by_key(|node| tree.rpo_index(node).unwrap_or(usize::MAX));

        if body.len() > LARGE_BODY_WARNING {
            warn!(header = %header, size = body.len(), "unusually large loop body");
        }
        if body.iter().any(|node| !tree.dominates(&header, node)) {
            warn!(header = %header, "irreducible loop: body escapes the header's dominator subtree");
        }

        loops.push(Loop {
            header,
            back_edges,
            body,
            depth: 0,
            parent: None,
            children: Vec::new(),
        });
        bodies.push(body_set);
    }

    assign_nesting(&mut loops, &bodies);

    let top_level: Vec<usize> = loops
        .iter()
        .enumerate()
        .filter(|(_, lp)| lp.parent.is_none())
        .map(|(idx, _)| idx)
        .collect();

    // Depths by BFS from the roots.
    let mut queue: VecDeque<usize> = top_level.iter().copied().collect();
    while let Some(idx) = queue.pop_front() {
        let depth = match loops[idx].parent {
            Some(parent) => loops[parent].depth + 1,
            None => 1,
        };
        loops[idx].depth = depth;
        if depth > DEEP_NEST_WARNING {
            warn!(header = %loops[idx].header, depth, "deeply nested loop");
        }
        for child in loops[idx].children.clone() {
            queue.push_back(child);
        }
    }
    let max_depth = loops.iter().map(|lp| lp.depth).max().unwrap_or(0);

    // Innermost-loop map: deepest loops claim their nodes first.
    let mut order: Vec<usize> = (0..loops.len()).collect();
    order.sort_unstable_by(|&a, &b| loops[b].depth.cmp(&loops[a].depth).then(a.cmp(&b)));
    let mut loop_of: HashMap<String, usize> = HashMap::new();
    for idx in order {
        for node in &loops[idx].body {
            loop_of.entry(node.clone()).or_insert(idx);
        }
    }

    Ok(LoopNest {
        loops,
        top_level,
        loop_of,
        max_depth,
    })
}

/// Body of the loop at `header`: reverse BFS from the back-edge sources,
/// inserting predecessors lazily and never expanding past the header.
fn loop_body(
    graph: &SymbolGraph,
    tree: &DominatorTree,
    header: &str,
    back_edges: &[(String, String)],
    cancel: &CancelToken,
) -> Result<HashSet<String>, AnalyticsError> {
    let mut body: HashSet<String> = HashSet::new();
    body.insert(header.to_string());
    let mut queue: VecDeque<String> = VecDeque::new();
    for (source, _) in back_edges {
        if body.insert(source.clone()) {
            queue.push_back(source.clone());
        }
    }
    let mut visited = 0usize;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        if visited % POLL_STRIDE == 0 {
            cancel.checkpoint()?;
        }
        for edge in graph.incoming(&node) {
            let pred = &edge.from;
            if tree.contains(pred) && !body.contains(pred) {
                body.insert(pred.clone());
                queue.push_back(pred.clone());
            }
        }
    }
    Ok(body)
}

/// Links each loop to the smallest other loop whose body contains its
/// header; ties go to the earliest loop.
fn assign_nesting(loops: &mut [Loop], bodies: &[HashSet<String>]) {
    for idx in 0..loops.len() {
        let mut parent: Option<usize> = None;
        for (other, body) in bodies.iter().enumerate() {
            if other == idx || !body.contains(&loops[idx].header) {
                continue;
            }
            match parent {
                Some(best) if bodies[best].len() <= body.len() => {}
                _ => parent = Some(other),
            }
        }
        loops[idx].parent = parent;
        if let Some(parent) = parent {
            loops[parent].children.push(idx);
        }
    }
}
