//! Post-dominators: the dominator computation on the reversed graph.
//!
//! Multi-exit graphs get a virtual exit: a reserved sentinel node wired to
//! every real exit, so the reversed graph has a single entry for the
//! solver. The sentinel never escapes -- it is stripped from the result and
//! each real exit is rewritten to a self-referential root at depth 0.

use tracing::debug;

use symgraph_core::{AnalyticsError, CancelToken, SymbolGraph};

use super::{assemble_tree, chk_idoms, reverse_postorder, DominatorTree, FlowGraph};

/// Reserved sentinel id, outside the legitimate symbol namespace.
pub const VIRTUAL_EXIT_ID: &str = "__virtual_exit__";

/// Computes the post-dominator tree.
///
/// An empty `exit` auto-detects exit nodes (no outgoing edges, in graph
/// order). Fails with [`AnalyticsError::NoExit`] when none exist.
pub fn compute_post_dominators(
    graph: &SymbolGraph,
    exit: &str,
    cancel: &CancelToken,
) -> Result<DominatorTree, AnalyticsError> {
    let exits: Vec<String> = if exit.is_empty() {
        graph
            .node_ids()
            .filter(|id| graph.out_degree(id) == 0)
            .map(str::to_string)
            .collect()
    } else {
        if !graph.contains(exit) {
            return Err(AnalyticsError::InvalidInput {
                reason: format!("exit node not found: '{exit}'"),
            });
        }
        vec![exit.to_string()]
    };
    if exits.is_empty() {
        return Err(AnalyticsError::NoExit);
    }

    let n = graph.node_count();
    let multi = exits.len() > 1;
    debug!(exits = exits.len(), virtual_exit = multi, "post-dominators");

    // Reversed orientation: successors are the sources of incoming edges.
    let mut ids: Vec<String> = graph.node_ids().map(str::to_string).collect();
    let mut succs: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            graph
                .incoming(id)
                .map(|edge| graph.index_of(&edge.from).unwrap())
                .collect()
        })
        .collect();

    let entry_idx = if multi {
        // In the reversed graph the virtual exit points at each real exit.
        ids.push(VIRTUAL_EXIT_ID.to_string());
        succs.push(
            exits
                .iter()
                .map(|exit_id| graph.index_of(exit_id).unwrap())
                .collect(),
        );
        n
    } else {
        graph.index_of(&exits[0]).unwrap()
    };

    let flow = FlowGraph { ids, succs };
    let rpo = reverse_postorder(&flow, entry_idx, cancel)?;
    let idom_pos = chk_idoms(&flow, &rpo, cancel)?;

    if !multi {
        return Ok(assemble_tree(&flow, &rpo, &idom_pos, 1, false));
    }

    // Strip the sentinel (always rpo position 0). Nodes whose idom was the
    // sentinel become self-referential roots; positions shift down by one.
    const UNDEF: usize = usize::MAX;
    let stripped_rpo: Vec<usize> = rpo[1..].to_vec();
    let stripped_idoms: Vec<usize> = (1..rpo.len())
        .map(|pos| {
            let parent = idom_pos[pos];
            if parent == 0 || parent == UNDEF {
                pos - 1
            } else {
                parent - 1
            }
        })
        .collect();
    Ok(assemble_tree(
        &flow,
        &stripped_rpo,
        &stripped_idoms,
        exits.len(),
        true,
    ))
}
