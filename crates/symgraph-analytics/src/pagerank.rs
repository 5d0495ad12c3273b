//! Damped random-walk importance scoring.
//!
//! Power iteration over the out-edge transition structure with explicit
//! dangling-mass redistribution: a sink's rank is spread uniformly instead
//! of leaking, so the score vector keeps summing to 1 on graphs full of
//! leaf functions. Convergence is the L1 delta between successive vectors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use symgraph_core::{CancelToken, Symbol, SymbolGraph};

/// Tuning knobs for [`page_rank`]. Out-of-range values are replaced by the
/// defaults rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageRankOptions {
    /// Damping factor, in (0, 1].
    pub damping: f64,
    pub max_iterations: u32,
    /// L1 convergence threshold.
    pub convergence: f64,
}

impl Default for PageRankOptions {
    fn default() -> Self {
        PageRankOptions {
            damping: 0.85,
            max_iterations: 100,
            convergence: 1e-6,
        }
    }
}

impl PageRankOptions {
    /// The defaults work well for call graphs; alias kept so call sites
    /// read as intent.
    pub fn for_call_graphs() -> Self {
        PageRankOptions::default()
    }

    /// Substitutes defaults for non-positive or out-of-range fields.
    pub fn validated(self) -> Self {
        let defaults = PageRankOptions::default();
        PageRankOptions {
            damping: if self.damping <= 0.0 || self.damping > 1.0 {
                defaults.damping
            } else {
                self.damping
            },
            max_iterations: if self.max_iterations == 0 {
                defaults.max_iterations
            } else {
                self.max_iterations
            },
            convergence: if self.convergence <= 0.0 {
                defaults.convergence
            } else {
                self.convergence
            },
        }
    }
}

/// Scores plus convergence bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRankResult {
    /// Node id -> score in [0, 1]. Scores sum to 1 (± float noise).
    pub scores: HashMap<String, f64>,
    pub iterations: u32,
    pub converged: bool,
}

/// One entry of the top-K ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: String,
    pub symbol: Symbol,
    pub score: f64,
    /// 1-indexed position in the ranking.
    pub rank: usize,
    /// Structural importance proxy: `2 * in_degree + out_degree`.
    pub degree_score: u64,
}

/// Runs power iteration until the L1 delta drops below the threshold or the
/// iteration budget is spent.
///
/// Cancellation is polled at the top of each iteration; on cancel the most
/// recent (not yet converged) scores are returned with `converged = false`.
/// An empty graph yields empty scores with `converged = true`.
pub fn page_rank(
    graph: &SymbolGraph,
    options: PageRankOptions,
    cancel: &CancelToken,
) -> PageRankResult {
    let options = options.validated();
    let v = graph.node_count();
    if v == 0 {
        return PageRankResult {
            scores: HashMap::new(),
            iterations: 0,
            converged: true,
        };
    }
    let n = v as f64;
    let d = options.damping;

    // Dense working arrays; node order is the graph's deterministic order.
    let mut out_degree = vec![0usize; v];
    let mut edges: Vec<(u32, u32)> = Vec::with_capacity(graph.edge_count());
    for edge in graph.edges() {
        let from = graph.index_of(&edge.from).unwrap();
        let to = graph.index_of(&edge.to).unwrap();
        out_degree[from] += 1;
        edges.push((from as u32, to as u32));
    }

    let mut scores = vec![1.0 / n; v];
    let mut iterations = 0u32;
    let mut converged = false;

    while iterations < options.max_iterations {
        if cancel.is_cancelled() {
            break;
        }
        iterations += 1;

        // Dangling mass: sinks spread their damped rank uniformly.
        let dangling: f64 = scores
            .iter()
            .zip(out_degree.iter())
            .filter(|(_, deg)| **deg == 0)
            .map(|(score, _)| *score)
            .sum();
        let base = (1.0 - d) / n + d * dangling / n;

        let mut next = vec![base; v];
        for &(from, to) in &edges {
            let from = from as usize;
            next[to as usize] += d * scores[from] / out_degree[from] as f64;
        }

        let delta: f64 = scores
            .iter()
            .zip(next.iter())
            .map(|(old, new)| (old - new).abs())
            .sum();
        scores = next;

        if delta < options.convergence {
            converged = true;
            break;
        }
    }

    debug!(
        iterations,
        converged,
        nodes = v,
        "pagerank finished"
    );

    let scores = graph
        .node_ids()
        .enumerate()
        .map(|(idx, id)| (id.to_string(), scores[idx]))
        .collect();
    PageRankResult {
        scores,
        iterations,
        converged,
    }
}

/// Top-K nodes by PageRank score, descending; ties broken by node id
/// ascending. `k = 0` yields an empty ranking; `k > V` is clamped.
pub fn page_rank_top(
    graph: &SymbolGraph,
    k: usize,
    options: PageRankOptions,
    cancel: &CancelToken,
) -> Vec<RankedNode> {
    if k == 0 {
        return Vec::new();
    }
    let result = page_rank(graph, options, cancel);

    let mut ranked: Vec<(String, f64)> = result.scores.into_iter().collect();
    ranked.sort_unstable_by(|(id_a, score_a), (id_b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| id_a.cmp(id_b))
    });
    ranked.truncate(k.min(graph.node_count()));

    ranked
        .into_iter()
        .enumerate()
        .map(|(pos, (id, score))| {
            let degree_score = 2 * graph.in_degree(&id) as u64 + graph.out_degree(&id) as u64;
            RankedNode {
                symbol: graph.get_node(&id).cloned().unwrap_or_else(|| {
                    Symbol::new(id.clone(), symgraph_core::SymbolKind::Function)
                }),
                id,
                score,
                rank: pos + 1,
                degree_score,
            }
        })
        .collect()
}
