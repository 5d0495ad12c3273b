//! Undirected weighted working graph for community detection.
//!
//! Leiden operates on an undirected view of the call graph: every directed
//! edge contributes weight 1.0 between its endpoints, self-loops keep their
//! conventional double contribution to the degree. Aggregation collapses a
//! partition into a smaller weighted graph whose self-loops carry the
//! internal weight of each part.

use std::collections::HashMap;

use symgraph_core::SymbolGraph;

#[derive(Debug, Clone)]
pub(crate) struct WeightedGraph {
    /// Per-node neighbour list `(other, weight)`, self-loops excluded.
    pub adj: Vec<Vec<(usize, f64)>>,
    /// Per-node self-loop weight.
    pub self_loop: Vec<f64>,
    /// Incident weight per node; self-loops count twice.
    pub degree: Vec<f64>,
    /// Total edge weight `m`: each undirected edge once, self-loops once.
    pub total_weight: f64,
}

impl WeightedGraph {
    pub fn with_nodes(n: usize) -> Self {
        WeightedGraph {
            adj: vec![Vec::new(); n],
            self_loop: vec![0.0; n],
            degree: vec![0.0; n],
            total_weight: 0.0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.adj.len()
    }

    pub fn add_undirected(&mut self, u: usize, v: usize, w: f64) {
        if u == v {
            self.self_loop[u] += w;
            self.degree[u] += 2.0 * w;
        } else {
            self.adj[u].push((v, w));
            self.adj[v].push((u, w));
            self.degree[u] += w;
            self.degree[v] += w;
        }
        self.total_weight += w;
    }

    /// Builds the undirected view of a frozen symbol graph. Parallel edges
    /// accumulate weight; duplicate adjacency entries are merged so the
    /// neighbour lists stay linear in distinct neighbours.
    pub fn from_symbol_graph(graph: &SymbolGraph) -> Self {
        let n = graph.node_count();
        let mut pair_weights: HashMap<(usize, usize), f64> = HashMap::new();
        for edge in graph.edges() {
            let u = graph.index_of(&edge.from).unwrap();
            let v = graph.index_of(&edge.to).unwrap();
            let key = if u <= v { (u, v) } else { (v, u) };
            *pair_weights.entry(key).or_insert(0.0) += 1.0;
        }
        let mut pairs: Vec<((usize, usize), f64)> = pair_weights.into_iter().collect();
        pairs.sort_unstable_by_key(|(key, _)| *key);

        let mut wg = WeightedGraph::with_nodes(n);
        for ((u, v), w) in pairs {
            wg.add_undirected(u, v, w);
        }
        wg
    }
}

/// Modularity of a partition under resolution `gamma`:
/// `Q = sum_c (internal_c / m - gamma * (tot_c / 2m)^2)`.
pub(crate) fn modularity(graph: &WeightedGraph, assign: &[usize], gamma: f64) -> f64 {
    let m = graph.total_weight;
    if m <= 0.0 {
        return 0.0;
    }
    let communities = assign.iter().copied().max().map_or(0, |max| max + 1);
    let mut internal = vec![0.0; communities];
    let mut tot = vec![0.0; communities];
    for u in 0..graph.node_count() {
        let c = assign[u];
        tot[c] += graph.degree[u];
        internal[c] += graph.self_loop[u];
        for &(v, w) in &graph.adj[u] {
            if u < v && assign[v] == c {
                internal[c] += w;
            }
        }
    }
    let two_m = 2.0 * m;
    internal
        .iter()
        .zip(tot.iter())
        .map(|(int_c, tot_c)| int_c / m - gamma * (tot_c / two_m) * (tot_c / two_m))
        .sum()
}

/// Collapses the graph along `parts` (node -> part id). Returns the
/// aggregated graph plus the dense renumbering `part id -> aggregated node`,
/// assigned in order of first appearance by node index.
pub(crate) fn aggregate(
    graph: &WeightedGraph,
    parts: &[usize],
) -> (WeightedGraph, HashMap<usize, usize>) {
    let mut renumber: HashMap<usize, usize> = HashMap::new();
    for &part in parts {
        let next = renumber.len();
        renumber.entry(part).or_insert(next);
    }

    let mut pair_weights: HashMap<(usize, usize), f64> = HashMap::new();
    for u in 0..graph.node_count() {
        let cu = renumber[&parts[u]];
        if graph.self_loop[u] != 0.0 {
            *pair_weights.entry((cu, cu)).or_insert(0.0) += graph.self_loop[u];
        }
        for &(v, w) in &graph.adj[u] {
            if u < v {
                let cv = renumber[&parts[v]];
                let key = if cu <= cv { (cu, cv) } else { (cv, cu) };
                *pair_weights.entry(key).or_insert(0.0) += w;
            }
        }
    }
    let mut pairs: Vec<((usize, usize), f64)> = pair_weights.into_iter().collect();
    pairs.sort_unstable_by_key(|(key, _)| *key);

    let mut agg = WeightedGraph::with_nodes(renumber.len());
    for ((u, v), w) in pairs {
        agg.add_undirected(u, v, w);
    }
    (agg, renumber)
}
