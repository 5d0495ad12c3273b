//! Greedy modularity-ascent node moves.
//!
//! One pass visits every node in the given order and moves it to the
//! neighbouring community with the largest strictly positive modularity
//! gain, ties resolved toward the lowest community id. The parallel pass
//! evaluates all moves against an immutable snapshot of the assignment and
//! applies them at the end, trading a little convergence speed for
//! race-free sharding.

use rayon::prelude::*;

use super::weighted::WeightedGraph;

/// Community bookkeeping shared by the passes: assignment vector plus the
/// incident-weight total of every community.
#[derive(Debug, Clone)]
pub(crate) struct Partition {
    pub assign: Vec<usize>,
    pub comm_tot: Vec<f64>,
}

impl Partition {
    /// Every node in its own community.
    pub fn singletons(graph: &WeightedGraph) -> Self {
        Partition {
            assign: (0..graph.node_count()).collect(),
            comm_tot: graph.degree.clone(),
        }
    }
}

/// Best target community for `v` given an assignment snapshot. Returns
/// `None` when staying put is at least as good as every alternative.
fn best_move(
    graph: &WeightedGraph,
    assign: &[usize],
    comm_tot: &[f64],
    gamma: f64,
    v: usize,
) -> Option<usize> {
    let m = graph.total_weight;
    let current = assign[v];
    let k_v = graph.degree[v];

    // Weight from v to each adjacent community.
    let mut candidates: Vec<(usize, f64)> = Vec::with_capacity(graph.adj[v].len());
    for &(u, w) in &graph.adj[v] {
        let c = assign[u];
        match candidates.iter_mut().find(|(cc, _)| *cc == c) {
            Some((_, acc)) => *acc += w,
            None => candidates.push((c, w)),
        }
    }
    // Lowest community id wins ties.
    candidates.sort_unstable_by_key(|(c, _)| *c);

    // Gain of membership in c, with v removed from its current community:
    // w(v, c) - gamma * tot_c * k_v / 2m.
    let gain = |c: usize, w_to: f64| {
        let tot = if c == current {
            comm_tot[c] - k_v
        } else {
            comm_tot[c]
        };
        w_to - gamma * tot * k_v / (2.0 * m)
    };

    let staying = gain(
        current,
        candidates
            .iter()
            .find(|(c, _)| *c == current)
            .map_or(0.0, |(_, w)| *w),
    );
    let mut best = current;
    let mut best_gain = staying;
    for &(c, w_to) in &candidates {
        if c == current {
            continue;
        }
        let g = gain(c, w_to);
        if g > best_gain {
            best_gain = g;
            best = c;
        }
    }
    (best != current).then_some(best)
}

/// Sequential pass; applies each move immediately. Returns the move count.
pub(crate) fn pass_sequential(
    graph: &WeightedGraph,
    partition: &mut Partition,
    order: &[usize],
    gamma: f64,
) -> usize {
    let mut moves = 0;
    for &v in order {
        if let Some(target) = best_move(graph, &partition.assign, &partition.comm_tot, gamma, v) {
            let from = partition.assign[v];
            partition.comm_tot[from] -= graph.degree[v];
            partition.comm_tot[target] += graph.degree[v];
            partition.assign[v] = target;
            moves += 1;
        }
    }
    moves
}

/// Sharded pass: moves are evaluated against a snapshot taken at the start
/// of the pass and applied atomically at the end. Results can differ
/// numerically from the sequential pass but never race.
pub(crate) fn pass_parallel(
    graph: &WeightedGraph,
    partition: &mut Partition,
    order: &[usize],
    gamma: f64,
) -> usize {
    let snapshot_assign = partition.assign.clone();
    let snapshot_tot = partition.comm_tot.clone();

    let chunk = (order.len() / rayon::current_num_threads()).max(64);
    let proposals: Vec<(usize, usize)> = order
        .par_chunks(chunk)
        .flat_map_iter(|shard| {
            shard.iter().filter_map(|&v| {
                best_move(graph, &snapshot_assign, &snapshot_tot, gamma, v)
                    .map(|target| (v, target))
            })
        })
        .collect();

    let mut moves = 0;
    for (v, target) in proposals {
        let from = partition.assign[v];
        if from == target {
            continue;
        }
        partition.comm_tot[from] -= graph.degree[v];
        partition.comm_tot[target] += graph.degree[v];
        partition.assign[v] = target;
        moves += 1;
    }
    moves
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles joined by one bridge edge.
    fn bridged_triangles() -> WeightedGraph {
        let mut wg = WeightedGraph::with_nodes(6);
        for (u, v) in [(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3)] {
            wg.add_undirected(u, v, 1.0);
        }
        wg.add_undirected(2, 3, 1.0);
        wg
    }

    #[test]
    fn sequential_pass_clusters_triangles() {
        let graph = bridged_triangles();
        let mut partition = Partition::singletons(&graph);
        let order: Vec<usize> = (0..6).collect();
        // Iterate to a fixed point.
        while pass_sequential(&graph, &mut partition, &order, 1.0) > 0 {}
        assert_eq!(partition.assign[0], partition.assign[1]);
        assert_eq!(partition.assign[1], partition.assign[2]);
        assert_eq!(partition.assign[3], partition.assign[4]);
        assert_eq!(partition.assign[4], partition.assign[5]);
        assert_ne!(partition.assign[0], partition.assign[3]);
    }

    #[test]
    fn parallel_pass_reaches_a_fixed_point_too() {
        let graph = bridged_triangles();
        let mut partition = Partition::singletons(&graph);
        let order: Vec<usize> = (0..6).collect();
        let mut guard = 0;
        while pass_parallel(&graph, &mut partition, &order, 1.0) > 0 {
            guard += 1;
            assert!(guard < 100, "parallel local move failed to stabilise");
        }
        assert_eq!(partition.assign[0], partition.assign[2]);
        assert_eq!(partition.assign[3], partition.assign[5]);
    }

    #[test]
    fn comm_tot_stays_consistent_with_assign() {
        let graph = bridged_triangles();
        let mut partition = Partition::singletons(&graph);
        let order: Vec<usize> = (0..6).collect();
        while pass_sequential(&graph, &mut partition, &order, 1.0) > 0 {}
        let mut expected = vec![0.0; partition.comm_tot.len()];
        for v in 0..6 {
            expected[partition.assign[v]] += graph.degree[v];
        }
        for (got, want) in partition.comm_tot.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn isolated_nodes_stay_singletons() {
        let mut graph = WeightedGraph::with_nodes(3);
        graph.add_undirected(0, 1, 1.0);
        let mut partition = Partition::singletons(&graph);
        let order = [0, 1, 2];
        while pass_sequential(&graph, &mut partition, &order, 1.0) > 0 {}
        // Node 2 has no neighbours and can never move.
        assert_eq!(partition.assign[2], 2);
    }
}
