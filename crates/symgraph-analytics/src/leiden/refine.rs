//! Refinement stage: the well-connectedness guarantee.
//!
//! Within each community produced by local moving, every node starts as a
//! singleton and may merge only into an adjacent refined subcommunity of
//! the same community, and only when the node is well connected to the rest
//! of its community. Merging strictly along edges keeps every refined
//! community internally connected, which is the property Leiden adds over
//! Louvain. Nodes are visited in ascending index order and subcommunity
//! ties resolve to the lowest id, so refinement is deterministic.

use super::weighted::WeightedGraph;

/// Splits the `communities` assignment into refined subcommunities.
/// Returns the refined assignment (subcommunity ids are node indices of
/// each subcommunity's first member).
pub(crate) fn refine(graph: &WeightedGraph, communities: &[usize], gamma: f64) -> Vec<usize> {
    let n = graph.node_count();
    let m = graph.total_weight;
    let mut refined: Vec<usize> = (0..n).collect();
    let mut sub_tot: Vec<f64> = graph.degree.clone();
    let mut sub_size: Vec<usize> = vec![1; n];

    if m <= 0.0 {
        return refined;
    }

    // Incident weight per community, for the well-connectedness threshold.
    let comm_count = communities.iter().copied().max().map_or(0, |max| max + 1);
    let mut comm_tot = vec![0.0; comm_count];
    for v in 0..n {
        comm_tot[communities[v]] += graph.degree[v];
    }

    for v in 0..n {
        // Only still-singleton nodes may merge; anything already grown
        // stays where it is.
        if sub_size[refined[v]] != 1 || refined[v] != v {
            continue;
        }
        let community = communities[v];
        let k_v = graph.degree[v];

        // Well-connectedness of v to the rest of its community:
        // w(v, C - v) >= gamma * k_v * (k_C - k_v) / 2m.
        let w_to_community: f64 = graph.adj[v]
            .iter()
            .filter(|(u, _)| communities[*u] == community)
            .map(|(_, w)| *w)
            .sum();
        let threshold = gamma * k_v * (comm_tot[community] - k_v) / (2.0 * m);
        if w_to_community < threshold {
            continue;
        }

        // Candidate subcommunities: adjacent, same community.
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        for &(u, w) in &graph.adj[v] {
            if communities[u] != community {
                continue;
            }
            let sub = refined[u];
            match candidates.iter_mut().find(|(s, _)| *s == sub) {
                Some((_, acc)) => *acc += w,
                None => candidates.push((sub, w)),
            }
        }
        candidates.sort_unstable_by_key(|(sub, _)| *sub);

        let mut best: Option<usize> = None;
        let mut best_gain = 0.0;
        for &(sub, w_to) in &candidates {
            if sub == v {
                continue;
            }
            let gain = w_to - gamma * sub_tot[sub] * k_v / (2.0 * m);
            if gain > best_gain {
                best_gain = gain;
                best = Some(sub);
            }
        }
        if let Some(target) = best {
            refined[v] = target;
            sub_tot[target] += k_v;
            sub_size[target] += 1;
            sub_size[v] = 0;
        }
    }
    refined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refinement_never_crosses_communities() {
        // Path 0-1-2-3 with communities {0,1} and {2,3}.
        let mut graph = WeightedGraph::with_nodes(4);
        graph.add_undirected(0, 1, 1.0);
        graph.add_undirected(1, 2, 1.0);
        graph.add_undirected(2, 3, 1.0);
        let communities = vec![0, 0, 1, 1];
        let refined = refine(&graph, &communities, 1.0);
        for v in 0..4 {
            assert_eq!(communities[refined[v]], communities[v]);
        }
    }

    #[test]
    fn connected_pair_merges() {
        let mut graph = WeightedGraph::with_nodes(2);
        graph.add_undirected(0, 1, 1.0);
        let refined = refine(&graph, &[0, 0], 1.0);
        assert_eq!(refined[0], refined[1]);
    }

    #[test]
    fn disconnected_members_stay_apart() {
        // 0 and 1 forced into one community without any edge between them:
        // refinement must keep them separate (the connectivity repair).
        let mut graph = WeightedGraph::with_nodes(4);
        graph.add_undirected(0, 2, 1.0);
        graph.add_undirected(1, 3, 1.0);
        let refined = refine(&graph, &[0, 0, 1, 1], 1.0);
        assert_ne!(refined[0], refined[1]);
    }

    #[test]
    fn refinement_is_deterministic() {
        let mut graph = WeightedGraph::with_nodes(6);
        for (u, v) in [(0, 1), (1, 2), (2, 0), (3, 4), (4, 5), (5, 3), (2, 3)] {
            graph.add_undirected(u, v, 1.0);
        }
        let communities = vec![0, 0, 0, 1, 1, 1];
        let first = refine(&graph, &communities, 1.0);
        let second = refine(&graph, &communities, 1.0);
        assert_eq!(first, second);
    }
}
