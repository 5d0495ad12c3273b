//! Leiden community detection.
//!
//! Three-phase scheme per level: greedy local moving, refinement inside
//! each community (the well-connectedness guarantee), then aggregation of
//! refined subcommunities into a smaller weighted graph. Levels repeat
//! until the modularity gain drops below the convergence threshold or the
//! iteration budget is exhausted.
//!
//! Node visit order is shuffled with a seeded `ChaCha8Rng`, so identical
//! options always produce identical partitions.

mod local_move;
mod refine;
mod weighted;

use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use symgraph_core::{CancelToken, SymbolGraph};

use local_move::{pass_parallel, pass_sequential, Partition};
use refine::refine;
use weighted::{aggregate, modularity, WeightedGraph};

/// Node count above which the parallel variant shards its local-move pass.
pub const PARALLEL_THRESHOLD: usize = 1000;

/// Safety cap on local-move passes within one level.
const MAX_PASSES: usize = 100;

/// Tuning knobs for [`detect_communities`]. Non-positive values fall back
/// to the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeidenOptions {
    /// Maximum aggregation levels.
    pub max_iterations: u32,
    /// Stop once the per-level modularity gain drops below this.
    pub convergence_threshold: f64,
    /// Communities smaller than this are dropped from the returned list.
    pub min_community_size: usize,
    /// Resolution gamma; larger values favour more, smaller communities.
    pub resolution: f64,
    /// Seed for the node-visit shuffle.
    pub seed: u64,
}

impl Default for LeidenOptions {
    fn default() -> Self {
        LeidenOptions {
            max_iterations: 10,
            convergence_threshold: 1e-4,
            min_community_size: 1,
            resolution: 1.0,
            seed: 0x5EED,
        }
    }
}

impl LeidenOptions {
    pub fn validated(self) -> Self {
        let defaults = LeidenOptions::default();
        LeidenOptions {
            max_iterations: if self.max_iterations == 0 {
                defaults.max_iterations
            } else {
                self.max_iterations
            },
            convergence_threshold: if self.convergence_threshold <= 0.0 {
                defaults.convergence_threshold
            } else {
                self.convergence_threshold
            },
            min_community_size: if self.min_community_size == 0 {
                defaults.min_community_size
            } else {
                self.min_community_size
            },
            resolution: if self.resolution <= 0.0 {
                defaults.resolution
            } else {
                self.resolution
            },
            seed: self.seed,
        }
    }
}

/// One detected community with its summary statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: usize,
    /// Member node ids, in graph order.
    pub nodes: Vec<String>,
    /// Directed edges with both endpoints inside.
    pub internal_edges: usize,
    /// Directed edges with exactly one endpoint inside.
    pub external_edges: usize,
    /// `2 * internal / (n * (n - 1))`; zero for singletons.
    pub connectivity: f64,
    /// Most frequent package among members; ties go lexicographically.
    pub dominant_package: String,
}

/// Full detection output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityResult {
    pub communities: Vec<Community>,
    /// Resolution-scaled modularity of the full partition, in [-1, 1].
    pub modularity: f64,
    /// Aggregation levels performed.
    pub iterations: u32,
    pub converged: bool,
    pub node_count: usize,
    pub edge_count: usize,
    /// Node id -> community id, for members of returned communities only.
    pub membership: HashMap<String, usize>,
}

impl CommunityResult {
    /// Community id containing `node`, if its community was returned.
    pub fn community_of(&self, node: &str) -> Option<usize> {
        self.membership.get(node).copied()
    }
}

/// Sequential Leiden.
pub fn detect_communities(
    graph: &SymbolGraph,
    options: LeidenOptions,
    cancel: &CancelToken,
) -> CommunityResult {
    detect_with(graph, options, cancel, false)
}

/// Parallel variant: local moving is sharded across workers against a
/// per-pass snapshot once the working graph exceeds [`PARALLEL_THRESHOLD`]
/// nodes. Refinement and aggregation stay sequential.
pub fn detect_communities_parallel(
    graph: &SymbolGraph,
    options: LeidenOptions,
    cancel: &CancelToken,
) -> CommunityResult {
    detect_with(graph, options, cancel, true)
}

fn detect_with(
    graph: &SymbolGraph,
    options: LeidenOptions,
    cancel: &CancelToken,
    parallel: bool,
) -> CommunityResult {
    let options = options.validated();
    let n = graph.node_count();
    if n == 0 {
        return CommunityResult {
            communities: Vec::new(),
            modularity: 0.0,
            iterations: 0,
            converged: true,
            node_count: 0,
            edge_count: 0,
            membership: HashMap::new(),
        };
    }

    let base = WeightedGraph::from_symbol_graph(graph);
    let gamma = options.resolution;

    // Original node -> community, projected through all levels so far.
    let mut final_comm: Vec<usize> = (0..n).collect();
    let mut membership: Vec<usize> = (0..n).collect();
    let mut working = base.clone();
    let mut iterations = 0u32;
    let mut converged = true;
    let mut prev_q: Option<f64> = None;

    if base.total_weight > 0.0 {
        converged = false;
        for level in 0..options.max_iterations {
            if cancel.is_cancelled() {
                break;
            }
            iterations = level + 1;

            let mut order: Vec<usize> = (0..working.node_count()).collect();
            let mut rng = ChaCha8Rng::seed_from_u64(options.seed ^ u64::from(level));
            order.shuffle(&mut rng);

            let mut partition = Partition::singletons(&working);
            let mut cancelled = false;
            let mut passes = 0;
            loop {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let moves = if parallel && working.node_count() >= PARALLEL_THRESHOLD {
                    pass_parallel(&working, &mut partition, &order, gamma)
                } else {
                    pass_sequential(&working, &mut partition, &order, gamma)
                };
                passes += 1;
                if moves == 0 || passes >= MAX_PASSES {
                    break;
                }
            }

            // Project this level's communities back to original nodes.
            for orig in 0..n {
                final_comm[orig] = partition.assign[membership[orig]];
            }
            if cancelled {
                break;
            }

            let q = modularity(&working, &partition.assign, gamma);
            debug!(level, passes, modularity = q, nodes = working.node_count(), "leiden level");
            if let Some(pq) = prev_q {
                if q - pq < options.convergence_threshold {
                    converged = true;
                    break;
                }
            }
            prev_q = Some(q);

            if cancel.is_cancelled() {
                break;
            }
            let refined = refine(&working, &partition.assign, gamma);
            let distinct = {
                let mut seen = vec![false; working.node_count()];
                let mut count = 0;
                for &part in &refined {
                    if !seen[part] {
                        seen[part] = true;
                        count += 1;
                    }
                }
                count
            };
            if distinct == working.node_count() {
                // Nothing merged; another level cannot change anything.
                converged = true;
                break;
            }
            let (aggregated, renumber) = aggregate(&working, &refined);
            for orig in 0..n {
                membership[orig] = renumber[&refined[membership[orig]]];
            }
            working = aggregated;
        }
        if cancel.is_cancelled() {
            converged = false;
        }
    }

    // Guarantee: every returned community induces a connected undirected
    // subgraph. Local moving alone can strand a community's members when a
    // cut vertex migrates away; splitting into components never lowers
    // modularity.
    let final_comm = split_into_components(&base, &final_comm);

    let q = modularity(&base, &normalise(&final_comm), gamma);
    let (communities, membership) =
        build_communities(graph, &final_comm, options.min_community_size);
    CommunityResult {
        communities,
        modularity: q,
        iterations,
        converged,
        node_count: n,
        edge_count: graph.edge_count(),
        membership,
    }
}

/// Splits every community into its undirected connected components. The
/// new label of a component is its smallest member index, so the result is
/// deterministic.
fn split_into_components(base: &WeightedGraph, assign: &[usize]) -> Vec<usize> {
    let n = assign.len();
    let mut labels = vec![usize::MAX; n];
    for start in 0..n {
        if labels[start] != usize::MAX {
            continue;
        }
        labels[start] = start;
        let mut queue = VecDeque::from([start]);
        while let Some(u) = queue.pop_front() {
            for &(v, _) in &base.adj[u] {
                if labels[v] == usize::MAX && assign[v] == assign[start] {
                    labels[v] = start;
                    queue.push_back(v);
                }
            }
        }
    }
    labels
}

/// Renumbers arbitrary community ids to dense 0..k by first appearance.
fn normalise(assign: &[usize]) -> Vec<usize> {
    let mut renumber: HashMap<usize, usize> = HashMap::new();
    assign
        .iter()
        .map(|&c| {
            let next = renumber.len();
            *renumber.entry(c).or_insert(next)
        })
        .collect()
}

fn build_communities(
    graph: &SymbolGraph,
    final_comm: &[usize],
    min_size: usize,
) -> (Vec<Community>, HashMap<String, usize>) {
    // Group member indices by community, ordered by first appearance.
    let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
    for (idx, &comm) in final_comm.iter().enumerate() {
        groups.entry(comm).or_default().push(idx);
    }

    let mut communities = Vec::new();
    let mut membership = HashMap::new();
    for (_, members) in groups {
        if members.len() < min_size {
            continue;
        }
        let id = communities.len();
        let member_set: std::collections::HashSet<usize> = members.iter().copied().collect();

        let mut internal = 0usize;
        let mut external = 0usize;
        for edge in graph.edges() {
            let from = graph.index_of(&edge.from).unwrap();
            let to = graph.index_of(&edge.to).unwrap();
            match (member_set.contains(&from), member_set.contains(&to)) {
                (true, true) => internal += 1,
                (true, false) | (false, true) => external += 1,
                (false, false) => {}
            }
        }

        let size = members.len();
        let connectivity = if size > 1 {
            2.0 * internal as f64 / (size as f64 * (size as f64 - 1.0))
        } else {
            0.0
        };

        // Dominant package: argmax frequency, ties lexicographic smallest.
        let mut package_counts: HashMap<&str, usize> = HashMap::new();
        for &idx in &members {
            let id = graph.id_at(idx).unwrap();
            let package = graph.get_node(id).unwrap().package_or_dir();
            *package_counts.entry(package).or_insert(0) += 1;
        }
        let dominant_package = package_counts
            .into_iter()
            .max_by(|(name_a, count_a), (name_b, count_b)| {
                count_a.cmp(count_b).then_with(|| name_b.cmp(name_a))
            })
            .map(|(name, _)| name.to_string())
            .unwrap_or_default();

        let nodes: Vec<String> = members
            .iter()
            .map(|&idx| graph.id_at(idx).unwrap().to_string())
            .collect();
        for node in &nodes {
            membership.insert(node.clone(), id);
        }
        communities.push(Community {
            id,
            nodes,
            internal_edges: internal,
            external_edges: external,
            connectivity,
            dominant_package,
        });
    }
    (communities, membership)
}
