//! The frozen symbol graph and its builder.
//!
//! [`GraphBuilder`] is the only mutable surface: the upstream extractor adds
//! symbols and typed edges, then calls [`GraphBuilder::freeze`] exactly once.
//! The resulting [`SymbolGraph`] exposes no mutators -- freeze is one-way by
//! construction, so every analytics kernel can read it without
//! synchronisation.
//!
//! # Determinism
//!
//! Node iteration follows insertion order (an `IndexMap` keyed by symbol
//! id), and per-node edge lists are materialised at freeze time in edge
//! insertion order. Two runs over the same frozen graph therefore visit
//! nodes and edges identically, which is the root of the engine's
//! reproducibility guarantee.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use smallvec::SmallVec;

use crate::error::AnalyticsError;
use crate::symbol::{EdgeKind, EdgeRecord, Location, Symbol};

/// Process-wide floor for version stamps, so two graphs frozen within the
/// same millisecond still get distinct, increasing versions.
static VERSION_FLOOR: AtomicU64 = AtomicU64::new(0);

fn next_version() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut floor = VERSION_FLOOR.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(floor + 1);
        match VERSION_FLOOR.compare_exchange_weak(
            floor,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => floor = actual,
        }
    }
}

/// Mutable accumulation stage for a [`SymbolGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: StableDiGraph<Symbol, EdgeRecord>,
    ids: IndexMap<String, NodeIndex>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        GraphBuilder::default()
    }

    /// Registers a symbol under a stable string id.
    ///
    /// Empty and duplicate ids are rejected.
    pub fn add_symbol(
        &mut self,
        id: impl Into<String>,
        symbol: Symbol,
    ) -> Result<(), AnalyticsError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AnalyticsError::invalid_input("empty symbol id"));
        }
        if self.ids.contains_key(&id) {
            return Err(AnalyticsError::InvalidInput {
                reason: format!("duplicate symbol id: '{id}'"),
            });
        }
        let idx = self.graph.add_node(symbol);
        self.ids.insert(id, idx);
        Ok(())
    }

    /// Adds a typed edge between two existing symbols.
    ///
    /// Self-loops and parallel edges are permitted; unknown endpoints are
    /// not.
    pub fn add_edge(
        &mut self,
        from: &str,
        to: &str,
        kind: EdgeKind,
        location: Location,
    ) -> Result<(), AnalyticsError> {
        let from_idx = *self.ids.get(from).ok_or_else(|| AnalyticsError::InvalidInput {
            reason: format!("edge source not found: '{from}'"),
        })?;
        let to_idx = *self.ids.get(to).ok_or_else(|| AnalyticsError::InvalidInput {
            reason: format!("edge target not found: '{to}'"),
        })?;
        let record = EdgeRecord {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            location,
        };
        self.graph.add_edge(from_idx, to_idx, record);
        Ok(())
    }

    /// Freezes the graph. One-way: the builder is consumed and the returned
    /// [`SymbolGraph`] has no mutating methods.
    pub fn freeze(self) -> SymbolGraph {
        let node_count = self.ids.len();
        let mut out_edges: Vec<SmallVec<[u32; 4]>> = vec![SmallVec::new(); node_count];
        let mut in_edges: Vec<SmallVec<[u32; 4]>> = vec![SmallVec::new(); node_count];
        // Edge indices of a StableDiGraph that never saw a removal are
        // dense and in insertion order.
        for edge_idx in self.graph.edge_indices() {
            let (from, to) = self.graph.edge_endpoints(edge_idx).unwrap();
            out_edges[from.index()].push(edge_idx.index() as u32);
            in_edges[to.index()].push(edge_idx.index() as u32);
        }

        let fingerprint = fingerprint(&self.graph, &self.ids);
        SymbolGraph {
            graph: self.graph,
            ids: self.ids,
            out_edges,
            in_edges,
            built_at_milli: next_version(),
            fingerprint,
        }
    }
}

/// Stable blake3 fingerprint over the node and edge sets.
///
/// Ids and edge tuples are sorted before hashing so the fingerprint depends
/// only on graph content, never on insertion order.
fn fingerprint(
    graph: &StableDiGraph<Symbol, EdgeRecord>,
    ids: &IndexMap<String, NodeIndex>,
) -> String {
    let mut hasher = blake3::Hasher::new();

    let mut node_lines: Vec<String> = ids
        .iter()
        .map(|(id, idx)| {
            let symbol = &graph[*idx];
            format!(
                "n\x1f{id}\x1f{}",
                serde_json::to_string(symbol).unwrap_or_default()
            )
        })
        .collect();
    node_lines.sort_unstable();

    let mut edge_lines: Vec<String> = graph
        .edge_indices()
        .map(|edge_idx| {
            let record = &graph[edge_idx];
            format!(
                "e\x1f{}\x1f{}\x1f{:?}\x1f{}\x1f{}",
                record.from, record.to, record.kind, record.location.file, record.location.line
            )
        })
        .collect();
    edge_lines.sort_unstable();

    for line in node_lines.iter().chain(edge_lines.iter()) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

/// An immutable, frozen call graph of program symbols.
///
/// All read paths are lock-free: the graph cannot change after
/// [`GraphBuilder::freeze`], so shared references may be handed to any
/// number of concurrent kernels.
#[derive(Debug)]
pub struct SymbolGraph {
    graph: StableDiGraph<Symbol, EdgeRecord>,
    ids: IndexMap<String, NodeIndex>,
    /// Per-node outgoing edge ids, in edge insertion order.
    out_edges: Vec<SmallVec<[u32; 4]>>,
    /// Per-node incoming edge ids, in edge insertion order.
    in_edges: Vec<SmallVec<[u32; 4]>>,
    built_at_milli: u64,
    fingerprint: String,
}

impl SymbolGraph {
    /// Builds an empty frozen graph. Mostly useful in tests.
    pub fn empty() -> Self {
        GraphBuilder::new().freeze()
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Monotonic version stamp, the cache invalidation key.
    pub fn version(&self) -> u64 {
        self.built_at_milli
    }

    /// Stable content fingerprint (hex); the HLD staleness key.
    pub fn hash(&self) -> &str {
        &self.fingerprint
    }

    pub fn get_node(&self, id: &str) -> Option<&Symbol> {
        self.ids.get(id).map(|idx| &self.graph[*idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Node ids in deterministic (insertion) order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    /// `(id, symbol)` pairs in deterministic (insertion) order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &Symbol)> {
        self.ids
            .iter()
            .map(|(id, idx)| (id.as_str(), &self.graph[*idx]))
    }

    /// Dense index of a node in 0..V, following insertion order.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.get_index_of(id)
    }

    /// Inverse of [`index_of`](Self::index_of).
    pub fn id_at(&self, index: usize) -> Option<&str> {
        self.ids.get_index(index).map(|(id, _)| id.as_str())
    }

    fn edge_at(&self, edge_id: u32) -> &EdgeRecord {
        &self.graph[petgraph::graph::EdgeIndex::new(edge_id as usize)]
    }

    /// Outgoing edges of a node, in insertion order. Unknown ids yield an
    /// empty iterator.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &EdgeRecord> {
        self.ids
            .get_index_of(id)
            .into_iter()
            .flat_map(|pos| self.out_edges[pos].iter())
            .map(|edge_id| self.edge_at(*edge_id))
    }

    /// Incoming edges of a node, in insertion order.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &EdgeRecord> {
        self.ids
            .get_index_of(id)
            .into_iter()
            .flat_map(|pos| self.in_edges[pos].iter())
            .map(|edge_id| self.edge_at(*edge_id))
    }

    /// Outgoing edges restricted to one relationship kind.
    pub fn outgoing_of_kind(&self, id: &str, kind: EdgeKind) -> impl Iterator<Item = &EdgeRecord> {
        self.outgoing(id).filter(move |edge| edge.kind == kind)
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.ids
            .get_index_of(id)
            .map_or(0, |pos| self.out_edges[pos].len())
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.ids
            .get_index_of(id)
            .map_or(0, |pos| self.in_edges[pos].len())
    }

    /// Every edge record, in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &EdgeRecord> {
        self.graph.edge_indices().map(|idx| &self.graph[idx])
    }
}
