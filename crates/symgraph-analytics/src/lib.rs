//! Structural and spectral analytics over a frozen symbol graph.
//!
//! Five algorithmic subsystems behind one [`Analytics`] facade:
//! PageRank importance scoring, Leiden community detection, dominator and
//! post-dominator trees with derived queries, natural loop detection, and
//! heavy-light decomposition with a lazy segment tree. All kernels take a
//! [`CancelToken`](symgraph_core::CancelToken) and read the graph through
//! its immutable accessors only.

pub mod dominators;
pub mod facade;
pub mod hld;
pub mod leiden;
pub mod loops;
pub mod pagerank;
pub mod segment_tree;
pub mod trace;

// Re-export commonly used types and entry points
pub use dominators::{
    compute_dominators, compute_post_dominators, DominatorTree, LcaEngine, VIRTUAL_EXIT_ID,
};
pub use facade::Analytics;
pub use hld::{build_hld, Hld, HldStatsSnapshot, PathSegment};
pub use leiden::{
    detect_communities, detect_communities_parallel, Community, CommunityResult, LeidenOptions,
};
pub use loops::{detect_loops, Loop, LoopNest};
pub use pagerank::{page_rank, page_rank_top, PageRankOptions, PageRankResult, RankedNode};
pub use segment_tree::{Aggregation, SegmentTree, SharedSegmentTree};
pub use trace::{MemorySink, MetricSink, NoopSink, TraceSink, TraceStep};
