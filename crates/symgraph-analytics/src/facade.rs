//! The `Analytics` facade: one handle per frozen graph.
//!
//! Binds every kernel to a shared graph reference, injects the caller's
//! trace and metric sinks, memoises dominator trees keyed on
//! `(entry, graph version)`, retains the latest heavy-light decomposition
//! behind a reader-writer slot, and recovers kernel panics into
//! [`AnalyticsError::Internal`] so no call unwinds into the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::debug;

use symgraph_core::{AnalyticsError, CacheStats, CancelToken, LruCache, SymbolGraph};

use crate::dominators::{compute_dominators, compute_post_dominators, DominatorTree, LcaEngine};
use crate::hld::{build_hld, Hld, PathSegment};
use crate::leiden::{detect_communities, detect_communities_parallel, CommunityResult, LeidenOptions};
use crate::loops::{detect_loops, LoopNest};
use crate::pagerank::{page_rank, page_rank_top, PageRankOptions, PageRankResult, RankedNode};
use crate::segment_tree::{Aggregation, SharedSegmentTree};
use crate::trace::{MetricSink, NoopSink, TraceSink, TraceStep};

/// Facade over one immutable graph.
pub struct Analytics {
    graph: Arc<SymbolGraph>,
    /// Dominator trees keyed `entry@version`.
    dom_cache: LruCache<String, Arc<DominatorTree>>,
    /// Post-dominator trees, keyed and cached independently.
    postdom_cache: LruCache<String, Arc<DominatorTree>>,
    hld_slot: RwLock<Option<Arc<Hld>>>,
    tracer: Arc<dyn TraceSink>,
    metrics: Arc<dyn MetricSink>,
}

impl Analytics {
    /// Binds the facade to a frozen graph with no-op sinks.
    pub fn new(graph: Arc<SymbolGraph>) -> Self {
        Self::with_sinks(graph, Arc::new(NoopSink), Arc::new(NoopSink))
    }

    /// Binds the facade with caller-provided observation sinks.
    pub fn with_sinks(
        graph: Arc<SymbolGraph>,
        tracer: Arc<dyn TraceSink>,
        metrics: Arc<dyn MetricSink>,
    ) -> Self {
        Analytics {
            graph,
            dom_cache: LruCache::with_default_capacity(),
            postdom_cache: LruCache::with_default_capacity(),
            hld_slot: RwLock::new(None),
            tracer,
            metrics,
        }
    }

    pub fn graph(&self) -> &Arc<SymbolGraph> {
        &self.graph
    }

    /// Runs a kernel under panic recovery and emits one trace step plus a
    /// duration observation.
    fn guarded<T>(
        &self,
        action: &'static str,
        target: &str,
        kernel: impl FnOnce() -> Result<T, AnalyticsError>,
    ) -> Result<T, AnalyticsError> {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(kernel)).unwrap_or_else(|payload| {
            Err(AnalyticsError::Internal {
                message: panic_message(payload.as_ref()),
            })
        });
        let elapsed = started.elapsed();

        let mut step = TraceStep::new(action, target);
        step.set_duration(elapsed);
        step.set_meta("nodes", self.graph.node_count().to_string());
        step.set_meta("edges", self.graph.edge_count().to_string());
        step.set_meta(
            "outcome",
            match &outcome {
                Ok(_) => "ok".to_string(),
                Err(err) => err.to_string(),
            },
        );
        self.tracer.record(step);
        self.metrics.observe_duration(action, elapsed);
        outcome
    }

    // -----------------------------------------------------------------------
    // PageRank
    // -----------------------------------------------------------------------

    pub fn page_rank(
        &self,
        options: PageRankOptions,
        cancel: &CancelToken,
    ) -> Result<PageRankResult, AnalyticsError> {
        let result = self.guarded("pagerank", "graph", || {
            Ok(page_rank(&self.graph, options, cancel))
        })?;
        self.metrics
            .observe_count("pagerank.iterations", u64::from(result.iterations));
        Ok(result)
    }

    pub fn page_rank_top(
        &self,
        k: usize,
        options: PageRankOptions,
        cancel: &CancelToken,
    ) -> Result<Vec<RankedNode>, AnalyticsError> {
        self.guarded("pagerank-top", "graph", || {
            Ok(page_rank_top(&self.graph, k, options, cancel))
        })
    }

    // -----------------------------------------------------------------------
    // Communities
    // -----------------------------------------------------------------------

    pub fn detect_communities(
        &self,
        options: LeidenOptions,
        cancel: &CancelToken,
    ) -> Result<CommunityResult, AnalyticsError> {
        let result = self.guarded("leiden", "graph", || {
            Ok(detect_communities(&self.graph, options, cancel))
        })?;
        self.metrics
            .observe_count("leiden.communities", result.communities.len() as u64);
        Ok(result)
    }

    pub fn detect_communities_parallel(
        &self,
        options: LeidenOptions,
        cancel: &CancelToken,
    ) -> Result<CommunityResult, AnalyticsError> {
        self.guarded("leiden-parallel", "graph", || {
            Ok(detect_communities_parallel(&self.graph, options, cancel))
        })
    }

    // -----------------------------------------------------------------------
    // Dominators
    // -----------------------------------------------------------------------

    pub fn dominators(
        &self,
        entry: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<DominatorTree>, AnalyticsError> {
        self.guarded("dominators", entry, || {
            compute_dominators(&self.graph, entry, cancel).map(Arc::new)
        })
    }

    /// Memoised dominators, keyed on `(entry, graph version)`.
    pub fn dominators_with_cache(
        &self,
        entry: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<DominatorTree>, AnalyticsError> {
        let key = format!("{entry}@{}", self.graph.version());
        if let Some(hit) = self.dom_cache.get(&key) {
            self.metrics.observe_cache("dominators", true);
            debug!(entry, "dominator cache hit");
            return Ok(hit);
        }
        self.metrics.observe_cache("dominators", false);
        let tree = self.dominators(entry, cancel)?;
        self.dom_cache.set(key, tree.clone());
        Ok(tree)
    }

    pub fn post_dominators(
        &self,
        exit: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<DominatorTree>, AnalyticsError> {
        self.guarded("post-dominators", exit, || {
            compute_post_dominators(&self.graph, exit, cancel).map(Arc::new)
        })
    }

    pub fn post_dominators_with_cache(
        &self,
        exit: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<DominatorTree>, AnalyticsError> {
        let key = format!("{exit}@{}", self.graph.version());
        if let Some(hit) = self.postdom_cache.get(&key) {
            self.metrics.observe_cache("post-dominators", true);
            return Ok(hit);
        }
        self.metrics.observe_cache("post-dominators", false);
        let tree = self.post_dominators(exit, cancel)?;
        self.postdom_cache.set(key, tree.clone());
        Ok(tree)
    }

    /// Binary-lifting LCA engine for a dominator tree.
    pub fn lca_engine(&self, tree: &DominatorTree) -> LcaEngine {
        LcaEngine::new(tree)
    }

    /// Hit/miss counters of the dominator result cache.
    pub fn dominator_cache_stats(&self) -> CacheStats {
        self.dom_cache.stats()
    }

    pub fn post_dominator_cache_stats(&self) -> CacheStats {
        self.postdom_cache.stats()
    }

    // -----------------------------------------------------------------------
    // Loops
    // -----------------------------------------------------------------------

    pub fn detect_loops(
        &self,
        tree: &DominatorTree,
        cancel: &CancelToken,
    ) -> Result<LoopNest, AnalyticsError> {
        self.guarded("loops", tree.entry(), || {
            detect_loops(&self.graph, tree, cancel)
        })
    }

    // -----------------------------------------------------------------------
    // Heavy-light decomposition
    // -----------------------------------------------------------------------

    /// Builds (or rebuilds) the retained decomposition rooted at `root`.
    pub fn build_hld(
        &self,
        root: &str,
        cancel: &CancelToken,
    ) -> Result<Arc<Hld>, AnalyticsError> {
        let hld = self.guarded("hld-build", root, || {
            build_hld(&self.graph, root, cancel).map(Arc::new)
        })?;
        self.metrics
            .observe_count("hld.nodes", hld.node_count() as u64);
        *self.hld_slot.write().unwrap() = Some(hld.clone());
        Ok(hld)
    }

    /// The retained decomposition, if one was built.
    pub fn hld(&self) -> Result<Arc<Hld>, AnalyticsError> {
        self.hld_slot
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| AnalyticsError::NotInitialized {
                what: "heavy-light decomposition".to_string(),
            })
    }

    pub fn lca(
        &self,
        u: &str,
        v: &str,
        cancel: &CancelToken,
    ) -> Result<String, AnalyticsError> {
        let hld = self.hld()?;
        self.guarded("hld-lca", u, || hld.lca(u, v, cancel))
    }

    pub fn distance(
        &self,
        u: &str,
        v: &str,
        cancel: &CancelToken,
    ) -> Result<u64, AnalyticsError> {
        let hld = self.hld()?;
        self.guarded("hld-distance", u, || hld.distance(u, v, cancel))
    }

    pub fn decompose_path(
        &self,
        u: &str,
        v: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<PathSegment>, AnalyticsError> {
        let hld = self.hld()?;
        self.guarded("hld-decompose", u, || hld.decompose_path(u, v, cancel))
    }

    // -----------------------------------------------------------------------
    // Segment tree
    // -----------------------------------------------------------------------

    /// Builds a reader-writer guarded segment tree over caller data.
    pub fn segment_tree(
        &self,
        values: &[i64],
        agg: Aggregation,
    ) -> Result<SharedSegmentTree, AnalyticsError> {
        self.guarded("segment-tree", "array", || {
            SharedSegmentTree::new(values, agg)
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
