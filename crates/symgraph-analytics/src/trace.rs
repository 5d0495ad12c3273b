//! Observation hooks consumed by the facade.
//!
//! The engine does not own a telemetry pipeline. Instead it emits one
//! [`TraceStep`] per kernel invocation and a handful of metric observations
//! through caller-injected sinks. The default sinks discard everything;
//! tests use [`MemorySink`] to assert on emissions.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One structured record of a kernel invocation.
///
/// Plain data populated by setter calls; no builder machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    /// What ran (e.g. `"pagerank"`, `"dominators"`).
    pub action: String,
    /// The primary identifier the kernel operated on (entry node, root, ...).
    pub target: String,
    /// Emitting component name.
    pub tool: String,
    pub duration_ms: u64,
    /// String-keyed details; ordered so emissions are stable.
    pub metadata: BTreeMap<String, String>,
}

impl TraceStep {
    pub fn new(action: impl Into<String>, target: impl Into<String>) -> Self {
        TraceStep {
            action: action.into(),
            target: target.into(),
            tool: "symgraph-analytics".to_string(),
            duration_ms: 0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }
}

/// Receiver for trace steps. Injected by the caller.
pub trait TraceSink: Send + Sync {
    fn record(&self, step: TraceStep);
}

/// Receiver for metric observations. Injected by the caller.
pub trait MetricSink: Send + Sync {
    fn observe_duration(&self, name: &str, duration: Duration);
    fn observe_count(&self, name: &str, value: u64);
    fn observe_cache(&self, name: &str, hit: bool);
}

/// Discards every observation. The default when the caller injects nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _step: TraceStep) {}
}

impl MetricSink for NoopSink {
    fn observe_duration(&self, _name: &str, _duration: Duration) {}
    fn observe_count(&self, _name: &str, _value: u64) {}
    fn observe_cache(&self, _name: &str, _hit: bool) {}
}

/// Collects everything in memory. Test support.
#[derive(Debug, Default)]
pub struct MemorySink {
    steps: Mutex<Vec<TraceStep>>,
    cache_events: Mutex<Vec<(String, bool)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn steps(&self) -> Vec<TraceStep> {
        self.steps.lock().unwrap().clone()
    }

    pub fn cache_events(&self) -> Vec<(String, bool)> {
        self.cache_events.lock().unwrap().clone()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, step: TraceStep) {
        self.steps.lock().unwrap().push(step);
    }
}

impl MetricSink for MemorySink {
    fn observe_duration(&self, _name: &str, _duration: Duration) {}
    fn observe_count(&self, _name: &str, _value: u64) {}
    fn observe_cache(&self, name: &str, hit: bool) {
        self.cache_events
            .lock()
            .unwrap()
            .push((name.to_string(), hit));
    }
}
