//! Trace hand-off and in-memory retention.
//!
//! [`TraceSink`] is the seam between the agent loop and whatever stores
//! traces durably — the loop calls `record` exactly once per turn and
//! moves on. [`TraceStore`] is the in-process implementation backing
//! tests and the observability endpoints: a bounded, thread-safe ring of
//! recent traces with simple queries.

use crate::model::AgentTrace;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::RwLock;
use tracing::debug;

/// Receives the finalized trace of each conversation turn.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, trace: AgentTrace);
}

/// Thread-safe in-memory trace retention with bounded capacity.
pub struct TraceStore {
    traces: RwLock<Vec<AgentTrace>>,
    capacity: usize,
}

const DEFAULT_CAPACITY: usize = 5_000;

impl TraceStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A store holding at most `capacity` traces; the oldest are evicted
    /// first when the bound is reached.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Insert a trace, evicting the oldest if at capacity.
    pub fn insert(&self, trace: AgentTrace) {
        let mut traces = self.traces.write().unwrap();
        if traces.len() >= self.capacity {
            let excess = traces.len() + 1 - self.capacity;
            traces.drain(..excess);
            debug!(evicted = excess, "Trace store at capacity, evicting oldest");
        }
        traces.push(trace);
    }

    /// Get a trace by id.
    pub fn get(&self, trace_id: &str) -> Option<AgentTrace> {
        let traces = self.traces.read().unwrap();
        traces.iter().find(|t| t.id == trace_id).cloned()
    }

    /// The most recent traces, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AgentTrace> {
        let traces = self.traces.read().unwrap();
        traces.iter().rev().take(limit).cloned().collect()
    }

    /// All traces for a conversation, oldest first.
    pub fn for_conversation(&self, conversation_id: &str) -> Vec<AgentTrace> {
        let traces = self.traces.read().unwrap();
        traces
            .iter()
            .filter(|t| t.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    /// Number of retained traces.
    pub fn len(&self) -> usize {
        self.traces.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop traces that started before the cutoff. Returns how many were
    /// removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut traces = self.traces.write().unwrap();
        let before = traces.len();
        traces.retain(|t| t.started_at >= cutoff);
        before - traces.len()
    }
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TraceSink for TraceStore {
    async fn record(&self, trace: AgentTrace) {
        self.insert(trace);
    }
}
