//! Incremental trace accumulation.
//!
//! The agent loop owns one `TraceRecorder` per turn, appends an
//! [`AgentIteration`] as each round completes, and finalizes it with the
//! terminal outcome at loop exit. `finalize` consumes the recorder, so
//! the outcome can only ever be set once — the invariant is enforced by
//! the type system rather than a runtime flag.

use crate::model::{AgentIteration, AgentTrace, TraceOutcome};
use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

/// Accumulates one turn's trace while the loop runs.
#[derive(Debug)]
pub struct TraceRecorder {
    id: String,
    conversation_id: String,
    iterations: Vec<AgentIteration>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl TraceRecorder {
    /// Start recording a turn for the given conversation.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            iterations: Vec::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// The trace id (available before finalization, e.g. for log fields).
    pub fn trace_id(&self) -> &str {
        &self.id
    }

    /// Append a completed iteration. Iterations arrive in order; the
    /// recorder does not reorder or deduplicate.
    pub fn record_iteration(&mut self, iteration: AgentIteration) {
        self.iterations.push(iteration);
    }

    /// Number of iterations recorded so far.
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// Finalize with the terminal outcome, computing the derived metrics
    /// (cumulative tokens, peak context, duration) once.
    pub fn finalize(self, outcome: TraceOutcome) -> AgentTrace {
        let total_input_tokens = self.iterations.iter().map(|i| i.input_tokens as u64).sum();
        let total_output_tokens = self
            .iterations
            .iter()
            .map(|i| i.output_tokens as u64)
            .sum();
        let peak_input_tokens = self
            .iterations
            .iter()
            .map(|i| i.input_tokens)
            .max()
            .unwrap_or(0);

        AgentTrace {
            id: self.id,
            conversation_id: self.conversation_id,
            iterations: self.iterations,
            total_input_tokens,
            total_output_tokens,
            peak_input_tokens,
            duration_ms: self.started.elapsed().as_millis() as u64,
            started_at: self.started_at,
            ended_at: Utc::now(),
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IterationStop, ToolCallRecord};
    use serde_json::json;

    #[test]
    fn empty_trace_finalizes_with_zeroes() {
        let trace = TraceRecorder::new("conv-1").finalize(TraceOutcome::Cancelled);
        assert_eq!(trace.iterations.len(), 0);
        assert_eq!(trace.total_input_tokens, 0);
        assert_eq!(trace.peak_input_tokens, 0);
        assert_eq!(trace.outcome, TraceOutcome::Cancelled);
    }

    #[test]
    fn derived_metrics_computed_at_finalization() {
        let mut recorder = TraceRecorder::new("conv-1");

        let mut it1 = AgentIteration::new(1, IterationStop::ToolUse, 120, 30);
        it1.push_call(ToolCallRecord {
            tool_name: "table_query".into(),
            arguments: json!({"q": "trials"}),
            output_text: "3 rows".into(),
            duration_ms: 20,
            is_error: false,
        });
        recorder.record_iteration(it1);
        recorder.record_iteration(AgentIteration::new(2, IterationStop::EndTurn, 310, 80));

        assert_eq!(recorder.iteration_count(), 2);

        let trace = recorder.finalize(TraceOutcome::Completed);
        assert_eq!(trace.total_input_tokens, 430);
        assert_eq!(trace.total_output_tokens, 110);
        assert_eq!(trace.peak_input_tokens, 310);
        assert_eq!(trace.total_tool_calls(), 1);
        assert!(trace.ended_at >= trace.started_at);
    }

    #[test]
    fn iteration_order_is_preserved() {
        let mut recorder = TraceRecorder::new("conv-1");
        for i in 1..=3 {
            recorder.record_iteration(AgentIteration::new(i, IterationStop::ToolUse, 10, 5));
        }
        let trace = recorder.finalize(TraceOutcome::MaxIterations);
        let indices: Vec<u32> = trace.iterations.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
