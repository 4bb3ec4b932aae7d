//! Data model for agent-turn traces: tool-call records, iterations,
//! and the finalized trace.

use chrono::{DateTime, Utc};
use meridian_core::StopReason;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Tool call record ──────────────────────────────────────────────────────

/// Post-hoc record of one dispatched tool call.
///
/// Written by the agent loop immediately after the terminal result is
/// obtained; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// The tool that was invoked.
    pub tool_name: String,

    /// The input arguments (parsed JSON, or the raw string under
    /// `{"_raw": ...}` when the model produced unparseable output).
    pub arguments: Value,

    /// The text ultimately shown to the model.
    pub output_text: String,

    /// Wall-clock execution duration.
    pub duration_ms: u64,

    /// Whether the call ended in an error-text result.
    pub is_error: bool,
}

// ── Iteration ─────────────────────────────────────────────────────────────

/// Why an iteration ended.
///
/// The first three mirror the model's stop reason; `Cancelled` marks an
/// iteration whose tool dispatch was skipped because cancellation was
/// requested after the model call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStop {
    EndTurn,
    ToolUse,
    MaxTokens,
    Cancelled,
}

impl From<StopReason> for IterationStop {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn => Self::EndTurn,
            StopReason::ToolUse => Self::ToolUse,
            StopReason::MaxTokens => Self::MaxTokens,
        }
    }
}

impl std::fmt::Display for IterationStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndTurn => write!(f, "end_turn"),
            Self::ToolUse => write!(f, "tool_use"),
            Self::MaxTokens => write!(f, "max_tokens"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One LLM request/response round and the tool calls it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIteration {
    /// 1-based iteration index within the turn.
    pub index: u32,

    /// Why this iteration ended.
    pub stop: IterationStop,

    /// Input tokens consumed by the model call.
    pub input_tokens: u32,

    /// Output tokens produced by the model call.
    pub output_tokens: u32,

    /// The tool calls issued in this round, in model request order.
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AgentIteration {
    /// Create an iteration record with no tool calls yet.
    pub fn new(index: u32, stop: IterationStop, input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            index,
            stop,
            input_tokens,
            output_tokens,
            tool_calls: Vec::new(),
        }
    }

    /// Append a tool call record.
    pub fn push_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    /// Total tokens (input + output) for this iteration.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// How the turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// The model produced a final answer.
    Completed,
    /// Cancellation was requested and honored.
    Cancelled,
    /// A fatal model-call failure ended the turn.
    Error,
    /// The iteration cap fired.
    MaxIterations,
}

impl std::fmt::Display for TraceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Error => write!(f, "error"),
            Self::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// The full audit record of one conversation turn.
///
/// Built incrementally by [`crate::TraceRecorder`] and finalized exactly
/// once at loop exit; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    /// Unique trace id.
    pub id: String,

    /// Conversation this turn belongs to.
    pub conversation_id: String,

    /// Ordered iterations.
    pub iterations: Vec<AgentIteration>,

    /// Cumulative input tokens across iterations.
    pub total_input_tokens: u64,

    /// Cumulative output tokens across iterations.
    pub total_output_tokens: u64,

    /// Largest single-iteration input token count — the peak context
    /// size the turn reached.
    pub peak_input_tokens: u32,

    /// Total wall-clock duration of the turn.
    pub duration_ms: u64,

    /// When the turn started.
    pub started_at: DateTime<Utc>,

    /// When the turn ended.
    pub ended_at: DateTime<Utc>,

    /// The terminal outcome.
    pub outcome: TraceOutcome,
}

impl AgentTrace {
    /// Number of tool calls across all iterations.
    pub fn total_tool_calls(&self) -> usize {
        self.iterations.iter().map(|i| i.tool_calls.len()).sum()
    }

    /// Number of tool calls that ended in an error result.
    pub fn failed_tool_calls(&self) -> usize {
        self.iterations
            .iter()
            .flat_map(|i| &i.tool_calls)
            .filter(|c| c.is_error)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str, is_error: bool) -> ToolCallRecord {
        ToolCallRecord {
            tool_name: name.into(),
            arguments: json!({"q": "x"}),
            output_text: if is_error { "Error: boom".into() } else { "ok".into() },
            duration_ms: 12,
            is_error,
        }
    }

    #[test]
    fn iteration_stop_from_stop_reason() {
        assert_eq!(IterationStop::from(StopReason::EndTurn), IterationStop::EndTurn);
        assert_eq!(IterationStop::from(StopReason::ToolUse), IterationStop::ToolUse);
        assert_eq!(
            IterationStop::from(StopReason::MaxTokens),
            IterationStop::MaxTokens
        );
    }

    #[test]
    fn iteration_accumulates_calls() {
        let mut iter = AgentIteration::new(1, IterationStop::ToolUse, 100, 40);
        iter.push_call(record("table_query", false));
        iter.push_call(record("web_search", true));
        assert_eq!(iter.tool_calls.len(), 2);
        assert_eq!(iter.total_tokens(), 140);
    }

    #[test]
    fn trace_call_counts() {
        let mut it1 = AgentIteration::new(1, IterationStop::ToolUse, 100, 40);
        it1.push_call(record("a", false));
        it1.push_call(record("b", true));
        let it2 = AgentIteration::new(2, IterationStop::EndTurn, 180, 60);

        let trace = AgentTrace {
            id: "t1".into(),
            conversation_id: "conv-1".into(),
            iterations: vec![it1, it2],
            total_input_tokens: 280,
            total_output_tokens: 100,
            peak_input_tokens: 180,
            duration_ms: 500,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            outcome: TraceOutcome::Completed,
        };
        assert_eq!(trace.total_tool_calls(), 2);
        assert_eq!(trace.failed_tool_calls(), 1);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&TraceOutcome::MaxIterations).unwrap();
        assert_eq!(json, r#""max_iterations""#);
    }

    #[test]
    fn trace_serialization_roundtrip() {
        let trace = AgentTrace {
            id: "t1".into(),
            conversation_id: "conv-42".into(),
            iterations: vec![AgentIteration::new(1, IterationStop::EndTurn, 10, 5)],
            total_input_tokens: 10,
            total_output_tokens: 5,
            peak_input_tokens: 10,
            duration_ms: 88,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            outcome: TraceOutcome::Completed,
        };
        let json = serde_json::to_string(&trace).unwrap();
        let roundtrip: AgentTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.conversation_id, "conv-42");
        assert_eq!(roundtrip.iterations.len(), 1);
        assert_eq!(roundtrip.outcome, TraceOutcome::Completed);
    }
}
