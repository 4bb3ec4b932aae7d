//! Typed events emitted during a conversation turn.
//!
//! `AgentStreamEvent` is the contract between the agent loop and the
//! transport layer: the gateway can map each variant 1:1 onto its wire
//! format (SSE frames, WebSocket messages) without inspecting payloads.
//! Every run emits exactly one of the terminal variants
//! (`FinalAnswer`, `Cancelled`, `MaxIterationsReached`, `Error`), always
//! as its last event.

use meridian_core::StopReason;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted by the agent loop while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// A new LLM round is starting.
    IterationStarted { index: u32 },

    /// A tool dispatch is starting. Emitted in the model's request order.
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: Value,
    },

    /// Incremental progress from one tool call. Interleaved across
    /// concurrent calls; `call_id` says which call it belongs to.
    ToolProgress {
        call_id: String,
        stage: String,
        message: String,
        fraction: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// A tool call produced its terminal result.
    ToolCallFinished {
        call_id: String,
        name: String,
        is_error: bool,
        duration_ms: u64,
    },

    /// The LLM round finished (its tool dispatches, if any, included).
    IterationFinished {
        index: u32,
        stop_reason: StopReason,
        input_tokens: u32,
        output_tokens: u32,
    },

    /// Terminal: the model produced a final answer.
    FinalAnswer { text: String, iterations: u32 },

    /// Terminal: cancellation was requested and honored.
    Cancelled { iterations: u32 },

    /// Terminal: the iteration cap fired before a final answer.
    MaxIterationsReached { iterations: u32 },

    /// Terminal: a fatal failure ended the turn.
    Error { message: String },

    /// Keep-alive emitted at a fixed interval so intermediary proxies do
    /// not sever a long-running stream.
    Heartbeat { elapsed_ms: u64 },
}

impl AgentStreamEvent {
    /// Stable wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IterationStarted { .. } => "iteration_started",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolProgress { .. } => "tool_progress",
            Self::ToolCallFinished { .. } => "tool_call_finished",
            Self::IterationFinished { .. } => "iteration_finished",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Cancelled { .. } => "cancelled",
            Self::MaxIterationsReached { .. } => "max_iterations_reached",
            Self::Error { .. } => "error",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalAnswer { .. }
                | Self::Cancelled { .. }
                | Self::MaxIterationsReached { .. }
                | Self::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_tool_progress() {
        let event = AgentStreamEvent::ToolProgress {
            call_id: "call_1".into(),
            stage: "searching".into(),
            message: "Scanning article index".into(),
            fraction: 0.4,
            payload: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_progress""#));
        assert!(json.contains(r#""call_id":"call_1""#));
        assert!(!json.contains("payload"));
    }

    #[test]
    fn serialization_final_answer() {
        let event = AgentStreamEvent::FinalAnswer {
            text: "Stream 14 gained 3 articles.".into(),
            iterations: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"final_answer""#));
        assert!(json.contains(r#""iterations":2"#));
    }

    #[test]
    fn deserialization_roundtrip() {
        let json = r#"{"type":"iteration_started","index":3}"#;
        let event: AgentStreamEvent = serde_json::from_str(json).unwrap();
        match event {
            AgentStreamEvent::IterationStarted { index } => assert_eq!(index, 3),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn event_type_names() {
        assert_eq!(
            AgentStreamEvent::IterationStarted { index: 1 }.event_type(),
            "iteration_started"
        );
        assert_eq!(
            AgentStreamEvent::Heartbeat { elapsed_ms: 10 }.event_type(),
            "heartbeat"
        );
        assert_eq!(
            AgentStreamEvent::Error {
                message: "x".into()
            }
            .event_type(),
            "error"
        );
    }

    #[test]
    fn terminal_classification() {
        assert!(
            AgentStreamEvent::FinalAnswer {
                text: "x".into(),
                iterations: 1
            }
            .is_terminal()
        );
        assert!(AgentStreamEvent::Cancelled { iterations: 0 }.is_terminal());
        assert!(AgentStreamEvent::MaxIterationsReached { iterations: 5 }.is_terminal());
        assert!(
            AgentStreamEvent::Error {
                message: "x".into()
            }
            .is_terminal()
        );
        assert!(!AgentStreamEvent::IterationStarted { index: 1 }.is_terminal());
        assert!(!AgentStreamEvent::Heartbeat { elapsed_ms: 5 }.is_terminal());
    }
}
