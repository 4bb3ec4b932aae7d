//! Execution traces for Meridian agent turns.
//!
//! One conversation turn produces one [`AgentTrace`]: the ordered
//! [`AgentIteration`]s the loop ran, each with its [`ToolCallRecord`]s,
//! token counts, and a terminal outcome set exactly once at loop exit.
//! The [`TraceRecorder`] accumulates the trace while the loop runs; the
//! [`TraceSink`] trait is the seam through which the finalized trace is
//! handed to persistence and analytics.

pub mod model;
pub mod recorder;
pub mod store;

pub use model::{AgentIteration, AgentTrace, IterationStop, ToolCallRecord, TraceOutcome};
pub use recorder::TraceRecorder;
pub use store::{TraceSink, TraceStore};
