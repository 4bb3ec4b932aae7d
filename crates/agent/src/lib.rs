//! The Meridian agent loop.
//!
//! One conversation turn is a cycle:
//!
//! 1. **Send** the accumulated conversation to the LLM provider
//! 2. **If tool calls**: dispatch all of them concurrently through the
//!    execution normalizer, stream their progress to the caller, append
//!    results back into the conversation in the model's request order
//! 3. **Loop** back to step 1, or terminate on a final answer, a
//!    cancellation, an iteration cap, or a fatal provider failure
//!
//! Every run emits a stream of typed [`AgentStreamEvent`]s ending in
//! exactly one terminal event, and hands exactly one finalized
//! `AgentTrace` to the configured trace sink.

pub mod loop_runner;
pub mod normalizer;
pub mod stream_event;

pub use loop_runner::{AgentLoop, AgentRequest};
pub use normalizer::ExecutionEvent;
pub use stream_event::AgentStreamEvent;
