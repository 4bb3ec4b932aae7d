//! Core domain types and traits for the Meridian agent engine.
//!
//! This crate holds everything the agent loop and the transport layer
//! agree on: conversations and messages, the tool catalog with its four
//! executor calling conventions, the cooperative cancellation token, the
//! LLM provider abstraction, and the shared error taxonomy.
//!
//! Nothing in here performs I/O. The crates that do (the agent loop, the
//! gateway) depend on these types; the reverse is never true.

pub mod cancel;
pub mod error;
pub mod message;
pub mod provider;
pub mod schema;
pub mod tool;

pub use cancel::CancellationToken;
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StopReason, ToolDefinition, Usage};
pub use tool::{
    PageContext, PageToolConfig, ToolCatalog, ToolDeclaration, ToolExecutor, ToolProgress,
    ToolResult, ToolStep,
};
