//! Tool catalog — declarations, executor shapes, and page-scoped listing.
//!
//! A tool is a named, schema-described capability the model may invoke
//! mid-conversation. Its implementation can have one of four calling
//! conventions (see [`ToolExecutor`]); the execution normalizer in the
//! agent crate folds all four into one streamed event shape, so nothing
//! downstream of the catalog ever branches on the convention again.
//!
//! The catalog is populated during single-threaded startup and shared
//! immutably afterwards; runtime reads need no lock.

use crate::cancel::CancellationToken;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// An intermediate status report from a streaming tool.
///
/// Ephemeral: forwarded to the caller as it happens, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolProgress {
    /// Short stage label, e.g. "searching" or "ranking".
    pub stage: String,

    /// Human-readable status line.
    pub message: String,

    /// Completion fraction in `[0.0, 1.0]`.
    pub fraction: f32,

    /// Optional structured payload for UI rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ToolProgress {
    /// Create a progress report. The fraction is clamped to `[0.0, 1.0]`.
    pub fn new(stage: impl Into<String>, message: impl Into<String>, fraction: f32) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            fraction: fraction.clamp(0.0, 1.0),
            payload: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// The terminal output of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text intended for the model's next turn.
    pub text: String,

    /// Optional structured payload for the UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ToolResult {
    /// A plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// One item produced by a generator-shaped executor.
///
/// Exhaustion carries an explicit terminal value: a well-behaved
/// generator yields any number of `Progress` items and exactly one
/// `Done` as its final item. Ending without a `Done` is reported as an
/// execution error by the normalizer.
#[derive(Debug, Clone)]
pub enum ToolStep {
    Progress(ToolProgress),
    Done(ToolResult),
}

/// Item type yielded by generator-shaped executors.
pub type StepResult = std::result::Result<ToolStep, ToolError>;

type BlockingFn = dyn Fn(Value) -> std::result::Result<ToolResult, ToolError> + Send + Sync;
type AsyncFn =
    dyn Fn(Value) -> BoxFuture<'static, std::result::Result<ToolResult, ToolError>> + Send + Sync;
type BlockingIterFn = dyn Fn(Value) -> std::result::Result<Box<dyn Iterator<Item = StepResult> + Send>, ToolError>
    + Send
    + Sync;
type AsyncStreamFn = dyn Fn(Value, CancellationToken) -> BoxStream<'static, StepResult> + Send + Sync;

/// The four calling conventions a tool implementation may have.
///
/// - `Blocking` — a plain function; runs on the blocking pool.
/// - `Async` — a future; awaited directly on the event loop.
/// - `BlockingIter` — a blocking generator; each `next()` is offloaded
///   to the blocking pool individually so progress arrives incrementally.
/// - `AsyncStream` — a native async generator; iterated on the event
///   loop. Receives the turn's cancellation token so it can exit early.
#[derive(Clone)]
pub enum ToolExecutor {
    Blocking(Arc<BlockingFn>),
    Async(Arc<AsyncFn>),
    BlockingIter(Arc<BlockingIterFn>),
    AsyncStream(Arc<AsyncStreamFn>),
}

impl ToolExecutor {
    /// Wrap a blocking function.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<ToolResult, ToolError> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    /// Wrap an async function.
    pub fn async_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| Box::pin(f(args))))
    }

    /// Wrap a blocking generator constructor.
    pub fn blocking_iter<F, I>(f: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<I, ToolError> + Send + Sync + 'static,
        I: Iterator<Item = StepResult> + Send + 'static,
    {
        Self::BlockingIter(Arc::new(move |args| {
            f(args).map(|iter| Box::new(iter) as Box<dyn Iterator<Item = StepResult> + Send>)
        }))
    }

    /// Wrap an async stream constructor.
    pub fn streaming<F, S>(f: F) -> Self
    where
        F: Fn(Value, CancellationToken) -> S + Send + Sync + 'static,
        S: futures::Stream<Item = StepResult> + Send + 'static,
    {
        Self::AsyncStream(Arc::new(move |args, cancel| Box::pin(f(args, cancel))))
    }

    /// Short name of the calling convention, for logs.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Blocking(_) => "blocking",
            Self::Async(_) => "async",
            Self::BlockingIter(_) => "blocking_iter",
            Self::AsyncStream(_) => "async_stream",
        }
    }

    /// Whether this convention reports incremental progress.
    pub fn reports_progress(&self) -> bool {
        matches!(self, Self::BlockingIter(_) | Self::AsyncStream(_))
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToolExecutor::{}", self.shape())
    }
}

/// A registered tool: everything the engine knows about one capability.
#[derive(Debug, Clone)]
pub struct ToolDeclaration {
    /// Unique name, the catalog key.
    pub name: String,

    /// Natural-language description sent to the model.
    pub description: String,

    /// JSON Schema for the accepted arguments.
    pub input_schema: Value,

    /// The implementation.
    pub executor: ToolExecutor,

    /// Whether this tool reports incremental progress.
    pub streaming: bool,

    /// Available on every page (vs. opt-in via page allow-lists).
    pub global: bool,

    /// Role the caller must hold to see this tool, if any.
    pub required_role: Option<String>,

    /// Per-invocation timeout. `None` means the engine default applies.
    pub timeout: Option<Duration>,
}

impl ToolDeclaration {
    /// Create a declaration. `streaming` defaults to whether the
    /// executor's calling convention reports progress.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        executor: ToolExecutor,
    ) -> Self {
        let streaming = executor.reports_progress();
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            executor,
            streaming,
            global: false,
            required_role: None,
            timeout: None,
        }
    }

    /// Mark this tool as available on every page.
    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Override the streaming flag.
    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Gate this tool behind a role.
    pub fn with_required_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    /// Set a per-invocation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render the serializable definition sent to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    /// Whether a caller with the given role may use this tool.
    pub fn visible_to(&self, role: Option<&str>) -> bool {
        match &self.required_role {
            None => true,
            Some(required) => role == Some(required.as_str()),
        }
    }
}

/// The page/tab the conversation is happening on, plus the caller's role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    pub page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl PageContext {
    pub fn new(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            tab: None,
            role: None,
        }
    }

    pub fn with_tab(mut self, tab: impl Into<String>) -> Self {
        self.tab = Some(tab.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Collaborator supplying per-page tool allow-lists.
///
/// Page configuration lives outside this workspace; the catalog only
/// needs the names enabled for a given page/tab.
pub trait PageToolConfig: Send + Sync {
    fn allowed_tools(&self, page: &str, tab: Option<&str>) -> Vec<String>;
}

/// The process-wide tool registry.
///
/// Populated by `register` calls at startup (re-registering a name
/// overwrites — this is what lets tests install stubs), then shared
/// behind an `Arc` for lock-free concurrent reads.
#[derive(Debug, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Arc<ToolDeclaration>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration. Last writer wins.
    pub fn register(&mut self, declaration: ToolDeclaration) {
        let name = declaration.name.clone();
        if self.tools.contains_key(&name) {
            debug!(tool = %name, "Overwriting existing tool registration");
        }
        self.tools.insert(name, Arc::new(declaration));
    }

    /// Look up a declaration by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<ToolDeclaration>> {
        self.tools.get(name).cloned()
    }

    /// All registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The declarations visible on a page: global tools plus the page's
    /// allow-list, filtered by the caller's role. Sorted by name so the
    /// definitions sent to the model are stable across calls.
    pub fn list_for_page(
        &self,
        pages: &dyn PageToolConfig,
        ctx: &PageContext,
    ) -> Vec<Arc<ToolDeclaration>> {
        let allowed = pages.allowed_tools(&ctx.page, ctx.tab.as_deref());
        let mut visible: Vec<Arc<ToolDeclaration>> = self
            .tools
            .values()
            .filter(|d| d.global || allowed.iter().any(|n| n == &d.name))
            .filter(|d| d.visible_to(ctx.role.as_deref()))
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.name.cmp(&b.name));
        visible
    }

    /// Definitions for an explicit name subset, in the given order.
    /// Unknown names are skipped.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|d| d.definition())
            .collect()
    }
}
