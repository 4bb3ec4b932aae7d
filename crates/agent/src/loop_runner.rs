//! The agent reasoning loop.
//!
//! `AgentLoop::run` drives one conversation turn: repeated provider
//! calls, concurrent tool dispatch through the execution normalizer,
//! ordered result append, and trace recording. The caller consumes a
//! stream of [`AgentStreamEvent`]s that always ends in exactly one
//! terminal event; the finalized trace goes to the configured
//! [`TraceSink`] at loop exit.

use crate::normalizer::{self, ExecutionEvent};
use crate::stream_event::AgentStreamEvent;
use futures::StreamExt;
use meridian_config::EngineConfig;
use meridian_core::tool::PageToolConfig;
use meridian_core::{
    CancellationToken, Conversation, Message, MessageToolCall, PageContext, Provider,
    ProviderError, ProviderRequest, ProviderResponse, ToolCatalog, ToolDefinition,
};
use meridian_core::schema;
use meridian_telemetry::{
    AgentIteration, IterationStop, ToolCallRecord, TraceOutcome, TraceRecorder, TraceSink,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything one conversation turn needs.
pub struct AgentRequest {
    /// The conversation so far (user, assistant, tool messages).
    pub conversation: Conversation,

    /// System instructions for this turn.
    pub system_prompt: String,

    /// Explicit tool-name subset for this turn. When empty, the subset
    /// is resolved from the page context via the page-config
    /// collaborator instead.
    pub tool_names: Vec<String>,

    /// The page/tab the conversation is happening on.
    pub page: PageContext,

    /// Cooperative cancellation for the whole turn.
    pub cancel: CancellationToken,

    /// Per-run override of the configured iteration cap.
    pub max_iterations: Option<u32>,
}

/// The core agent loop.
#[derive(Clone)]
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    catalog: Arc<ToolCatalog>,
    config: EngineConfig,
    pages: Option<Arc<dyn PageToolConfig>>,
    trace_sink: Option<Arc<dyn TraceSink>>,
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(provider: Arc<dyn Provider>, catalog: Arc<ToolCatalog>, config: EngineConfig) -> Self {
        Self {
            provider,
            catalog,
            config,
            pages: None,
            trace_sink: None,
        }
    }

    /// Attach the page-configuration collaborator used to resolve tool
    /// visibility when a request carries no explicit tool subset.
    pub fn with_page_config(mut self, pages: Arc<dyn PageToolConfig>) -> Self {
        self.pages = Some(pages);
        self
    }

    /// Attach the sink that receives each turn's finalized trace.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    /// Run one conversation turn.
    ///
    /// Returns immediately with the event stream; the turn itself runs
    /// on a spawned task. The stream ends with exactly one terminal
    /// event, after which the trace has been handed to the sink.
    pub fn run(&self, request: AgentRequest) -> ReceiverStream<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(request, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn drive(self, request: AgentRequest, tx: mpsc::Sender<AgentStreamEvent>) {
        let started = Instant::now();
        let conversation_id = request.conversation.id.to_string();

        info!(
            conversation_id = %conversation_id,
            page = %request.page.page,
            messages = request.conversation.messages.len(),
            "Starting agent turn"
        );

        let heartbeat = spawn_heartbeat(
            tx.clone(),
            Duration::from_secs(self.config.heartbeat_interval_secs),
            started,
        );

        let mut recorder = TraceRecorder::new(&conversation_id);
        let (outcome, terminal) = self.run_turn(request, &tx, &mut recorder, started).await;

        // Stop the heartbeat before the terminal event so the terminal
        // is guaranteed to be the last event on the stream.
        heartbeat.abort();
        let _ = heartbeat.await;

        let trace = recorder.finalize(outcome);
        info!(
            conversation_id = %conversation_id,
            trace_id = %trace.id,
            outcome = %trace.outcome,
            iterations = trace.iterations.len(),
            tool_calls = trace.total_tool_calls(),
            duration_ms = trace.duration_ms,
            "Agent turn finished"
        );

        // Hand off the trace before the terminal event: a consumer that
        // has seen the stream end can rely on the trace being recorded.
        if let Some(sink) = &self.trace_sink {
            sink.record(trace).await;
        }

        let _ = tx.send(terminal).await;
    }

    /// The iterate/dispatch cycle. Sends every non-terminal event
    /// inline and returns the trace outcome plus the single terminal
    /// event for the caller to send.
    async fn run_turn(
        &self,
        request: AgentRequest,
        tx: &mpsc::Sender<AgentStreamEvent>,
        recorder: &mut TraceRecorder,
        started: Instant,
    ) -> (TraceOutcome, AgentStreamEvent) {
        let AgentRequest {
            mut conversation,
            system_prompt,
            tool_names,
            page,
            cancel,
            max_iterations,
        } = request;

        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);
        let definitions = self.resolve_definitions(&tool_names, &page);
        let budget = match self.config.wall_clock_budget_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let mut index = 0u32;

        loop {
            let completed = recorder.iteration_count() as u32;

            if cancel.is_cancelled() {
                debug!(iterations = completed, "Cancellation observed before iteration");
                return (
                    TraceOutcome::Cancelled,
                    AgentStreamEvent::Cancelled { iterations: completed },
                );
            }

            if let Some(budget) = budget
                && started.elapsed() >= budget
            {
                warn!(budget_secs = budget.as_secs(), "Turn exceeded wall-clock budget");
                return (
                    TraceOutcome::Error,
                    AgentStreamEvent::Error {
                        message: format!(
                            "turn exceeded wall-clock budget of {}s",
                            budget.as_secs()
                        ),
                    },
                );
            }

            if index >= max_iterations {
                warn!(max_iterations, "Iteration cap reached, stopping turn");
                return (
                    TraceOutcome::MaxIterations,
                    AgentStreamEvent::MaxIterationsReached { iterations: index },
                );
            }

            index += 1;
            let _ = tx
                .send(AgentStreamEvent::IterationStarted { index })
                .await;

            let response = match self
                .call_model(&system_prompt, &conversation, &definitions)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "Model call failed, terminating turn");
                    return (
                        TraceOutcome::Error,
                        AgentStreamEvent::Error {
                            message: format!("model call failed: {e}"),
                        },
                    );
                }
            };

            let stop_reason = response.stop_reason;
            let usage = response.usage;
            let mut iteration = AgentIteration::new(
                index,
                stop_reason.into(),
                usage.input_tokens,
                usage.output_tokens,
            );

            let tool_calls = response.message.tool_calls.clone();
            let answer_text = response.message.content.clone();
            conversation.push(response.message);

            if tool_calls.is_empty() {
                let _ = tx
                    .send(AgentStreamEvent::IterationFinished {
                        index,
                        stop_reason,
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    })
                    .await;
                recorder.record_iteration(iteration);
                return (
                    TraceOutcome::Completed,
                    AgentStreamEvent::FinalAnswer {
                        text: answer_text,
                        iterations: index,
                    },
                );
            }

            // Re-check before dispatching: calls that have not started
            // are still cancellable.
            if cancel.is_cancelled() {
                debug!(index, "Cancellation observed before tool dispatch");
                iteration.stop = IterationStop::Cancelled;
                recorder.record_iteration(iteration);
                return (
                    TraceOutcome::Cancelled,
                    AgentStreamEvent::Cancelled { iterations: index },
                );
            }

            debug!(index, tool_count = tool_calls.len(), "Dispatching tool calls");
            let outcomes = self.dispatch_tools(&tool_calls, &cancel, tx).await;

            for outcome in outcomes {
                conversation.push(Message::tool_result(&outcome.call_id, &outcome.text));
                let _ = tx
                    .send(AgentStreamEvent::ToolCallFinished {
                        call_id: outcome.call_id,
                        name: outcome.name.clone(),
                        is_error: outcome.is_error,
                        duration_ms: outcome.duration_ms,
                    })
                    .await;
                iteration.push_call(ToolCallRecord {
                    tool_name: outcome.name,
                    arguments: outcome.arguments,
                    output_text: outcome.text,
                    duration_ms: outcome.duration_ms,
                    is_error: outcome.is_error,
                });
            }

            let _ = tx
                .send(AgentStreamEvent::IterationFinished {
                    index,
                    stop_reason,
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                })
                .await;
            recorder.record_iteration(iteration);
        }
    }

    /// The tool definitions visible this turn: the explicit subset if
    /// one was given, otherwise whatever the page configuration allows.
    fn resolve_definitions(&self, tool_names: &[String], page: &PageContext) -> Vec<ToolDefinition> {
        if !tool_names.is_empty() {
            return self.catalog.definitions_for(tool_names);
        }
        match &self.pages {
            Some(pages) => self
                .catalog
                .list_for_page(pages.as_ref(), page)
                .iter()
                .map(|d| d.definition())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Call the provider, retrying transient failures a bounded number
    /// of times.
    async fn call_model(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<ProviderResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            let request = ProviderRequest {
                system: system.to_string(),
                messages: conversation.messages.clone(),
                tools: tools.to_vec(),
                max_tokens: Some(self.config.max_response_tokens),
            };

            match self.provider.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.model_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "Retryable model failure, backing off");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one iteration's tool calls concurrently, forwarding
    /// progress as it happens, and return the terminal outcomes in the
    /// model's request order.
    async fn dispatch_tools(
        &self,
        calls: &[MessageToolCall],
        cancel: &CancellationToken,
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Vec<DispatchOutcome> {
        let default_timeout = match self.config.tool_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        for call in calls {
            let arguments = serde_json::from_str::<Value>(&call.arguments)
                .unwrap_or_else(|_| Value::String(call.arguments.clone()));
            let _ = tx
                .send(AgentStreamEvent::ToolCallStarted {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    arguments,
                })
                .await;
        }

        let handles: Vec<JoinHandle<DispatchOutcome>> = calls
            .iter()
            .map(|call| {
                let call = call.clone();
                let catalog = Arc::clone(&self.catalog);
                let cancel = cancel.clone();
                let tx = tx.clone();
                tokio::spawn(dispatch_one(catalog, call, cancel, tx, default_timeout))
            })
            .collect();

        // Awaiting the handles in request order is the fan-in: results
        // land in the conversation in the order the model asked for
        // them, no matter which call finished first.
        let mut outcomes = Vec::with_capacity(handles.len());
        for (handle, call) in handles.into_iter().zip(calls) {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool dispatch task was lost");
                    outcomes.push(DispatchOutcome {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: json!({ "_raw": call.arguments }),
                        text: format!("Error: tool '{}' dispatch failed: {e}", call.name),
                        is_error: true,
                        duration_ms: 0,
                    });
                }
            }
        }
        outcomes
    }
}

/// The terminal outcome of one dispatched call.
struct DispatchOutcome {
    call_id: String,
    name: String,
    arguments: Value,
    text: String,
    is_error: bool,
    duration_ms: u64,
}

/// Resolve, validate, and execute one tool call, forwarding progress
/// events tagged with the call id. All failure modes — unparseable
/// arguments, unknown tool, schema violation, executor failure — land
/// on the same recoverable path: error text the model sees next turn.
async fn dispatch_one(
    catalog: Arc<ToolCatalog>,
    call: MessageToolCall,
    cancel: CancellationToken,
    tx: mpsc::Sender<AgentStreamEvent>,
    default_timeout: Option<Duration>,
) -> DispatchOutcome {
    let started = std::time::Instant::now();

    let arguments = match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value) => value,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Model produced unparseable tool arguments");
            return DispatchOutcome {
                text: format!("Error: invalid arguments for '{}': {e}", call.name),
                call_id: call.id,
                name: call.name,
                arguments: json!({ "_raw": call.arguments }),
                is_error: true,
                duration_ms: elapsed_ms(started),
            };
        }
    };

    let Some(declaration) = catalog.resolve(&call.name) else {
        warn!(tool = %call.name, "Model requested an unregistered tool");
        return DispatchOutcome {
            text: format!("Error: unknown tool '{}'", call.name),
            call_id: call.id,
            name: call.name,
            arguments,
            is_error: true,
            duration_ms: elapsed_ms(started),
        };
    };

    if let Err(violation) = schema::check_arguments(&declaration.input_schema, &arguments) {
        warn!(tool = %call.name, %violation, "Tool arguments failed schema check");
        return DispatchOutcome {
            text: format!("Error: invalid arguments for '{}': {violation}", call.name),
            call_id: call.id,
            name: call.name,
            arguments,
            is_error: true,
            duration_ms: elapsed_ms(started),
        };
    }

    let mut stream = normalizer::execute(declaration, arguments.clone(), cancel, default_timeout);
    let mut terminal: Option<(String, bool)> = None;
    while let Some(event) = stream.next().await {
        match event {
            ExecutionEvent::Progress(progress) => {
                let _ = tx
                    .send(AgentStreamEvent::ToolProgress {
                        call_id: call.id.clone(),
                        stage: progress.stage,
                        message: progress.message,
                        fraction: progress.fraction,
                        payload: progress.payload,
                    })
                    .await;
            }
            ExecutionEvent::Terminal { text, is_error, .. } => {
                terminal = Some((text, is_error));
            }
        }
    }

    let (text, is_error) = terminal.unwrap_or_else(|| {
        (
            format!("Error: tool '{}' produced no result", call.name),
            true,
        )
    });

    DispatchOutcome {
        call_id: call.id,
        name: call.name,
        arguments,
        text,
        is_error,
        duration_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn spawn_heartbeat(
    tx: mpsc::Sender<AgentStreamEvent>,
    interval: Duration,
    started: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let event = AgentStreamEvent::Heartbeat {
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    })
}
