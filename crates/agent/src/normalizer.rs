//! Execution normalization — four tool calling conventions, one contract.
//!
//! A tool executor may be a blocking function, an async function, a
//! blocking generator, or an async stream (see
//! [`meridian_core::ToolExecutor`]). `execute` folds all four into the
//! same shape: an async sequence of zero or more progress events followed
//! by exactly one terminal event.
//!
//! Blocking shapes never run on the event loop. A plain blocking call is
//! offloaded whole; a blocking generator is offloaded one `next()` at a
//! time, so its progress events still reach the caller incrementally
//! while unrelated conversations keep running.
//!
//! Executor failures — an `Err` from any shape, a panic on the blocking
//! pool, a generator that ends without its terminal step, a timeout —
//! are converted into an error-text terminal here and never propagate
//! further. A failing tool degrades the conversation; it does not abort
//! the loop.

use futures::StreamExt;
use meridian_core::tool::ToolExecutor;
use meridian_core::{CancellationToken, ToolDeclaration, ToolError, ToolProgress, ToolResult, ToolStep};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// One element of a normalized execution sequence.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// An intermediate status report.
    Progress(ToolProgress),

    /// The terminal result. Always the last event; exactly one per
    /// invocation. `is_error` marks results synthesized from failures.
    Terminal {
        text: String,
        payload: Option<Value>,
        is_error: bool,
    },
}

impl ExecutionEvent {
    fn completed(result: ToolResult) -> Self {
        Self::Terminal {
            text: result.text,
            payload: result.payload,
            is_error: false,
        }
    }

    fn failed(text: impl Into<String>) -> Self {
        Self::Terminal {
            text: text.into(),
            payload: None,
            is_error: true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

const CHANNEL_CAPACITY: usize = 32;

/// Execute one tool invocation, normalized.
///
/// Returns a stream of [`ExecutionEvent`]s ending in exactly one
/// `Terminal`. `default_timeout` applies when the declaration carries no
/// timeout of its own; `None` means unbounded.
pub fn execute(
    declaration: Arc<ToolDeclaration>,
    args: Value,
    cancel: CancellationToken,
    default_timeout: Option<Duration>,
) -> ReceiverStream<ExecutionEvent> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let name = declaration.name.clone();

        // Edge check: a call that has not started yet is the one unit of
        // work cancellation can still prevent.
        if cancel.is_cancelled() {
            let _ = tx
                .send(ExecutionEvent::failed(format!(
                    "Error: tool '{name}' was not started: cancellation requested"
                )))
                .await;
            return;
        }

        debug!(tool = %name, shape = declaration.executor.shape(), "Dispatching tool");

        let timeout = declaration.timeout.or(default_timeout);
        match timeout {
            Some(limit) if !limit.is_zero() => {
                let driven = tokio::time::timeout(limit, drive(&declaration, args, cancel, &tx));
                if driven.await.is_err() {
                    warn!(tool = %name, timeout_secs = limit.as_secs(), "Tool call timed out");
                    let _ = tx
                        .send(ExecutionEvent::failed(format!(
                            "Error: {}",
                            ToolError::Timeout {
                                tool_name: name,
                                timeout_secs: limit.as_secs(),
                            }
                        )))
                        .await;
                }
            }
            _ => drive(&declaration, args, cancel, &tx).await,
        }
    });

    ReceiverStream::new(rx)
}

/// Run the executor to completion, sending progress and the terminal
/// event into `tx`. All four calling conventions converge here.
async fn drive(
    declaration: &ToolDeclaration,
    args: Value,
    cancel: CancellationToken,
    tx: &mpsc::Sender<ExecutionEvent>,
) {
    let name = declaration.name.as_str();

    match &declaration.executor {
        // Shape 1: plain blocking call, offloaded whole.
        ToolExecutor::Blocking(f) => {
            let f = Arc::clone(f);
            let event = match tokio::task::spawn_blocking(move || f(args)).await {
                Ok(Ok(result)) => ExecutionEvent::completed(result),
                Ok(Err(e)) => execution_error(name, &e),
                Err(join) => panic_error(name, &join),
            };
            let _ = tx.send(event).await;
        }

        // Shape 2: async call, awaited in place.
        ToolExecutor::Async(f) => {
            let event = match f(args).await {
                Ok(result) => ExecutionEvent::completed(result),
                Err(e) => execution_error(name, &e),
            };
            let _ = tx.send(event).await;
        }

        // Shape 3: blocking generator. Construction and every next()
        // get their own trip to the blocking pool.
        ToolExecutor::BlockingIter(f) => {
            let f = Arc::clone(f);
            let mut iter = match tokio::task::spawn_blocking(move || f(args)).await {
                Ok(Ok(iter)) => iter,
                Ok(Err(e)) => {
                    let _ = tx.send(execution_error(name, &e)).await;
                    return;
                }
                Err(join) => {
                    let _ = tx.send(panic_error(name, &join)).await;
                    return;
                }
            };

            loop {
                let stepped = tokio::task::spawn_blocking(move || {
                    let step = iter.next();
                    (step, iter)
                })
                .await;
                let step = match stepped {
                    Ok((step, rest)) => {
                        iter = rest;
                        step
                    }
                    Err(join) => {
                        let _ = tx.send(panic_error(name, &join)).await;
                        return;
                    }
                };

                match step {
                    Some(Ok(ToolStep::Progress(progress))) => {
                        let _ = tx.send(ExecutionEvent::Progress(progress)).await;
                    }
                    Some(Ok(ToolStep::Done(result))) => {
                        let _ = tx.send(ExecutionEvent::completed(result)).await;
                        return;
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(execution_error(name, &e)).await;
                        return;
                    }
                    None => {
                        let _ = tx.send(exhausted_error(name)).await;
                        return;
                    }
                }
            }
        }

        // Shape 4: async stream, iterated natively. The executor holds
        // the token and may end early on its own.
        ToolExecutor::AsyncStream(f) => {
            let mut stream = f(args, cancel);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(ToolStep::Progress(progress)) => {
                        let _ = tx.send(ExecutionEvent::Progress(progress)).await;
                    }
                    Ok(ToolStep::Done(result)) => {
                        let _ = tx.send(ExecutionEvent::completed(result)).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx.send(execution_error(name, &e)).await;
                        return;
                    }
                }
            }
            let _ = tx.send(exhausted_error(name)).await;
        }
    }
}

fn execution_error(name: &str, err: &ToolError) -> ExecutionEvent {
    warn!(tool = %name, error = %err, "Tool execution failed");
    ExecutionEvent::failed(format!("Error: {err}"))
}

fn panic_error(name: &str, join: &JoinError) -> ExecutionEvent {
    warn!(tool = %name, error = %join, "Tool panicked on the blocking pool");
    ExecutionEvent::failed(format!("Error: tool '{name}' panicked: {join}"))
}

fn exhausted_error(name: &str) -> ExecutionEvent {
    warn!(tool = %name, "Tool ended without a terminal result");
    ExecutionEvent::failed(format!("Error: tool '{name}' ended without a result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use meridian_core::ToolExecutor;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn declare(name: &str, executor: ToolExecutor) -> Arc<ToolDeclaration> {
        Arc::new(ToolDeclaration::new(name, "test tool", json!({}), executor))
    }

    async fn collect(declaration: Arc<ToolDeclaration>, args: Value) -> Vec<ExecutionEvent> {
        execute(declaration, args, CancellationToken::new(), None)
            .collect::<Vec<_>>()
            .await
    }

    fn progress_steps() -> Vec<meridian_core::tool::StepResult> {
        vec![
            Ok(ToolStep::Progress(ToolProgress::new(
                "fetch", "Fetching sources", 0.3,
            ))),
            Ok(ToolStep::Progress(ToolProgress::new(
                "rank", "Ranking results", 0.8,
            ))),
            Ok(ToolStep::Done(ToolResult::text("found 3 sources"))),
        ]
    }

    fn assert_progress_then_result(events: &[ExecutionEvent]) {
        assert_eq!(events.len(), 3, "expected 2 progress + 1 terminal");
        match &events[0] {
            ExecutionEvent::Progress(p) => assert_eq!(p.stage, "fetch"),
            other => panic!("expected progress, got {other:?}"),
        }
        match &events[1] {
            ExecutionEvent::Progress(p) => assert_eq!(p.stage, "rank"),
            other => panic!("expected progress, got {other:?}"),
        }
        match &events[2] {
            ExecutionEvent::Terminal {
                text, is_error, ..
            } => {
                assert_eq!(text, "found 3 sources");
                assert!(!is_error);
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    // ── Shape equivalence ─────────────────────────────────────────────

    #[tokio::test]
    async fn blocking_and_async_produce_identical_sequences() {
        let blocking = declare(
            "compute",
            ToolExecutor::blocking(|_| Ok(ToolResult::text("42"))),
        );
        let async_fn = declare(
            "compute",
            ToolExecutor::async_fn(|_| async { Ok(ToolResult::text("42")) }),
        );

        for decl in [blocking, async_fn] {
            let events = collect(decl, json!({})).await;
            assert_eq!(events.len(), 1);
            match &events[0] {
                ExecutionEvent::Terminal {
                    text, is_error, ..
                } => {
                    assert_eq!(text, "42");
                    assert!(!is_error);
                }
                other => panic!("expected terminal, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn blocking_iter_and_async_stream_produce_identical_sequences() {
        let iter_shape = declare(
            "scan",
            ToolExecutor::blocking_iter(|_| Ok(progress_steps().into_iter())),
        );
        let stream_shape = declare(
            "scan",
            ToolExecutor::streaming(|_, _| stream::iter(progress_steps())),
        );

        for decl in [iter_shape, stream_shape] {
            let events = collect(decl, json!({})).await;
            assert_progress_then_result(&events);
        }
    }

    // ── Error conversion ──────────────────────────────────────────────

    #[tokio::test]
    async fn executor_error_becomes_error_terminal() {
        let decl = declare(
            "flaky",
            ToolExecutor::blocking(|_| {
                Err(ToolError::ExecutionFailed {
                    tool_name: "flaky".into(),
                    reason: "upstream 502".into(),
                })
            }),
        );
        let events = collect(decl, json!({})).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ExecutionEvent::Terminal {
                text, is_error, ..
            } => {
                assert!(text.starts_with("Error: "), "got: {text}");
                assert!(text.contains("upstream 502"));
                assert!(is_error);
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_executor_error_becomes_error_terminal() {
        let decl = declare(
            "flaky",
            ToolExecutor::async_fn(|_| async {
                Err(ToolError::InvalidArguments("bad filter".into()))
            }),
        );
        let events = collect(decl, json!({})).await;
        assert!(matches!(
            &events[..],
            [ExecutionEvent::Terminal { is_error: true, .. }]
        ));
    }

    #[tokio::test]
    async fn mid_stream_error_keeps_earlier_progress() {
        let decl = declare(
            "scan",
            ToolExecutor::blocking_iter(|_| {
                Ok(vec![
                    Ok(ToolStep::Progress(ToolProgress::new("fetch", "…", 0.5))),
                    Err(ToolError::ExecutionFailed {
                        tool_name: "scan".into(),
                        reason: "index offline".into(),
                    }),
                ]
                .into_iter())
            }),
        );
        let events = collect(decl, json!({})).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ExecutionEvent::Progress(_)));
        assert!(matches!(
            &events[1],
            ExecutionEvent::Terminal { is_error: true, .. }
        ));
    }

    #[tokio::test]
    async fn exhaustion_without_done_is_an_error() {
        let decl = declare(
            "scan",
            ToolExecutor::streaming(|_, _| {
                stream::iter(vec![Ok(ToolStep::Progress(ToolProgress::new(
                    "fetch", "…", 0.5,
                )))])
            }),
        );
        let events = collect(decl, json!({})).await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            ExecutionEvent::Terminal {
                text, is_error, ..
            } => {
                assert!(is_error);
                assert!(text.contains("without a result"));
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_blocking_tool_degrades_to_error_terminal() {
        let decl = declare(
            "crashy",
            ToolExecutor::blocking(|_| panic!("tool blew up")),
        );
        let events = collect(decl, json!({})).await;
        assert!(matches!(
            &events[..],
            [ExecutionEvent::Terminal { is_error: true, .. }]
        ));
    }

    // ── Timeouts ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn slow_tool_hits_declaration_timeout() {
        let decl = Arc::new(
            ToolDeclaration::new(
                "slow",
                "sleeps",
                json!({}),
                ToolExecutor::blocking(|_| {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(ToolResult::text("too late"))
                }),
            )
            .with_timeout(Duration::from_millis(30)),
        );
        let events = execute(decl, json!({}), CancellationToken::new(), None)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ExecutionEvent::Terminal {
                text, is_error, ..
            } => {
                assert!(is_error);
                assert!(text.contains("timed out"), "got: {text}");
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    // ── Cancellation ──────────────────────────────────────────────────

    #[tokio::test]
    async fn pre_cancelled_token_prevents_execution() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let decl = declare(
            "never",
            ToolExecutor::blocking(move |_| {
                ran_clone.store(true, Ordering::SeqCst);
                Ok(ToolResult::text("ran anyway"))
            }),
        );

        let cancel = CancellationToken::new();
        cancel.request();
        let events = execute(decl, json!({}), cancel, None)
            .collect::<Vec<_>>()
            .await;

        assert!(matches!(
            &events[..],
            [ExecutionEvent::Terminal { is_error: true, .. }]
        ));
        assert!(!ran.load(Ordering::SeqCst), "executor must not have run");
    }

    #[tokio::test]
    async fn async_stream_sees_the_token() {
        let decl = declare(
            "self_checking",
            ToolExecutor::streaming(|_, cancel: CancellationToken| {
                stream::iter(if cancel.is_cancelled() {
                    vec![Ok(ToolStep::Done(ToolResult::text("stopped early")))]
                } else {
                    progress_steps()
                })
            }),
        );
        let events = collect(decl, json!({})).await;
        assert_progress_then_result(&events);
    }

    // ── Payload passthrough ───────────────────────────────────────────

    #[tokio::test]
    async fn terminal_payload_is_preserved() {
        let decl = declare(
            "table_query",
            ToolExecutor::blocking(|_| {
                Ok(ToolResult::text("2 rows").with_payload(json!({"rows": [1, 2]})))
            }),
        );
        let events = collect(decl, json!({})).await;
        match &events[0] {
            ExecutionEvent::Terminal { payload, .. } => {
                assert_eq!(payload.as_ref().unwrap()["rows"][0], 1);
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }
}
