//! Protected dispatch of an authorized call.
//!
//! The tool runs on its own task so a panic cannot unwind into the caller,
//! under the dispatch timeout and the session's cancellation token. Exactly
//! one terminal audit event is emitted per dispatch: by [`TerminalGuard::finish`]
//! on the normal path, or by its `Drop` if the invoking future is abandoned.

use crate::audit::{truncate_result, AuditEventType, InvocationRecord};
use crate::error::ToolError;
use crate::execution_context::ExecutionContext;
use crate::tools::{Tool, ToolResult};
use crate::traits::AuditSink;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Aborts the wrapped task when dropped. Aborting a finished task is a no-op.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns the obligation to emit the terminal event of one dispatch.
pub struct TerminalGuard<'a> {
    record: InvocationRecord,
    sink: &'a dyn AuditSink,
    started: Instant,
    max_result_bytes: usize,
    finished: bool,
}

impl<'a> TerminalGuard<'a> {
    pub fn new(record: InvocationRecord, sink: &'a dyn AuditSink, max_result_bytes: usize) -> Self {
        Self {
            record,
            sink,
            started: Instant::now(),
            max_result_bytes,
            finished: false,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn finish(mut self, result: &Result<ToolResult, ToolError>) {
        let duration_ms = self.elapsed_ms();
        let event = match result {
            Ok(output) => {
                let value = serde_json::to_value(output)
                    .unwrap_or_else(|e| json!({ "unserializable": e.to_string() }));
                let mut event = self
                    .record
                    .event(AuditEventType::Result)
                    .with_duration(duration_ms)
                    .with_result(truncate_result(value, self.max_result_bytes));
                if let Some(err) = &output.error {
                    event = event.with_error(err.clone());
                }
                event
            }
            Err(e) => self
                .record
                .event(AuditEventType::Error)
                .with_duration(duration_ms)
                .with_error(e.to_string()),
        };
        self.sink.log(event);
        self.finished = true;
    }
}

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(
            "Invocation {} of {} dropped mid-dispatch",
            self.record.correlation_id, self.record.tool_name
        );
        let event = self
            .record
            .event(AuditEventType::Error)
            .with_duration(self.elapsed_ms())
            .with_error(ToolError::Cancelled.to_string());
        self.sink.log(event);
    }
}

/// Run `tool` with timeout, cancellation and panic isolation, then emit the
/// terminal event through `guard`.
pub async fn execute_with_protection(
    tool: Arc<dyn Tool>,
    ctx: ExecutionContext,
    input: serde_json::Value,
    guard: TerminalGuard<'_>,
) -> Result<ToolResult, ToolError> {
    let timeout_ms = ctx.timeout_ms;
    let cancellation = ctx.cancellation.clone();
    let tool_name = tool.name().to_string();

    let mut handle = AbortOnDrop(tokio::spawn(async move { tool.execute(ctx, input).await }));

    let result = tokio::select! {
        biased;
        _ = cancellation.cancelled() => {
            warn!("Tool {} cancelled: session disconnected", tool_name);
            Err(ToolError::Cancelled)
        }
        joined = timeout(Duration::from_millis(timeout_ms), &mut handle.0) => match joined {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                error!("Tool {} panicked: {}", tool_name, message);
                Err(ToolError::Internal(format!("tool panicked: {}", message)))
            }
            Ok(Err(_)) => {
                error!("Tool {} task was cancelled", tool_name);
                Err(ToolError::Cancelled)
            }
            Err(_) => {
                warn!("Tool {} timed out after {}ms", tool_name, timeout_ms);
                Err(ToolError::Timeout(timeout_ms))
            }
        }
    };
    drop(handle);

    if result.is_ok() {
        info!("Tool {} completed", tool_name);
    }
    guard.finish(&result);
    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
