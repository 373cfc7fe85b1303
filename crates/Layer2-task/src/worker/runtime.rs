//! Child side of a worker process
//!
//! A worker reads one request from stdin, runs the named computation on a
//! fresh single-threaded runtime, writes one result to stdout and exits.
//! Computation errors and panics become `success: false` results.

use super::process::WORKER_ENV;
use super::protocol::{read_frame, write_frame_within, WorkerRequest, MAX_FRAME_LEN};
use crate::computation::ComputationRegistry;
use crate::task::TaskResult;
use futures::FutureExt;
use mpdispatch_foundation::{Error, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use std::sync::Once;
use tokio::io::AsyncWrite;
use tracing::{debug, error};

static LAST_PANIC: Mutex<Option<String>> = parking_lot::const_mutex(None);
static PANIC_HOOK: Once = Once::new();

/// Whether this process was started by a dispatcher as a worker
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Serve one request when running as a worker
///
/// Call at the top of `main`, before any runtime is built:
///
/// ```no_run
/// # use mpdispatch_task::{worker, ComputationRegistry};
/// fn main() -> std::process::ExitCode {
///     let registry = ComputationRegistry::new();
///     if let Some(code) = worker::run_if_worker(&registry) {
///         return code;
///     }
///     // ... normal startup
///     std::process::ExitCode::SUCCESS
/// }
/// ```
pub fn run_if_worker(registry: &ComputationRegistry) -> Option<ExitCode> {
    if !is_worker_process() {
        return None;
    }
    Some(serve(registry))
}

/// Serve exactly one request over stdin/stdout
pub fn serve(registry: &ComputationRegistry) -> ExitCode {
    install_panic_capture();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build worker runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(serve_one(registry));

    // Blocking work a computation left behind must not outlive the reply.
    runtime.shutdown_background();

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Worker channel failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn serve_one(registry: &ComputationRegistry) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let request: WorkerRequest = read_frame(&mut stdin).await?;
    debug!(
        "Worker {} running {} for task {}",
        std::process::id(),
        request.computation,
        request.task_id
    );

    let result = execute(registry, &request.computation, request.payload).await;

    let mut stdout = tokio::io::stdout();
    send_result(&mut stdout, &result, MAX_FRAME_LEN).await
}

/// Write the result, or a failure explaining why it could not be sent
async fn send_result<W>(writer: &mut W, result: &TaskResult, max_len: u32) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match write_frame_within(writer, result, max_len).await {
        Err(Error::Protocol(reason)) => {
            error!("Result not sendable: {}", reason);
            let failure =
                TaskResult::failure(format!("Worker result could not be sent: {}", reason));
            write_frame_within(writer, &failure, max_len).await
        }
        other => other,
    }
}

/// Run one computation by name and turn every outcome into a [`TaskResult`]
pub async fn execute(
    registry: &ComputationRegistry,
    name: &str,
    payload: serde_json::Value,
) -> TaskResult {
    let Some(computation) = registry.get(name) else {
        return TaskResult::failure(format!(
            "unknown computation `{}` (registered: {})",
            name,
            registry.names().join(", ")
        ));
    };

    match AssertUnwindSafe(computation.call(payload))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => TaskResult::success(value),
        Ok(Err(err)) => {
            let message = describe_error(&err);
            error!("{}", message);
            TaskResult::failure(message)
        }
        Err(panic) => {
            let message = describe_panic(panic);
            error!("{}", message);
            TaskResult::failure(message)
        }
    }
}

fn describe_error(err: &anyhow::Error) -> String {
    let backtrace = err.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
        format!("Worker failed: {:#}\n\nBacktrace:\n{}", err, backtrace)
    } else {
        format!("Worker failed: {:#}", err)
    }
}

fn describe_panic(payload: Box<dyn Any + Send>) -> String {
    if let Some(report) = LAST_PANIC.lock().take() {
        return format!("Worker panicked: {}", report);
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    format!("Worker panicked: {}", message)
}

fn install_panic_capture() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            *LAST_PANIC.lock() = Some(format!(
                "{}\n\nBacktrace:\n{}",
                info,
                Backtrace::force_capture()
            ));
            previous(info);
        }));
    });
}
