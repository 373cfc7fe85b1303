//! Dispatcher - runs submitted computations in worker processes
//!
//! Flow:
//! - `submit` registers a pending handle, then enqueues the task
//! - the dispatch loop drains the queue and starts one unit per task
//! - each unit acquires a gate permit and runs one worker process
//! - a reply resolves the handle and publishes a completion event on
//!   receipt; the worker is reaped and its permit released afterwards
//!
//! A worker that fails to reply is killed and reaped first, so its failure
//! result can carry the exit status.

use crate::completion::{self, CompletionPublisher, CompletionStream};
use crate::computation::Computation;
use crate::gate::ConcurrencyGate;
use crate::handle::TaskHandle;
use crate::registry::ResultRegistry;
use crate::task::{Task, TaskId, TaskResult};
use crate::worker::{WorkerCommand, WorkerProcess, WorkerRequest};
use chrono::Utc;
use mpdispatch_foundation::{Error, PoolSettings, Result, DEFAULT_MAX_PROCESSES};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum worker processes alive at once
    pub max_processes: usize,

    /// How worker processes are started
    pub worker: WorkerCommand,
}

impl DispatcherConfig {
    pub fn new(worker: WorkerCommand) -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            worker,
        }
    }

    /// Settings-driven config re-running the current executable as worker
    pub fn from_settings(settings: &PoolSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::new(WorkerCommand::current_exe()?).with_max_processes(settings.max_processes))
    }

    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Tasks accepted by `submit`
    pub submitted: u64,
    /// Tasks resolved with `success: true`
    pub completed: u64,
    /// Tasks resolved with `success: false`
    pub failed: u64,
    /// Handles not yet resolved
    pub pending: usize,
    /// Worker slots in use
    pub running: usize,
    /// Most worker slots ever in use at once
    pub peak_running: usize,
    /// Configured limit
    pub max_processes: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// State shared by the dispatch loop and every task unit
struct DispatchContext {
    gate: ConcurrencyGate,
    registry: ResultRegistry,
    publisher: CompletionPublisher,
    worker: WorkerCommand,
    counters: Arc<Counters>,
}

/// Bounded process-per-task dispatcher
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<Task>,
    registry: ResultRegistry,
    gate: ConcurrencyGate,
    completions: CompletionStream,
    counters: Arc<Counters>,
    dispatch_loop: JoinHandle<()>,
}

impl Dispatcher {
    /// Create a dispatcher and start its dispatch loop
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::Config("Dispatcher must be created inside a tokio runtime".to_string())
        })?;
        let gate = ConcurrencyGate::new(config.max_processes)?;
        let registry = ResultRegistry::new();
        let (publisher, completions) = completion::channel();
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        info!(
            "Dispatcher started: max {} worker processes via {}",
            config.max_processes,
            config.worker.program().display()
        );

        let context = Arc::new(DispatchContext {
            gate: gate.clone(),
            registry: registry.clone(),
            publisher,
            worker: config.worker,
            counters: Arc::clone(&counters),
        });
        let dispatch_loop = runtime.spawn(dispatch_loop(queue_rx, context));

        Ok(Self {
            queue,
            registry,
            gate,
            completions,
            counters,
            dispatch_loop,
        })
    }

    /// Submit a computation with its input
    pub fn submit<C: Computation>(&self, input: &C::Input) -> Result<TaskHandle> {
        self.submit_raw(C::NAME, serde_json::to_value(input)?, None)
    }

    /// Submit with a caller-chosen correlation id
    pub fn submit_correlated<C: Computation>(
        &self,
        input: &C::Input,
        correlation_id: impl Into<String>,
    ) -> Result<TaskHandle> {
        self.submit_raw(
            C::NAME,
            serde_json::to_value(input)?,
            Some(correlation_id.into()),
        )
    }

    /// Submit by computation name with an already-serialized payload
    pub fn submit_raw(
        &self,
        computation: impl Into<String>,
        payload: serde_json::Value,
        correlation_id: Option<String>,
    ) -> Result<TaskHandle> {
        let task = Task::new(computation, payload, correlation_id);
        let id = task.id;

        // Register before enqueueing so no result can arrive without a handle.
        let handle = self.registry.register(id, task.correlation_id.clone());
        debug!(
            "Submitting task {} ({}) as {}",
            id, task.computation, task.correlation_id
        );

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.queue.send(task).is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::Relaxed);
            self.registry.discard(id);
            return Err(Error::Task("dispatcher is shut down".to_string()));
        }
        Ok(handle)
    }

    /// Push feed of finished tasks
    pub fn completions(&self) -> CompletionStream {
        self.completions.clone()
    }

    /// Handles not yet resolved
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Worker slots currently in use
    pub fn running(&self) -> usize {
        self.gate.in_use()
    }

    pub fn max_processes(&self) -> usize {
        self.gate.max()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            pending: self.registry.len(),
            running: self.gate.in_use(),
            peak_running: self.gate.peak(),
            max_processes: self.gate.max(),
        }
    }

    /// Stop accepting work and wait until every submitted task has resolved
    /// and its worker has been reaped
    pub async fn shutdown(self) -> Result<()> {
        let Dispatcher {
            queue,
            dispatch_loop,
            ..
        } = self;
        drop(queue);
        dispatch_loop
            .await
            .map_err(|e| Error::Internal(format!("dispatch loop failed: {}", e)))
    }
}

// ============================================================================
// Dispatch loop
// ============================================================================

async fn dispatch_loop(mut queue: mpsc::UnboundedReceiver<Task>, context: Arc<DispatchContext>) {
    let mut units = JoinSet::new();

    loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(task) => {
                    units.spawn(run_task(Arc::clone(&context), task));
                }
                None => break,
            },
            Some(joined) = units.join_next(), if !units.is_empty() => log_unit_exit(joined),
        }
    }

    debug!(
        "Submission queue closed, draining {} in-flight tasks",
        units.len()
    );
    while let Some(joined) = units.join_next().await {
        log_unit_exit(joined);
    }
    info!("Dispatcher stopped");
}

fn log_unit_exit(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        error!("Task unit ended abnormally: {}", e);
    }
}

/// Drops the registry entry if the unit never resolved it
struct PendingEntry {
    registry: ResultRegistry,
    id: TaskId,
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        if self.registry.discard(self.id) {
            warn!("Task {} was torn down before resolving", self.id);
        }
    }
}

// ============================================================================
// Per-task unit
// ============================================================================

impl DispatchContext {
    /// Resolve the handle, then publish; at most once per task
    fn finish(&self, id: TaskId, correlation_id: String, result: TaskResult) {
        let counter = if result.success {
            &self.counters.completed
        } else {
            &self.counters.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if self.registry.resolve(id, result.clone()) {
            self.publisher.publish(correlation_id, result);
        } else {
            warn!("Task {} was no longer pending, result dropped", id);
        }
    }
}

async fn run_task(context: Arc<DispatchContext>, task: Task) {
    let Task {
        id,
        computation,
        payload,
        correlation_id,
        submitted_at,
    } = task;
    let _entry = PendingEntry {
        registry: context.registry.clone(),
        id,
    };

    let permit = match context.gate.acquire().await {
        Ok(permit) => permit,
        Err(e) => {
            context.finish(id, correlation_id, TaskResult::failure(e.to_string()));
            return;
        }
    };
    debug!(
        "Task {} got a worker slot after {} ms queued",
        id,
        (Utc::now() - submitted_at).num_milliseconds()
    );

    let mut process = match WorkerProcess::spawn(&context.worker) {
        Ok(process) => process,
        Err(e) => {
            error!("Task {}: {}", id, e);
            drop(permit);
            context.finish(id, correlation_id, TaskResult::failure(e.to_string()));
            return;
        }
    };
    let pid = process.pid();
    debug!("Task {} ({}) running in worker {:?}", id, computation, pid);

    let request = WorkerRequest {
        task_id: id,
        computation,
        payload,
    };
    match process.exchange(&request).await {
        Ok(result) => {
            context.finish(id, correlation_id, result);
            match process.reap(false).await {
                Ok(status) if !status.success() => {
                    warn!("Task {}: worker {:?} replied, then {}", id, pid, status);
                }
                Ok(_) => {}
                Err(e) => warn!("Task {}: failed to reap worker {:?}: {}", id, pid, e),
            }
            drop(permit);
        }
        Err(e) => {
            let status = match process.reap(true).await {
                Ok(status) => status.to_string(),
                Err(reap_err) => format!("unknown exit status ({})", reap_err),
            };
            drop(permit);

            let message = format!(
                "Exception receiving result for task {}: {} ({})",
                id, e, status
            );
            error!("{}", message);
            context.finish(id, correlation_id, TaskResult::failure(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_worker() -> WorkerCommand {
        WorkerCommand::new("/definitely/not/a/worker-binary")
    }

    #[test]
    fn test_new_outside_runtime_is_config_error() {
        let err = Dispatcher::new(DispatcherConfig::new(missing_worker())).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_zero_processes_rejected() {
        let config = DispatcherConfig::new(missing_worker()).with_max_processes(0);
        let err = Dispatcher::new(config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_spawn_failure_resolves_handle() {
        let dispatcher =
            Dispatcher::new(DispatcherConfig::new(missing_worker()).with_max_processes(1)).unwrap();
        let completions = dispatcher.completions();

        let handle = dispatcher
            .submit_raw("anything", serde_json::Value::Null, Some("doomed".into()))
            .unwrap();
        assert_eq!(handle.correlation_id(), "doomed");

        let result = handle.clone().await;
        assert!(!result.success);
        assert!(result.error_message().unwrap().contains("Failed to spawn worker"));

        let event = completions.recv().await.unwrap();
        assert_eq!(event.correlation_id, "doomed");
        assert_eq!(event.result, result);

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.running, 0);

        dispatcher.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_submit_is_not_counted() {
        let mut dispatcher =
            Dispatcher::new(DispatcherConfig::new(missing_worker()).with_max_processes(1)).unwrap();

        // Stopping the loop drops the receiving end of the queue.
        dispatcher.dispatch_loop.abort();
        assert!((&mut dispatcher.dispatch_loop).await.is_err());

        let err = dispatcher
            .submit_raw("anything", serde_json::Value::Null, None)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Task(_)));

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.pending, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reply_resolves_before_worker_exits() {
        // Replies `{"success":true}` at once, then stays alive.
        let worker = WorkerCommand::new("sh")
            .arg("-c")
            .arg(r#"printf '\000\000\000\020{"success":true}'; sleep 2"#);
        let dispatcher =
            Dispatcher::new(DispatcherConfig::new(worker).with_max_processes(1)).unwrap();

        let started = std::time::Instant::now();
        let result = dispatcher
            .submit_raw("anything", serde_json::Value::Null, None)
            .unwrap()
            .await;
        let waited = started.elapsed();

        assert!(result.success);
        assert!(
            waited < std::time::Duration::from_millis(1500),
            "result waited {:?} for the worker to exit",
            waited
        );
        // Still reaping the lingering worker.
        assert_eq!(dispatcher.running(), 1);

        dispatcher.shutdown().await.unwrap();
    }
}
