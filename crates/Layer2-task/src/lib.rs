//! # mpdispatch-task
//!
//! Bounded process-per-task dispatcher for mpdispatch.
//! Runs named computations in short-lived worker processes, at most
//! `max_processes` at a time, and hands back results through awaitable
//! handles and a completion stream.
//!
//! ## Features
//!
//! - Non-blocking submission through an unbounded queue
//! - One fresh worker process per task; results are delivered on receipt
//!   and the worker is reaped right after
//! - Concurrency gate with running/peak counters
//! - Awaitable, cloneable task handles
//! - Completion stream keyed by correlation id
//! - Worker errors and panics reported as failed results, never lost
//!
//! ## Worker mode
//!
//! Computations are looked up by name inside the worker, so every binary
//! that dispatches must also be able to serve. Either call
//! [`worker::run_if_worker`] first thing in `main`, or point
//! [`DispatcherConfig::worker`] at the `mpdispatch-worker` binary.

pub mod builtin;
pub mod completion;
pub mod computation;
pub mod dispatcher;
pub mod gate;
pub mod handle;
pub mod registry;
pub mod task;
pub mod worker;

// Dispatcher
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats};
pub use handle::TaskHandle;
pub use task::{Task, TaskId, TaskResult};

// Completion feed
pub use completion::{CompletionEvent, CompletionStream};

// Computations
pub use computation::{Computation, ComputationRegistry, ErasedComputation};

// Building blocks
pub use gate::{ConcurrencyGate, GatePermit};
pub use registry::ResultRegistry;
pub use worker::WorkerCommand;
