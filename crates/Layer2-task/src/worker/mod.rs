//! Worker processes
//!
//! - `protocol` - length-prefixed JSON frames over the child's stdio
//! - `process` - parent side: spawn, exchange, reap
//! - `runtime` - child side: run one computation on a private runtime

pub mod protocol;
mod process;
mod runtime;

pub use process::{WorkerCommand, WorkerProcess, WORKER_ENV};
pub use protocol::{WorkerRequest, MAX_FRAME_LEN};
pub use runtime::{execute, is_worker_process, run_if_worker, serve};
