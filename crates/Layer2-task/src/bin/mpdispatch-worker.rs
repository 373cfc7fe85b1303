//! Standalone worker binary serving the built-in computations
//!
//! Started by a dispatcher with `MPDISPATCH_WORKER=1`; reads one request
//! from stdin and writes one result to stdout.

use mpdispatch_foundation::{init_logging, EnvReader, PoolSettings};
use mpdispatch_task::{builtin, worker};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut settings = PoolSettings::default();
    settings.apply_env(&EnvReader::process());

    // stderr only; the parent owns the log file
    settings.log.file = None;
    if let Err(e) = init_logging(&settings.log) {
        eprintln!("mpdispatch-worker: {}", e);
    }

    worker::serve(&builtin::registry())
}
