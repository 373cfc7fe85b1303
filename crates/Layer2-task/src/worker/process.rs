//! Parent side of a worker process: spawn, exchange one request, reap

use super::protocol::{read_frame, write_frame, WorkerRequest};
use crate::task::TaskResult;
use mpdispatch_foundation::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Environment variable marking a process as a worker
pub const WORKER_ENV: &str = "MPDISPATCH_WORKER";

/// How to start a worker process
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-run the current executable in worker mode
    pub fn current_exe() -> Result<Self> {
        std::env::current_exe()
            .map(Self::new)
            .map_err(|e| Error::Config(format!("Cannot locate current executable: {}", e)))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env(WORKER_ENV, "1");

        // Computation errors should carry a backtrace unless the caller chose
        // otherwise.
        if std::env::var_os("RUST_LIB_BACKTRACE").is_none()
            && std::env::var_os("RUST_BACKTRACE").is_none()
        {
            cmd.env("RUST_LIB_BACKTRACE", "1");
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

/// A spawned worker and the parent's end of its channel
pub struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    pid: Option<u32>,
}

impl WorkerProcess {
    /// Start one worker process
    pub fn spawn(command: &WorkerCommand) -> Result<Self> {
        let mut child = command.command().spawn().map_err(|e| {
            Error::Worker(format!(
                "Failed to spawn worker {}: {}",
                command.program.display(),
                e
            ))
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        debug!("Spawned worker process {:?}", pid);

        Ok(Self {
            child,
            stdin,
            stdout,
            pid,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send the request, close our write end, wait for the single reply
    pub async fn exchange(&mut self, request: &WorkerRequest) -> Result<TaskResult> {
        let mut stdin = self
            .stdin
            .take()
            .ok_or_else(|| Error::Worker("worker request channel already closed".to_string()))?;
        write_frame(&mut stdin, request).await?;
        drop(stdin);

        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| Error::Worker("worker result channel already closed".to_string()))?;
        read_frame(stdout).await
    }

    /// Close the channel and wait for the process to exit
    ///
    /// With `kill` set the process is signalled first, so a worker that
    /// stopped talking cannot keep the reap waiting.
    pub async fn reap(mut self, kill: bool) -> Result<ExitStatus> {
        self.stdin.take();
        self.stdout.take();

        if kill {
            if let Err(e) = self.child.start_kill() {
                debug!("Worker {:?} already gone before kill: {}", self.pid, e);
            }
        }

        let status = self.child.wait().await?;
        debug!("Reaped worker process {:?}: {}", self.pid, status);
        Ok(status)
    }
}
