//! Parent-side handle to a worker child process.
//!
//! A `WorkerHandle` owns one `statamcp-worker` child, spawned with piped
//! stdio so the command/result channels are the child's own stdin/stdout,
//! realized as two FIFO queues of newline-delimited JSON. All
//! reads go through a single `Mutex`-guarded `BufReader`, so a caller that
//! sends a command and then waits for its matching result also naturally
//! drains any out-of-band result (`_stop`, `_init`) left over from a prior
//! exchange; it is the caller's job (see `session.rs`) to discard those by
//! `command_id` rather than this layer's.

use crate::error::WorkerError;
use crate::ipc::{self, Command, WorkerResult, INIT_COMMAND_ID};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::Mutex;

/// A spawned `statamcp-worker` process and its framed IPC channel.
pub struct WorkerHandle {
    session_id: String,
    pid: i32,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl WorkerHandle {
    /// Spawn a worker for `session_id` and wait up to `start_timeout` for its
    /// `_init` result. On success, returns the handle and that result (its
    /// `status` distinguishes `ready` from `init_failed`).
    pub async fn spawn(
        session_id: &str,
        engine_install_path: Option<&str>,
        engine_edition: &str,
        start_timeout: Duration,
    ) -> Result<(Self, WorkerResult), WorkerError> {
        let exe = worker_binary_path();
        let mut cmd = TokioCommand::new(exe);
        cmd.arg(session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(path) = engine_install_path {
            cmd.env("STATAMCP_ENGINE_INSTALL_PATH", path);
        }
        cmd.env("STATAMCP_ENGINE_EDITION", engine_edition);

        // New session id so a stop signal targets only this worker's process
        // group, mirroring process.rs's setsid-then-signal-the-group idiom.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::other)?;
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(WorkerError::Spawn)?;
        let pid = child.id().ok_or(WorkerError::Dead)? as i32;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        let handle = Self {
            session_id: session_id.to_string(),
            pid,
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        };

        let init_result = tokio::time::timeout(start_timeout, handle.recv_result())
            .await
            .map_err(|_| WorkerError::InitTimeout(start_timeout))?
            .map_err(WorkerError::Ipc)?
            .ok_or(WorkerError::Dead)?;

        if init_result.command_id != INIT_COMMAND_ID {
            tracing::warn!(
                session_id = %session_id,
                command_id = %init_result.command_id,
                "worker's first message was not the expected _init result"
            );
        }

        Ok((handle, init_result))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Send one command down the worker's stdin.
    pub async fn send_command(&self, command: &Command) -> Result<(), WorkerError> {
        let mut stdin = self.stdin.lock().await;
        ipc::write_message(&mut *stdin, command)
            .await
            .map_err(WorkerError::from)
    }

    /// Read the next result line from the worker's stdout. `Ok(None)` means
    /// the worker closed its output (it has exited or is about to).
    pub async fn recv_result(&self) -> Result<Option<WorkerResult>, crate::error::IpcError> {
        let mut stdout = self.stdout.lock().await;
        ipc::read_message(&mut *stdout).await
    }

    /// Signal the worker's stop flag out of band (`SIGUSR1` +
    /// an `AtomicBool` the worker's stop-monitor observes, not a message on
    /// the command queue, so a stop is never stuck behind an in-flight
    /// command).
    pub fn signal_stop(&self) -> Result<(), WorkerError> {
        signal::kill(Pid::from_raw(self.pid), Signal::SIGUSR1).map_err(|source| {
            WorkerError::Signal {
                pid: self.pid,
                source,
            }
        })
    }

    /// `true` if the child process has not yet exited.
    pub async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Wait (non-blocking poll loop) up to `timeout` for the child to exit
    /// on its own, e.g. after an `Exit` command was sent.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                {
                    let mut child = self.child.lock().await;
                    if matches!(child.try_wait(), Ok(Some(_))) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Forceful termination: `SIGKILL` to the whole process group (the
    /// worker called `setsid()` at spawn), then reap it so no zombie
    /// lingers.
    pub async fn hard_kill(&self) {
        let _ = signal::kill(Pid::from_raw(-self.pid), Signal::SIGKILL);
        let mut child = self.child.lock().await;
        let _ = child.wait().await;
    }
}

/// The per-worker scratch directory a worker binds its engine's temp-file
/// environment to. Deterministic from `session_id` alone so the
/// parent can compute the same path the worker used, e.g. to resolve a
/// default `execute_file` log path without an extra round trip.
pub fn worker_temp_dir(session_id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("statamcp-worker-{session_id}"))
}

fn worker_binary_path() -> std::path::PathBuf {
    // Test override: cargo sets `CARGO_BIN_EXE_statamcp-worker` for any test
    // binary in this package, but only the process that built it knows
    // that env var name at compile time, so tests pass it along explicitly.
    if let Ok(path) = std::env::var("STATAMCP_WORKER_BIN") {
        return std::path::PathBuf::from(path);
    }
    // Sibling of the currently running `statamcp` binary, matching how
    // cargo lays out `[[bin]]` targets in the same target directory.
    match std::env::current_exe() {
        Ok(path) => path
            .parent()
            .map(|dir| dir.join("statamcp-worker"))
            .unwrap_or_else(|| std::path::PathBuf::from("statamcp-worker")),
        Err(_) => std::path::PathBuf::from("statamcp-worker"),
    }
}
