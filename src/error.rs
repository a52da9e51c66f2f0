//! Error taxonomy for the orchestration core.
//!
//! Each enum corresponds to one layer: IPC framing, worker-process lifecycle,
//! and session routing/admission. The MCP tool layer converts these into
//! structured `CallToolResult`s rather than letting them escape as transport
//! errors (see `server.rs`).

use thiserror::Error;

/// Errors from the command/result message channel to a worker process.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to write command to worker stdin: {0}")]
    Write(#[source] std::io::Error),

    #[error("failed to read result from worker stdout: {0}")]
    Read(#[source] std::io::Error),

    #[error("worker closed its output stream (process likely exited)")]
    Closed,

    #[error("malformed result line from worker: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("timed out waiting for a result matching command_id {0}")]
    Timeout(String),
}

/// Errors from spawning or controlling a worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker failed to initialize: {0}")]
    InitFailed(String),

    #[error("timed out waiting {0:?} for worker initialization")]
    InitTimeout(std::time::Duration),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("failed to signal worker pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error("worker process is no longer running")]
    Dead,
}

/// Errors surfaced by `SessionManager` operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("invalid session id '{0}': must be 1-128 ASCII alphanumeric, '-', or '_' characters")]
    InvalidSessionId(String),

    #[error("session '{0}' is in a terminal or error state: {1}")]
    Terminal(String, String),

    #[error("cannot create session: at capacity ({active}/{max} active sessions)")]
    AdmissionDenied { active: usize, max: usize },

    #[error("refusing to destroy the default session without force=true")]
    DefaultSessionProtected,

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("engine reported an error: {0}")]
    Engine(String),
}

impl SessionError {
    /// Human-readable message suitable for a result's `error` field.
    pub fn as_user_message(&self) -> String {
        self.to_string()
    }
}
