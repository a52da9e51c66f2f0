//! Command/Result message types and framing for the parent-worker channel.
//!
//! Two FIFO queues per worker (inbound commands, outbound results) are
//! realized as newline-delimited JSON over the worker child process's piped
//! stdin/stdout. Reserved `command_id`s (`_init`, `_stop`, `_error`,
//! `_fatal`) carry out-of-band results that a waiter filtering by its own
//! `command_id` will naturally discard.

use crate::error::IpcError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Reserved command id for the worker's one-time initialization result.
pub const INIT_COMMAND_ID: &str = "_init";
/// Reserved command id for stop-monitor-emitted results.
pub const STOP_COMMAND_ID: &str = "_stop";
/// Reserved command id for an error the worker could not attribute.
pub const ERROR_COMMAND_ID: &str = "_error";
/// Reserved command id for a fatal, terminating worker-loop error.
pub const FATAL_COMMAND_ID: &str = "_fatal";

/// The body of a Command, one variant per worker-consumed operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CommandPayload {
    Execute {
        code: String,
        timeout: f64,
    },
    ExecuteFile {
        file_path: String,
        timeout: f64,
        log_file: Option<String>,
        working_dir: Option<String>,
    },
    GetStatus,
    StopExecution,
    GetData {
        if_condition: Option<String>,
        max_rows: usize,
    },
    Exit,
}

/// A command sent from the session manager to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: String,
    pub payload: CommandPayload,
    pub ts: f64,
}

impl Command {
    pub fn new(command_id: impl Into<String>, payload: CommandPayload) -> Self {
        Self {
            command_id: command_id.into(),
            payload,
            ts: unix_now(),
        }
    }
}

/// Result status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ready,
    Success,
    Error,
    Cancelled,
    Timeout,
    Stopped,
    StopSent,
    StopSkipped,
    NotRunning,
    Exiting,
    Fatal,
    InitFailed,
    Status,
}

/// A columnar snapshot of the engine's in-memory dataset, per `GET_DATA`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub columns: Vec<String>,
    pub dtypes: Vec<String>,
    pub data: Vec<Vec<serde_json::Value>>,
    pub index: Vec<usize>,
    pub rows: usize,
    pub total_rows: usize,
    pub displayed_rows: usize,
    pub max_rows: usize,
}

/// Side-channel fields carried by a Result, populated depending on command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultExtra {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSnapshot>,
}

/// A result sent from a worker back to the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub command_id: String,
    pub status: ResultStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time: f64,
    #[serde(default)]
    pub worker_state: String,
    #[serde(default)]
    pub extra: ResultExtra,
    pub ts: f64,
}

impl WorkerResult {
    pub fn new(command_id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            command_id: command_id.into(),
            status,
            output: String::new(),
            error: None,
            execution_time: 0.0,
            worker_state: String::new(),
            extra: ResultExtra::default(),
            ts: unix_now(),
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_execution_time(mut self, secs: f64) -> Self {
        self.execution_time = secs;
        self
    }

    pub fn with_worker_state(mut self, state: impl Into<String>) -> Self {
        self.worker_state = state.into();
        self
    }
}

fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Write one message as a newline-delimited JSON line.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message).expect("message types are always serializable");
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(IpcError::Write)?;
    writer.flush().await.map_err(IpcError::Write)
}

/// Read one newline-delimited JSON message. Returns `Ok(None)` on a clean
/// EOF (the peer closed its write half). A line that fails to parse is
/// reported as `IpcError::Malformed` rather than silently skipped, so a
/// caller can decide whether that implies the worker died.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, IpcError>
where
    R: AsyncBufReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(IpcError::Read)?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(IpcError::Malformed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn command_round_trips_through_framing() {
        let cmd = Command::new(
            "abc123",
            CommandPayload::Execute {
                code: "display \"hi\"".into(),
                timeout: 30.0,
            },
        );
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &cmd).await.unwrap();
        assert!(buf.ends_with(b"\n"));

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let decoded: Command = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded.command_id, "abc123");
        match decoded.payload {
            CommandPayload::Execute { code, timeout } => {
                assert_eq!(code, "display \"hi\"");
                assert_eq!(timeout, 30.0);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn result_round_trips_with_extra() {
        let result = WorkerResult::new("cmd-1", ResultStatus::Success)
            .with_output("4")
            .with_execution_time(0.01);
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &result).await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let decoded: WorkerResult = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded.command_id, "cmd-1");
        assert_eq!(decoded.status, ResultStatus::Success);
        assert_eq!(decoded.output, "4");
        assert!(decoded.extra.log_file.is_none());
    }

    #[tokio::test]
    async fn read_message_returns_none_on_eof() {
        let mut reader = tokio::io::BufReader::new(&b""[..]);
        let decoded: Option<Command> = read_message(&mut reader).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn read_message_rejects_malformed_line() {
        let mut reader = tokio::io::BufReader::new(&b"not json\n"[..]);
        let decoded: Result<Option<Command>, IpcError> = read_message(&mut reader).await;
        assert!(matches!(decoded, Err(IpcError::Malformed(_))));
    }
}
