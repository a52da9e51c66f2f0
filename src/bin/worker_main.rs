//! Child process entry point for one session's worker.
//!
//! Run as `statamcp-worker <session_id>` by `worker::WorkerHandle::spawn`,
//! with its stdin/stdout piped to the parent. Speaks the framed
//! command/result protocol from `statamcp::ipc` on those pipes; everything
//! else (tracing, the engine, init) stays local to this process, giving
//! each session genuine OS-level isolation from every other one.

use statamcp::engine::Engine;
#[cfg(feature = "reference-engine")]
use statamcp::engine::ReferenceEngine;
#[cfg(not(feature = "reference-engine"))]
use statamcp::engine::StataEngine;
use statamcp::engine::EngineOutcome;
use statamcp::ipc::{
    self, Command, CommandPayload, ResultStatus, WorkerResult, ERROR_COMMAND_ID,
    INIT_COMMAND_ID, STOP_COMMAND_ID,
};
use statamcp::script_rewriter;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Mutex;

/// Shared flags a worker's command loop and its out-of-band stop monitor
/// coordinate through. `AtomicBool` rather than a lock: the monitor must
/// never block behind an in-flight command.
struct WorkerState {
    /// Set by the `SIGUSR1` handler, cleared by the monitor once observed.
    stop_requested: AtomicBool,
    /// Whether a command is currently running.
    busy: AtomicBool,
    /// Whether the in-flight command was cancelled via a stop request.
    cancelled: AtomicBool,
    /// Guards the engine's single-break-call contract: at most
    /// one `interrupt()` per execution, however many stop signals arrive.
    stop_already_sent: AtomicBool,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            stop_already_sent: AtomicBool::new(false),
        }
    }

    /// Race-free reset at the start of every `EXECUTE`/`EXECUTE_FILE`: the
    /// stop flag is cleared *before* `cancelled`/`stop_already_sent`, so a
    /// stop signal that arrives mid-reset is never silently swallowed by a
    /// reset that hasn't finished observing it yet.
    fn reset_for_execution(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
        self.stop_already_sent.store(false, Ordering::SeqCst);
    }
}

#[tokio::main]
async fn main() {
    let session_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "unknown".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(session_id = %session_id, pid = std::process::id(), "worker starting");

    let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let state = Arc::new(WorkerState::new());
    let engine = build_engine();

    let temp_dir = statamcp::worker::worker_temp_dir(&session_id);
    if let Err(e) = tokio::fs::create_dir_all(&temp_dir).await {
        send(&stdout, WorkerResult::new(INIT_COMMAND_ID, ResultStatus::InitFailed)
            .with_error(format!("failed to create scratch directory: {e}")))
        .await;
        return;
    }

    let seed = derive_seed(&session_id);
    if let Err(e) = engine.bind_environment(&temp_dir.to_string_lossy(), seed).await {
        send(
            &stdout,
            WorkerResult::new(INIT_COMMAND_ID, ResultStatus::InitFailed).with_error(e.message),
        )
        .await;
        return;
    }
    if let Err(e) = engine.export_dummy_graph().await {
        tracing::warn!(error = %e, "dummy graph export failed during init, continuing anyway");
    }

    send(
        &stdout,
        WorkerResult::new(INIT_COMMAND_ID, ResultStatus::Ready).with_worker_state("ready"),
    )
    .await;

    let mut sigusr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGUSR1 handler");
            return;
        }
    };
    let signal_state = state.clone();
    tokio::spawn(async move {
        loop {
            if sigusr1.recv().await.is_none() {
                return;
            }
            signal_state.stop_requested.store(true, Ordering::SeqCst);
        }
    });

    let monitor_state = state.clone();
    let monitor_engine = engine.clone();
    let monitor_stdout = stdout.clone();
    let monitor = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !monitor_state.stop_requested.swap(false, Ordering::SeqCst) {
                continue;
            }
            if !monitor_state.busy.load(Ordering::SeqCst) {
                // Not executing anything: ignore the stop request silently.
                continue;
            }
            if monitor_state
                .stop_already_sent
                .swap(true, Ordering::SeqCst)
            {
                send(
                    &monitor_stdout,
                    WorkerResult::new(STOP_COMMAND_ID, ResultStatus::StopSkipped),
                )
                .await;
                continue;
            }
            monitor_state.cancelled.store(true, Ordering::SeqCst);
            monitor_engine.interrupt();
            send(
                &monitor_stdout,
                WorkerResult::new(STOP_COMMAND_ID, ResultStatus::Stopped),
            )
            .await;
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    run_command_loop(stdin, &stdout, &state, engine.as_ref(), &temp_dir, seed).await;

    monitor.abort();
    let _ = tokio::fs::remove_dir_all(&temp_dir).await;
    tracing::info!(session_id = %session_id, "worker exiting");
}

#[cfg(feature = "reference-engine")]
fn build_engine() -> Arc<dyn Engine> {
    Arc::new(ReferenceEngine::new())
}

#[cfg(not(feature = "reference-engine"))]
fn build_engine() -> Arc<dyn Engine> {
    Arc::new(StataEngine::new())
}

fn derive_seed(session_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    hasher.finish()
}

async fn send(stdout: &Arc<Mutex<tokio::io::Stdout>>, result: WorkerResult) {
    let mut out = stdout.lock().await;
    if let Err(e) = ipc::write_message(&mut *out, &result).await {
        tracing::error!(error = %e, "failed to write result to stdout");
    }
}

async fn run_command_loop<R>(
    mut reader: R,
    stdout: &Arc<Mutex<tokio::io::Stdout>>,
    state: &Arc<WorkerState>,
    engine: &dyn Engine,
    temp_dir: &std::path::Path,
    seed: u64,
) where
    R: tokio::io::AsyncBufReadExt + Unpin,
{
    loop {
        let command: Command = match ipc::read_message(&mut reader).await {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::info!("stdin closed, shutting down");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed command, skipping");
                send(
                    stdout,
                    WorkerResult::new(ERROR_COMMAND_ID, ResultStatus::Error)
                        .with_error(e.to_string()),
                )
                .await;
                continue;
            }
        };

        match command.payload {
            CommandPayload::Execute { code, timeout } => {
                handle_execute(stdout, state, engine, &command.command_id, &code, timeout).await;
            }
            CommandPayload::ExecuteFile {
                file_path,
                timeout,
                log_file,
                working_dir,
            } => {
                handle_execute_file(
                    stdout,
                    state,
                    engine,
                    temp_dir,
                    seed,
                    &command.command_id,
                    &file_path,
                    timeout,
                    log_file,
                    working_dir,
                )
                .await;
            }
            CommandPayload::GetStatus => {
                let worker_state = if state.busy.load(Ordering::SeqCst) {
                    "busy"
                } else {
                    "ready"
                };
                send(
                    stdout,
                    WorkerResult::new(command.command_id, ResultStatus::Status)
                        .with_worker_state(worker_state),
                )
                .await;
            }
            CommandPayload::StopExecution => {
                handle_stop(stdout, state, engine, &command.command_id).await;
            }
            CommandPayload::GetData {
                if_condition,
                max_rows,
            } => {
                handle_get_data(
                    stdout,
                    state,
                    engine,
                    &command.command_id,
                    if_condition,
                    max_rows,
                )
                .await;
            }
            CommandPayload::Exit => {
                send(
                    stdout,
                    WorkerResult::new(command.command_id, ResultStatus::Exiting),
                )
                .await;
                return;
            }
        }
    }
}

async fn handle_execute(
    stdout: &Arc<Mutex<tokio::io::Stdout>>,
    state: &Arc<WorkerState>,
    engine: &dyn Engine,
    command_id: &str,
    code: &str,
    _timeout: f64,
) {
    state.reset_for_execution();
    state.busy.store(true, Ordering::SeqCst);

    let neutralized = script_rewriter::neutralize_clear_directives(code);
    let started = Instant::now();
    let outcome = engine.run(&neutralized, true).await;
    let elapsed = started.elapsed().as_secs_f64();

    state.busy.store(false, Ordering::SeqCst);

    let result = classify_outcome(command_id, outcome, state, elapsed, None);
    send(stdout, result).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_execute_file(
    stdout: &Arc<Mutex<tokio::io::Stdout>>,
    state: &Arc<WorkerState>,
    engine: &dyn Engine,
    temp_dir: &std::path::Path,
    seed: u64,
    command_id: &str,
    file_path: &str,
    _timeout: f64,
    log_file: Option<String>,
    working_dir: Option<String>,
) {
    let code = match tokio::fs::read_to_string(file_path).await {
        Ok(c) => c,
        Err(e) => {
            send(
                stdout,
                WorkerResult::new(command_id, ResultStatus::Error)
                    .with_error(format!("failed to read {file_path}: {e}")),
            )
            .await;
            return;
        }
    };

    state.reset_for_execution();
    state.busy.store(true, Ordering::SeqCst);

    let resolved_log = log_file.unwrap_or_else(|| {
        temp_dir
            .join(format!("{command_id}.log"))
            .to_string_lossy()
            .into_owned()
    });
    let resolved_dir = working_dir.unwrap_or_else(|| {
        std::path::Path::new(file_path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string())
    });

    let wrapped = script_rewriter::wrap_for_execution(&code, &resolved_log, &resolved_dir, seed);

    let started = Instant::now();
    let outcome = engine.run(&wrapped, true).await;
    let elapsed = started.elapsed().as_secs_f64();

    state.busy.store(false, Ordering::SeqCst);

    // The reference engine has no real `log using` of its own; write the
    // captured output to the log path ourselves so a tailing reader (the
    // streaming executor) sees the same bytes a real log file would hold.
    let output_for_log = match &outcome {
        Ok(EngineOutcome::Completed { output }) | Ok(EngineOutcome::Interrupted { output }) => {
            output.clone()
        }
        Err(e) => e.partial_output.clone(),
    };
    if let Err(e) = tokio::fs::write(&resolved_log, dedupe_break_markers(&output_for_log)).await {
        tracing::warn!(path = %resolved_log, error = %e, "failed to write log file");
    }

    let result = classify_outcome(command_id, outcome, state, elapsed, Some(resolved_log));
    send(stdout, result).await;
}

async fn handle_stop(
    stdout: &Arc<Mutex<tokio::io::Stdout>>,
    state: &Arc<WorkerState>,
    engine: &dyn Engine,
    command_id: &str,
) {
    // Fallback path for a stop request delivered on the command queue
    // instead of out of band; the out-of-band SIGUSR1 path in `main`'s
    // monitor task is primary and races the same flags, so this applies
    // the same idempotency contract.
    if !state.busy.load(Ordering::SeqCst) {
        send(
            stdout,
            WorkerResult::new(command_id, ResultStatus::NotRunning),
        )
        .await;
        return;
    }
    if state.stop_already_sent.swap(true, Ordering::SeqCst) {
        send(
            stdout,
            WorkerResult::new(command_id, ResultStatus::StopSkipped),
        )
        .await;
        return;
    }
    state.cancelled.store(true, Ordering::SeqCst);
    engine.interrupt();
    send(
        stdout,
        WorkerResult::new(command_id, ResultStatus::StopSent),
    )
    .await;
}

async fn handle_get_data(
    stdout: &Arc<Mutex<tokio::io::Stdout>>,
    state: &Arc<WorkerState>,
    engine: &dyn Engine,
    command_id: &str,
    if_condition: Option<String>,
    max_rows: usize,
) {
    state.busy.store(true, Ordering::SeqCst);
    let outcome = engine.get_data(if_condition.as_deref(), max_rows).await;
    state.busy.store(false, Ordering::SeqCst);

    let result = match outcome {
        Ok(snapshot) => {
            let mut r = WorkerResult::new(command_id, ResultStatus::Success);
            r.extra.data = Some(snapshot);
            r
        }
        Err(e) => WorkerResult::new(command_id, ResultStatus::Error).with_error(e.message),
    };
    send(stdout, result).await;
}

fn classify_outcome(
    command_id: &str,
    outcome: Result<EngineOutcome, statamcp::engine::EngineError>,
    state: &Arc<WorkerState>,
    elapsed: f64,
    log_file: Option<String>,
) -> WorkerResult {
    let mut result = match outcome {
        Ok(EngineOutcome::Completed { output }) => {
            WorkerResult::new(command_id, ResultStatus::Success)
                .with_output(dedupe_break_markers(&output))
                .with_execution_time(elapsed)
        }
        Ok(EngineOutcome::Interrupted { output }) => {
            let status = if state.cancelled.load(Ordering::SeqCst) {
                ResultStatus::Cancelled
            } else {
                ResultStatus::Stopped
            };
            WorkerResult::new(command_id, status)
                .with_output(dedupe_break_markers(&output))
                .with_execution_time(elapsed)
        }
        Err(e) => WorkerResult::new(command_id, ResultStatus::Error)
            .with_output(dedupe_break_markers(&e.partial_output))
            .with_error(e.message)
            .with_execution_time(elapsed),
    };
    result.worker_state = "ready".to_string();
    if let Some(log_file) = log_file {
        result.extra.log_file = Some(log_file);
    }
    result
}

/// Collapse runs of the engine's break marker (emitted once per interrupted
/// statement, but a single user-visible stop) into a single occurrence.
fn dedupe_break_markers(output: &str) -> String {
    let marker = statamcp::engine::BREAK_MARKER;
    let mut deduped = Vec::new();
    let mut last_was_marker = false;
    for line in output.lines() {
        let is_marker = line.trim() == marker;
        if is_marker && last_was_marker {
            continue;
        }
        deduped.push(line);
        last_was_marker = is_marker;
    }
    deduped.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_collapses_consecutive_markers() {
        let input = format!("a\n{m}\n{m}\n{m}\nb", m = statamcp::engine::BREAK_MARKER);
        let out = dedupe_break_markers(&input);
        assert_eq!(out.matches(statamcp::engine::BREAK_MARKER).count(), 1);
        assert!(out.contains('a'));
        assert!(out.contains('b'));
    }

    #[test]
    fn dedupe_leaves_non_adjacent_markers() {
        let input = format!(
            "{m}\nsomething\n{m}",
            m = statamcp::engine::BREAK_MARKER
        );
        let out = dedupe_break_markers(&input);
        assert_eq!(out.matches(statamcp::engine::BREAK_MARKER).count(), 2);
    }

    #[tokio::test]
    async fn execute_loop_runs_one_command_and_replies() {
        let engine = build_engine();
        let state = Arc::new(WorkerState::new());
        let stdout = Arc::new(Mutex::new(tokio::io::stdout()));
        let temp_dir = std::env::temp_dir();

        #[cfg(feature = "reference-engine")]
        {
            let cmd = Command::new(
                "cmd-1",
                CommandPayload::Execute {
                    code: "display \"hi\"".to_string(),
                    timeout: 5.0,
                },
            );
            let mut buf = Vec::new();
            ipc::write_message(&mut buf, &cmd).await.unwrap();
            let reader = BufReader::new(buf.as_slice());
            run_command_loop(reader, &stdout, &state, engine.as_ref(), &temp_dir, 1).await;
        }
    }
}
