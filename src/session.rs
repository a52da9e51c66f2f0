//! Session registry, request router, admission controller.
//!
//! Grounded on `original_source/src/session_manager.py` for the routing
//! algorithm, admission arithmetic, idle-reclaim loop, and the result-queue
//! command-id-filtering wait loop with its `timeout + 5.0s` deadline. The
//! registry itself is an `Arc<Mutex<HashMap<...>>>` with a small
//! `create_session`/`execute`/`list_sessions`/`destroy_session` method
//! surface over it.

use crate::config::Config;
use crate::error::{SessionError, WorkerError};
use crate::ipc::{Command, CommandPayload, DataSnapshot, ResultExtra, ResultStatus, WorkerResult};
use crate::script_rewriter;
use crate::worker::WorkerHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// The implicit session every manager creates at `start()`.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Creating,
    Ready,
    Busy,
    Error,
    Destroying,
    Destroyed,
}

/// One registry entry: a logical session paired with its worker.
struct Session {
    state: SessionState,
    worker: Option<Arc<WorkerHandle>>,
    created_at: Instant,
    last_activity: Instant,
    current_command_id: Option<String>,
    is_default: bool,
    error_message: Option<String>,
}

impl Session {
    fn creating(is_default: bool) -> Self {
        let now = Instant::now();
        Self {
            state: SessionState::Creating,
            worker: None,
            created_at: now,
            last_activity: now,
            current_command_id: None,
            is_default,
            error_message: None,
        }
    }
}

/// Read-only snapshot of a `Session`, safe to hand out past the registry
/// lock (`list_sessions`/`get_stats`).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: SessionState,
    pub is_default: bool,
    pub age_seconds: f64,
    pub idle_seconds: f64,
    pub current_command_id: Option<String>,
    pub error_message: Option<String>,
}

/// Registry-wide counters (`get_stats`).
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub available_slots: usize,
}

/// Result of an `execute`/`execute_file`/`get_data` call, carrying the
/// session id actually used so a caller can observe spillover
/// (`run_file`'s "result includes the session id actually used").
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResult {
    pub session_id: String,
    pub status: ResultStatus,
    pub output: String,
    pub error: Option<String>,
    pub execution_time: f64,
    pub extra: ResultExtra,
}

impl ExecuteResult {
    fn from_worker_result(session_id: String, result: WorkerResult) -> Self {
        Self {
            session_id,
            status: result.status,
            output: result.output,
            error: result.error,
            execution_time: result.execution_time,
            extra: result.extra,
        }
    }
}

struct Registry {
    sessions: HashMap<String, Session>,
}

/// Registry of sessions, request router, admission controller, health
/// monitor. Cheap to clone: internally `Arc`-backed, so the MCP
/// server can hold a handle to it alongside its `ToolRouter`.
#[derive(Clone)]
pub struct SessionManager {
    registry: Arc<Mutex<Registry>>,
    config: Config,
}

/// Outcome of the routing algorithm.
enum Route {
    Use { session_id: String, worker: Arc<WorkerHandle> },
    Spillover,
    AutoCreate,
    Terminal(Option<String>),
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                sessions: HashMap::new(),
            })),
            config,
        }
    }

    /// Initialize the registry: create the default session and start the
    /// idle-reclaim background task. A no-op when `config.enabled` is false
    /// (`enabled`).
    pub async fn start(&self) -> Result<(), SessionError> {
        if !self.config.enabled {
            tracing::info!("session manager disabled (enabled=false); no workers will be created");
            return Ok(());
        }

        let (ok, id, reason) = self
            .create_session_internal(Some(DEFAULT_SESSION_ID.to_string()))
            .await?;
        if !ok {
            return Err(SessionError::Worker(WorkerError::InitFailed(
                reason.unwrap_or_else(|| "default session failed to initialize".to_string()),
            )));
        }
        debug_assert_eq!(id, DEFAULT_SESSION_ID);

        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                manager.reclaim_idle_sessions().await;
            }
        });

        Ok(())
    }

    /// Create a session, generating an id if none is given. Returns
    /// `(success, id, failure_reason)`; on init failure `id` is empty, per
    ///  "create_session returns (false, "", reason)".
    pub async fn create_session(
        &self,
        session_id: Option<String>,
    ) -> Result<(bool, String, Option<String>), SessionError> {
        self.create_session_internal(session_id).await
    }

    async fn create_session_internal(
        &self,
        session_id: Option<String>,
    ) -> Result<(bool, String, Option<String>), SessionError> {
        let id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        if !is_valid_session_id(&id) {
            return Err(SessionError::InvalidSessionId(id));
        }
        let is_default = id == DEFAULT_SESSION_ID;

        {
            let mut reg = self.registry.lock().await;
            if reg.sessions.contains_key(&id) {
                return Err(SessionError::Terminal(
                    id.clone(),
                    "a session with this id already exists".to_string(),
                ));
            }
            let active = active_count(&reg.sessions);
            if active >= self.config.max_sessions {
                return Err(SessionError::AdmissionDenied {
                    active,
                    max: self.config.max_sessions,
                });
            }
            reg.sessions.insert(id.clone(), Session::creating(is_default));
        } // registry lock released before the IPC wait below

        let spawn_result = WorkerHandle::spawn(
            &id,
            self.config.engine_install_path.as_deref(),
            &self.config.engine_edition,
            Duration::from_secs(self.config.worker_start_timeout),
        )
        .await;

        let mut reg = self.registry.lock().await;
        match spawn_result {
            Ok((handle, init_result)) if init_result.status != ResultStatus::InitFailed => {
                if let Some(session) = reg.sessions.get_mut(&id) {
                    session.worker = Some(Arc::new(handle));
                    session.state = SessionState::Ready;
                    session.last_activity = Instant::now();
                }
                Ok((true, id, None))
            }
            Ok((_, init_result)) => {
                let reason = init_result
                    .error
                    .unwrap_or_else(|| "worker reported init_failed".to_string());
                if let Some(session) = reg.sessions.get_mut(&id) {
                    session.state = SessionState::Error;
                    session.error_message = Some(reason.clone());
                }
                Ok((false, String::new(), Some(reason)))
            }
            Err(e) => {
                let reason = e.to_string();
                if let Some(session) = reg.sessions.get_mut(&id) {
                    session.state = SessionState::Error;
                    session.error_message = Some(reason.clone());
                }
                Ok((false, String::new(), Some(reason)))
            }
        }
    }

    /// Destroy a session. Refuses the default session unless `force`.
    /// Graceful (`EXIT`, join up to 5s) then hard (`SIGKILL`, 2s more).
    pub async fn destroy_session(&self, id: &str, force: bool) -> Result<(), SessionError> {
        let (is_default, worker) = {
            let reg = self.registry.lock().await;
            let session = reg
                .sessions
                .get(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            (session.is_default, session.worker.clone())
        };

        if is_default && !force {
            return Err(SessionError::DefaultSessionProtected);
        }

        {
            let mut reg = self.registry.lock().await;
            if let Some(session) = reg.sessions.get_mut(id) {
                session.state = SessionState::Destroying;
            }
        }

        if let Some(worker) = worker {
            let exit_cmd = Command::new(Uuid::new_v4().to_string(), CommandPayload::Exit);
            let _ = worker.send_command(&exit_cmd).await;
            if !worker.wait_for_exit(Duration::from_secs(5)).await {
                let _ = tokio::time::timeout(Duration::from_secs(2), worker.hard_kill()).await;
            }
        }

        let mut reg = self.registry.lock().await;
        reg.sessions.remove(id);
        Ok(())
    }

    /// `None` id means the default session (`get_session`).
    pub async fn get_session(&self, id: Option<&str>) -> Option<SessionSnapshot> {
        let id = id.unwrap_or(DEFAULT_SESSION_ID);
        let reg = self.registry.lock().await;
        reg.sessions.get(id).map(|s| snapshot(id, s))
    }

    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let reg = self.registry.lock().await;
        reg.sessions
            .iter()
            .map(|(id, s)| snapshot(id, s))
            .collect()
    }

    pub async fn get_stats(&self) -> SessionStats {
        let reg = self.registry.lock().await;
        let active = active_count(&reg.sessions);
        SessionStats {
            total_sessions: reg.sessions.len(),
            active_sessions: active,
            max_sessions: self.config.max_sessions,
            available_slots: self.config.max_sessions.saturating_sub(active),
        }
    }

    /// Run an ad hoc code selection (`EXECUTE`, the `run_selection` tool).
    pub async fn execute(
        &self,
        code: &str,
        session_id: Option<&str>,
        timeout: Option<f64>,
    ) -> Result<ExecuteResult, SessionError> {
        let timeout_secs = self.config.resolve_command_timeout_secs(timeout);
        let (used_id, worker) = self.route_for_execution(session_id).await?;

        // Ad hoc selections only get continuation-joining and cls
        // neutralization; log-wrapping is EXECUTE_FILE-only.
        let joined = script_rewriter::join_continuation_lines(code);
        let neutralized = script_rewriter::neutralize_clear_directives(&joined);

        let command_id = Uuid::new_v4().to_string();
        let command = Command::new(
            command_id.clone(),
            CommandPayload::Execute {
                code: neutralized,
                timeout: timeout_secs,
            },
        );

        self.mark_in_flight(&used_id, &command_id).await;
        let result = self.send_and_await(&worker, &command, timeout_secs).await;
        self.finish_execution(&used_id, &result).await;
        Ok(ExecuteResult::from_worker_result(used_id, result))
    }

    /// Run a file (`EXECUTE_FILE`, the `run_file` tool).
    pub async fn execute_file(
        &self,
        file_path: &str,
        session_id: Option<&str>,
        timeout: Option<f64>,
        log_file: Option<String>,
        working_dir: Option<String>,
    ) -> Result<ExecuteResult, SessionError> {
        let timeout_secs = self.config.resolve_command_timeout_secs(timeout);
        let (used_id, worker) = self.route_for_execution(session_id).await?;

        let command_id = Uuid::new_v4().to_string();
        let command = Command::new(
            command_id.clone(),
            CommandPayload::ExecuteFile {
                file_path: file_path.to_string(),
                timeout: timeout_secs,
                log_file,
                working_dir,
            },
        );

        self.mark_in_flight(&used_id, &command_id).await;
        let result = self.send_and_await(&worker, &command, timeout_secs).await;
        self.finish_execution(&used_id, &result).await;
        Ok(ExecuteResult::from_worker_result(used_id, result))
    }

    /// Columnar dataset snapshot (`GET_DATA`). `max_rows` below
    /// 100 is clamped up (boundary behavior).
    pub async fn get_data(
        &self,
        session_id: Option<&str>,
        if_condition: Option<&str>,
        max_rows: usize,
        timeout: Option<f64>,
    ) -> Result<DataSnapshot, SessionError> {
        let max_rows = max_rows.max(100);
        let timeout_secs = self.config.resolve_command_timeout_secs(timeout);
        let (used_id, worker) = self.route_for_execution(session_id).await?;

        let command_id = Uuid::new_v4().to_string();
        let command = Command::new(
            command_id.clone(),
            CommandPayload::GetData {
                if_condition: if_condition.map(str::to_string),
                max_rows,
            },
        );

        self.mark_in_flight(&used_id, &command_id).await;
        let result = self.send_and_await(&worker, &command, timeout_secs).await;
        self.finish_execution(&used_id, &result).await;

        match result.status {
            ResultStatus::Success => result
                .extra
                .data
                .ok_or_else(|| SessionError::Engine("worker returned no data snapshot".to_string())),
            _ => Err(SessionError::Engine(
                result
                    .error
                    .unwrap_or_else(|| format!("get_data failed with status {:?}", result.status)),
            )),
        }
    }

    /// Signal a worker's stop flag out of band, regardless of the session's
    /// currently-observed state (`stop_execution`: a streaming job
    /// may not yet have flipped the session to BUSY). Never blocks more than
    /// 2s; never itself reads the result stream, since that stream belongs
    /// to whichever `execute*` call (if any) is currently waiting on it --
    /// the worker's `_stop` result is out-of-band noise that waiter's own
    /// command-id filter will discard.
    pub async fn stop_execution(&self, session_id: Option<&str>) -> Result<&'static str, SessionError> {
        let target = session_id.unwrap_or(DEFAULT_SESSION_ID).to_string();
        let (worker, was_busy) = {
            let reg = self.registry.lock().await;
            let session = reg
                .sessions
                .get(&target)
                .ok_or_else(|| SessionError::NotFound(target.clone()))?;
            (session.worker.clone(), session.state == SessionState::Busy)
        };

        let Some(worker) = worker else {
            return Ok("not_running");
        };

        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            if worker.signal_stop().is_err() {
                // Fallback: on-queue STOP command. Fire-and-forget
                // for the same reason we never read the result stream here.
                let command = Command::new(Uuid::new_v4().to_string(), CommandPayload::StopExecution);
                let _ = worker.send_command(&command).await;
            }
        })
        .await;

        Ok(if was_busy { "stop_sent" } else { "not_running" })
    }

    /// Routing algorithm: direct use, auto-create,
    /// spillover, or terminal-state error.
    async fn route_for_execution(
        &self,
        session_id: Option<&str>,
    ) -> Result<(String, Arc<WorkerHandle>), SessionError> {
        let target = session_id.unwrap_or(DEFAULT_SESSION_ID).to_string();

        loop {
            let decision = {
                let mut reg = self.registry.lock().await;
                match reg.sessions.get(&target).map(|s| s.state) {
                    Some(SessionState::Ready) => {
                        let session = reg
                            .sessions
                            .get_mut(&target)
                            .expect("just matched Some above");
                        let worker = session
                            .worker
                            .clone()
                            .expect("a session in state Ready always has a worker (invariant)");
                        session.state = SessionState::Busy;
                        Route::Use {
                            session_id: target.clone(),
                            worker,
                        }
                    }
                    Some(SessionState::Busy) => Route::Spillover,
                    Some(_) => Route::Terminal(
                        reg.sessions
                            .get(&target)
                            .and_then(|s| s.error_message.clone()),
                    ),
                    None if target != DEFAULT_SESSION_ID => Route::AutoCreate,
                    None => Route::Terminal(Some(
                        "default session does not exist; the manager was not started".to_string(),
                    )),
                }
            };

            match decision {
                Route::Use { session_id, worker } => return Ok((session_id, worker)),
                Route::Spillover => {
                    let (ok, new_id, reason) = self.create_session_internal(None).await?;
                    if !ok {
                        return Err(SessionError::Worker(WorkerError::InitFailed(
                            reason.unwrap_or_default(),
                        )));
                    }
                    let mut reg = self.registry.lock().await;
                    let worker = reg
                        .sessions
                        .get(&new_id)
                        .and_then(|s| s.worker.clone())
                        .ok_or_else(|| SessionError::NotFound(new_id.clone()))?;
                    if let Some(session) = reg.sessions.get_mut(&new_id) {
                        session.state = SessionState::Busy;
                    }
                    return Ok((new_id, worker));
                }
                Route::AutoCreate => {
                    let (ok, _new_id, reason) =
                        self.create_session_internal(Some(target.clone())).await?;
                    if !ok {
                        return Err(SessionError::Worker(WorkerError::InitFailed(
                            reason.unwrap_or_default(),
                        )));
                    }
                    // Loop again: the target now exists and is Ready.
                    continue;
                }
                Route::Terminal(message) => {
                    return Err(SessionError::Terminal(
                        target.clone(),
                        message.unwrap_or_else(|| {
                            "session is in a terminal or error state".to_string()
                        }),
                    ));
                }
            }
        }
    }

    /// Send one command and wait for its matching result, discarding any
    /// out-of-band results along the way.
    /// Deadline is `timeout + 5s` past the send.
    async fn send_and_await(
        &self,
        worker: &WorkerHandle,
        command: &Command,
        timeout_secs: f64,
    ) -> WorkerResult {
        if let Err(e) = worker.send_command(command).await {
            return WorkerResult::new(command.command_id.clone(), ResultStatus::Error)
                .with_error(format!("failed to send command: {e}"));
        }

        let deadline = Duration::from_secs_f64(timeout_secs + 5.0);
        let start = Instant::now();

        loop {
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return WorkerResult::new(command.command_id.clone(), ResultStatus::Timeout)
                    .with_error("timed out waiting for a matching result");
            }

            match tokio::time::timeout(remaining, worker.recv_result()).await {
                Ok(Ok(Some(result))) if result.command_id == command.command_id => return result,
                // Stale or out-of-band result (`_stop`, a prior cancelled
                // command's reply): discard and keep waiting.
                Ok(Ok(Some(_))) => continue,
                Ok(Ok(None)) => {
                    return WorkerResult::new(command.command_id.clone(), ResultStatus::Error)
                        .with_error("worker closed its output stream (process likely exited)");
                }
                Ok(Err(e)) => {
                    return WorkerResult::new(command.command_id.clone(), ResultStatus::Error)
                        .with_error(e.to_string());
                }
                Err(_) => {
                    return WorkerResult::new(command.command_id.clone(), ResultStatus::Timeout)
                        .with_error("timed out waiting for a matching result");
                }
            }
        }
    }

    /// Record the id of the command about to run in `session_id`, so the
    /// `state = BUSY ⇔ current_command_id ≠ none` invariant holds for the
    /// whole lifetime of the in-flight command, not just at routing time.
    async fn mark_in_flight(&self, session_id: &str, command_id: &str) {
        let mut reg = self.registry.lock().await;
        if let Some(session) = reg.sessions.get_mut(session_id) {
            session.current_command_id = Some(command_id.to_string());
        }
    }

    /// Reset a session back to READY after a command completes, or to ERROR
    /// if the worker appears to have died mid-command.
    async fn finish_execution(&self, session_id: &str, result: &WorkerResult) {
        let mut reg = self.registry.lock().await;
        let Some(session) = reg.sessions.get_mut(session_id) else {
            return;
        };
        session.last_activity = Instant::now();
        session.current_command_id = None;
        session.state = if result.status == ResultStatus::Error
            && result
                .error
                .as_deref()
                .is_some_and(|e| e.contains("worker closed its output stream"))
        {
            session.error_message = Some("Worker process died".to_string());
            SessionState::Error
        } else {
            SessionState::Ready
        };
    }

    /// Idle-reclaim pass: destroy timed-out non-default READY
    /// sessions, and mark any session whose worker has died as ERROR.
    async fn reclaim_idle_sessions(&self) {
        let timed_out: Vec<String> = {
            let reg = self.registry.lock().await;
            reg.sessions
                .iter()
                .filter(|(_, s)| {
                    !s.is_default
                        && s.state == SessionState::Ready
                        && s.last_activity.elapsed() > Duration::from_secs(self.config.session_timeout)
                })
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in timed_out {
            tracing::info!(session_id = %id, "idle-reclaiming session");
            let _ = self.destroy_session(&id, false).await;
        }

        let live_candidates: Vec<(String, Arc<WorkerHandle>)> = {
            let reg = self.registry.lock().await;
            reg.sessions
                .iter()
                .filter(|(_, s)| matches!(s.state, SessionState::Ready | SessionState::Busy))
                .filter_map(|(id, s)| s.worker.clone().map(|w| (id.clone(), w)))
                .collect()
        };
        for (id, worker) in live_candidates {
            if !worker.is_alive().await {
                tracing::warn!(session_id = %id, "worker process died, marking session ERROR");
                let mut reg = self.registry.lock().await;
                if let Some(session) = reg.sessions.get_mut(&id) {
                    session.state = SessionState::Error;
                    session.error_message = Some("Worker process died".to_string());
                }
            }
        }
    }
}

/// A session id becomes a path segment (`worker::worker_temp_dir`, the
/// worker's own scratch directory and log file names), so it must not
/// contain path separators or `..` traversal components. Restricted to a
/// conservative safe set rather than denylisting `/`/`..`, since this id
/// also flows into shell-wrapped directives (`script_rewriter::wrap_for_execution`).
fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn active_count(sessions: &HashMap<String, Session>) -> usize {
    sessions
        .values()
        .filter(|s| {
            matches!(
                s.state,
                SessionState::Creating | SessionState::Ready | SessionState::Busy
            )
        })
        .count()
}

fn snapshot(id: &str, session: &Session) -> SessionSnapshot {
    SessionSnapshot {
        session_id: id.to_string(),
        state: session.state,
        is_default: session.is_default,
        age_seconds: session.created_at.elapsed().as_secs_f64(),
        idle_seconds: session.last_activity.elapsed().as_secs_f64(),
        current_command_id: session.current_command_id.clone(),
        error_message: session.error_message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.max_sessions = 4;
        config.worker_start_timeout = 5;
        config.command_timeout = 5;
        // Tests spawn the real `statamcp-worker` binary via
        // `STATAMCP_WORKER_BIN` (set by the test harness below), same
        // override `worker.rs::worker_binary_path` already supports.
        config
    }

    #[test]
    fn session_id_validation_rejects_path_traversal() {
        assert!(is_valid_session_id("default"));
        assert!(is_valid_session_id("fresh-one_2"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../../etc"));
        assert!(!is_valid_session_id("a/b"));
        assert!(!is_valid_session_id("a b"));
    }

    fn require_worker_bin() -> Option<()> {
        if std::env::var("STATAMCP_WORKER_BIN").is_ok() {
            Some(())
        } else {
            None
        }
    }

    #[tokio::test]
    async fn start_creates_default_session() {
        let Some(()) = require_worker_bin() else { return };
        let manager = SessionManager::new(test_config());
        manager.start().await.unwrap();
        let snapshot = manager.get_session(None).await.unwrap();
        assert_eq!(snapshot.session_id, DEFAULT_SESSION_ID);
        assert!(snapshot.is_default);
        assert_eq!(snapshot.state, SessionState::Ready);
    }

    #[tokio::test]
    async fn admission_cap_rejects_past_max_sessions() {
        let Some(()) = require_worker_bin() else { return };
        let mut config = test_config();
        config.max_sessions = 2;
        let manager = SessionManager::new(config);
        manager.start().await.unwrap(); // consumes 1 of 2 slots (default)

        let (ok, _id, _reason) = manager.create_session(None).await.unwrap();
        assert!(ok);

        let result = manager.create_session(None).await;
        assert!(matches!(
            result,
            Err(SessionError::AdmissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn stop_execution_on_idle_session_reports_not_running() {
        let Some(()) = require_worker_bin() else { return };
        let manager = SessionManager::new(test_config());
        manager.start().await.unwrap();
        let status = manager.stop_execution(None).await.unwrap();
        assert_eq!(status, "not_running");
    }

    #[tokio::test]
    async fn unknown_non_default_session_is_auto_created() {
        let Some(()) = require_worker_bin() else { return };
        let manager = SessionManager::new(test_config());
        manager.start().await.unwrap();
        let result = manager.execute("display \"hi\"", Some("fresh-one"), None).await.unwrap();
        assert_eq!(result.session_id, "fresh-one");
        assert_eq!(result.status, ResultStatus::Success);
    }
}
