//! MCP server: tool definitions using rmcp macros.
//!
//! Two LLM-facing tools (`run_selection`, `run_file`) plus supporting,
//! non-LLM-facing registry/inspection tools: create/list/destroy sessions,
//! stop execution, get execution status, get data frame, health check.
//! Follows the parameter-struct-per-tool convention, with
//! `#[tool_router]`/`#[tool_handler]` macros and shared `json_content`/
//! `err_result` helpers for building `CallToolResult`s.

use crate::config::Config;
use crate::session::{self, SessionManager};
use crate::streaming::{self, LogLevel, StreamSink};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::*;
use rmcp::schemars;
use rmcp::service::RequestContext;
use rmcp::tool;
use rmcp::tool_handler;
use rmcp::tool_router;
use rmcp::{ErrorData as McpError, Peer, RoleServer, ServerHandler};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default per-command deadline for `run_file` when the caller omits one.
const DEFAULT_RUN_FILE_TIMEOUT_SECS: f64 = 600.0;

// ---------------------------------------------------------------------------
// Parameter structs (deserialized from MCP tool call arguments)
// ---------------------------------------------------------------------------

/// Parameters for the `run_selection` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RunSelectionParams {
    /// The code to run.
    pub selection: String,
    /// Session to run in. Omit to use the default session; if the targeted
    /// session is busy, a fresh spillover session runs it instead and its
    /// id is reported in the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Directory to switch to before running the selection. Ad hoc
    /// selections otherwise leave the session's working directory
    /// unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Parameters for the `run_file` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct RunFileParams {
    /// Path to the script file to run.
    pub file_path: String,
    /// Maximum execution time in seconds. Defaults to 600.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Session to run in. Omit to use the default session; if the targeted
    /// session is busy, a fresh spillover session runs it instead and its
    /// id is reported in the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Working directory for the script. Defaults to the script's own
    /// directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Parameters for the `create_session` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct CreateSessionParams {
    /// Desired session id. Omit to generate one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Parameters for tools that target an existing session by id, where
/// omitting it means the default session (`stop_execution`, `get_status`).
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct SessionIdParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Parameters for the `destroy_session` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct DestroySessionParams {
    pub session_id: String,
    /// Destroy even if this is the default session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

/// Parameters for the `get_data` tool.
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct GetDataParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// An engine `if` expression used to filter rows before they're
    /// returned; filtering happens inside the engine, not after the fact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_condition: Option<String>,
    /// Maximum rows to return. Values below 100 are clamped up to 100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

// ---------------------------------------------------------------------------
// Streaming notification plumbing
// ---------------------------------------------------------------------------

/// Bridges the streaming executor's `StreamSink` abstraction onto a live
/// MCP request's `Peer`, so `run_file` emits real `notifications/progress`
/// and `notifications/message` traffic. Constructed fresh per `run_file`
/// call from that call's `RequestContext`.
struct PeerSink {
    peer: Peer<RoleServer>,
    progress_token: Option<ProgressToken>,
    min_level: LogLevel,
}

#[async_trait::async_trait]
impl StreamSink for PeerSink {
    async fn progress(&self, elapsed_secs: f64, total_secs: f64, message: &str) {
        let Some(token) = self.progress_token.clone() else {
            return;
        };
        let _ = self
            .peer
            .notify_progress(ProgressNotificationParam {
                progress_token: token,
                progress: elapsed_secs,
                total: Some(total_secs),
                message: Some(message.to_string()),
            })
            .await;
    }

    async fn log(&self, level: LogLevel, data: &str) {
        if level < self.min_level {
            return;
        }
        let _ = self
            .peer
            .notify_logging_message(LoggingMessageNotificationParam {
                level: to_rmcp_level(level),
                logger: Some("statamcp".to_string()),
                data: serde_json::Value::String(data.to_string()),
            })
            .await;
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

fn to_rmcp_level(level: LogLevel) -> LoggingLevel {
    match level {
        LogLevel::Debug => LoggingLevel::Debug,
        LogLevel::Info => LoggingLevel::Info,
        LogLevel::Notice => LoggingLevel::Notice,
        LogLevel::Warning => LoggingLevel::Warning,
        LogLevel::Error => LoggingLevel::Error,
    }
}

fn from_rmcp_level(level: LoggingLevel) -> LogLevel {
    match level {
        LoggingLevel::Debug => LogLevel::Debug,
        LoggingLevel::Info => LogLevel::Info,
        LoggingLevel::Notice => LogLevel::Notice,
        LoggingLevel::Warning => LogLevel::Warning,
        // MCP's syslog-derived level set has three levels above `error`
        // that this core's own five-band `LogLevel` collapses into `Error`.
        _ => LogLevel::Error,
    }
}

fn level_from_u8(v: u8) -> LogLevel {
    match v {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Notice,
        3 => LogLevel::Warning,
        _ => LogLevel::Error,
    }
}

// ---------------------------------------------------------------------------
// MCP Server
// ---------------------------------------------------------------------------

fn json_content<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("JSON serialization error: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn err_result(msg: impl Into<String>) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.into())]))
}

/// The session orchestration core's MCP server.
#[derive(Clone)]
pub struct StataBridgeServer {
    sessions: SessionManager,
    /// Global `logging/setLevel` threshold: one server-wide level rather
    /// than a per-session one, since the MCP `logging/setLevel` request
    /// itself carries no session id.
    min_log_level: Arc<AtomicU8>,
    tool_router: ToolRouter<StataBridgeServer>,
}

impl StataBridgeServer {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            sessions: SessionManager::new(config),
            min_log_level: Arc::new(AtomicU8::new(LogLevel::Notice as u8)),
            tool_router: Self::tool_router(),
        }
    }

    /// Create the default session and start idle reclaim. Must be called
    /// once before serving (`start()`).
    pub async fn start(&self) -> Result<(), crate::error::SessionError> {
        self.sessions.start().await
    }
}

#[tool_router]
impl StataBridgeServer {
    #[tool(
        description = "Run a code selection in an engine session and return its output. Omit session_id to use the default session. If the targeted session is busy, a fresh spillover session runs the code instead -- the result's session_id reports whichever session actually ran it."
    )]
    async fn run_selection(
        &self,
        Parameters(params): Parameters<RunSelectionParams>,
    ) -> Result<CallToolResult, McpError> {
        let code = match &params.working_dir {
            Some(dir) => format!("cd \"{dir}\"\n{}", params.selection),
            None => params.selection,
        };

        tracing::info!(session_id = ?params.session_id, "run_selection");
        match self.sessions.execute(&code, params.session_id.as_deref(), None).await {
            Ok(result) => json_content(&result),
            Err(e) => err_result(e.as_user_message()),
        }
    }

    #[tool(
        description = "Run a script file, streaming progress and log notifications while it executes, and return its final output. Omit session_id to use the default session; a busy session spills over to a fresh one whose id is reported in the result. Cancelling the tool call interrupts the engine."
    )]
    async fn run_file(
        &self,
        Parameters(params): Parameters<RunFileParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let timeout = params.timeout.filter(|t| *t > 0.0).unwrap_or(DEFAULT_RUN_FILE_TIMEOUT_SECS);

        let sink = PeerSink {
            peer: context.peer.clone(),
            progress_token: context.meta.get_progress_token(),
            min_level: level_from_u8(self.min_log_level.load(Ordering::SeqCst)),
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let log_path = std::env::temp_dir().join(format!("statamcp-runfile-{request_id}.log"));
        let log_path_str = log_path.to_string_lossy().into_owned();

        tracing::info!(session_id = ?params.session_id, file_path = %params.file_path, "run_file");

        let sessions = self.sessions.clone();
        let file_path = params.file_path.clone();
        let session_id = params.session_id.clone();
        let working_dir = params.working_dir.clone();
        let started = Instant::now();
        let exec_fut = async move {
            sessions
                .execute_file(
                    &file_path,
                    session_id.as_deref(),
                    Some(timeout),
                    Some(log_path_str),
                    working_dir,
                )
                .await
        };
        let streamed = streaming::run_streamed(&sink, Some(log_path.as_path()), started, timeout, exec_fut);

        let cancel_sessions = self.sessions.clone();
        let cancel_session_id = params.session_id.clone();
        tokio::select! {
            result = streamed => match result {
                Ok(result) => json_content(&result),
                Err(e) => err_result(e.as_user_message()),
            },
            () = context.ct.cancelled() => {
                let _ = cancel_sessions.stop_execution(cancel_session_id.as_deref()).await;
                err_result("run_file was cancelled; the engine has been signalled to stop")
            }
        }
    }

    #[tool(description = "Create a new session, optionally with a specific id. Omit session_id to generate one.")]
    async fn create_session(
        &self,
        Parameters(params): Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session_id = ?params.session_id, "create_session");
        match self.sessions.create_session(params.session_id).await {
            Ok((true, id, _)) => json_content(&serde_json::json!({"created": true, "session_id": id})),
            Ok((false, _, reason)) => {
                err_result(reason.unwrap_or_else(|| "failed to create session".to_string()))
            }
            Err(e) => err_result(e.as_user_message()),
        }
    }

    #[tool(description = "List every session in the registry with its state, age, idle time, and any in-flight command id.")]
    async fn list_sessions(&self) -> Result<CallToolResult, McpError> {
        json_content(&self.sessions.list_sessions().await)
    }

    #[tool(
        description = "Destroy a session: gracefully asks its worker to exit, force-killing it if that takes too long. Refuses the default session unless force=true."
    )]
    async fn destroy_session(
        &self,
        Parameters(params): Parameters<DestroySessionParams>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(session_id = %params.session_id, force = ?params.force, "destroy_session");
        match self
            .sessions
            .destroy_session(&params.session_id, params.force.unwrap_or(false))
            .await
        {
            Ok(()) => json_content(&serde_json::json!({"session_id": params.session_id, "destroyed": true})),
            Err(e) => err_result(e.as_user_message()),
        }
    }

    #[tool(
        description = "Request interruption of whatever is currently executing in a session. Idempotent: stopping an idle session reports not_running and changes nothing."
    )]
    async fn stop_execution(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let session_id = params.session_id.unwrap_or_else(|| session::DEFAULT_SESSION_ID.to_string());
        tracing::info!(session_id = %session_id, "stop_execution");
        match self.sessions.stop_execution(Some(&session_id)).await {
            Ok(status) => json_content(&serde_json::json!({"session_id": session_id, "status": status})),
            Err(e) => err_result(e.as_user_message()),
        }
    }

    #[tool(description = "Return a snapshot of one session's state: whether it's ready/busy/in error, its age, idle time, and any in-flight command id. Omit session_id for the default session.")]
    async fn get_status(
        &self,
        Parameters(params): Parameters<SessionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.sessions.get_session(params.session_id.as_deref()).await {
            Some(snapshot) => json_content(&snapshot),
            None => err_result(format!(
                "session '{}' not found",
                params.session_id.unwrap_or_else(|| session::DEFAULT_SESSION_ID.to_string())
            )),
        }
    }

    #[tool(
        description = "Return a columnar snapshot of the current in-memory dataset in a session, optionally filtered by an engine `if` expression. Filtering happens inside the engine, not after retrieval, so it never materializes the full dataset. Omit session_id for the default session."
    )]
    async fn get_data(
        &self,
        Parameters(params): Parameters<GetDataParams>,
    ) -> Result<CallToolResult, McpError> {
        let max_rows = params.max_rows.unwrap_or(100);
        match self
            .sessions
            .get_data(params.session_id.as_deref(), params.if_condition.as_deref(), max_rows, None)
            .await
        {
            Ok(snapshot) => json_content(&snapshot),
            Err(e) => err_result(e.as_user_message()),
        }
    }

    #[tool(description = "Report whether the orchestration core is healthy: the default session's state plus registry-wide admission stats.")]
    async fn health_check(&self) -> Result<CallToolResult, McpError> {
        let stats = self.sessions.get_stats().await;
        let default_session = self.sessions.get_session(None).await;
        let healthy = default_session
            .as_ref()
            .map(|s| s.state == session::SessionState::Ready)
            .unwrap_or(false);
        json_content(&serde_json::json!({
            "healthy": healthy,
            "default_session": default_session,
            "stats": stats,
        }))
    }
}

#[tool_handler]
impl ServerHandler for StataBridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_logging()
                .build(),
            server_info: Implementation {
                name: "statamcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "statamcp bridges AI agents to an isolated, per-session statistical engine. \
                 Use run_selection for short ad hoc code and run_file to execute a whole script \
                 with streamed progress. Sessions preserve engine state (datasets, variables, \
                 loaded programs) across calls -- pass the same session_id to continue working \
                 in the same session, or omit it to use the default session. If a session is \
                 busy, the next call against it automatically spills over into a new session and \
                 reports that session's id in the result, so concurrent requests never block on \
                 each other. stop_execution interrupts whatever a session is currently running."
                    .to_string(),
            ),
        }
    }

    async fn set_level(
        &self,
        request: SetLevelRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<(), McpError> {
        self.min_log_level
            .store(from_rmcp_level(request.level) as u8, Ordering::SeqCst);
        Ok(())
    }
}
