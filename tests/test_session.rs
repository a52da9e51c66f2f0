//! Integration tests for `SessionManager` against real `statamcp-worker`
//! child processes.
//!
//! Each test points `STATAMCP_WORKER_BIN` at the worker binary cargo built
//! for this test run (`CARGO_BIN_EXE_statamcp-worker`), the same override
//! `worker.rs::worker_binary_path` already supports, so no separate install
//! step is needed.

use statamcp::config::Config;
use statamcp::error::SessionError;
use statamcp::ipc::ResultStatus;
use statamcp::session::{SessionManager, SessionState};

fn test_config() -> Config {
    let mut config = Config::default();
    config.max_sessions = 4;
    config.worker_start_timeout = 10;
    config.command_timeout = 10;
    config
}

async fn manager() -> SessionManager {
    std::env::set_var("STATAMCP_WORKER_BIN", env!("CARGO_BIN_EXE_statamcp-worker"));
    let manager = SessionManager::new(test_config());
    manager.start().await.unwrap();
    manager
}

// ---------------------------------------------------------------------------
// S1: hello world against the default session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hello_world_runs_in_default_session() {
    let mgr = manager().await;
    let result = mgr.execute("display \"hello world\"", None, None).await.unwrap();
    assert_eq!(result.session_id, "default");
    assert_eq!(result.status, ResultStatus::Success);
    assert!(result.output.contains("hello world"));
}

// ---------------------------------------------------------------------------
// S2: per-session isolation -- two sessions never share dataset state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sessions_have_independent_datasets() {
    let mgr = manager().await;
    mgr.create_session(Some("alpha".to_string())).await.unwrap();
    mgr.create_session(Some("beta".to_string())).await.unwrap();

    mgr.execute("set obs 5\ngenerate x = _n", Some("alpha"), None)
        .await
        .unwrap();

    let alpha_count = mgr.execute("count", Some("alpha"), None).await.unwrap();
    assert!(alpha_count.output.contains('5'));

    let beta_count = mgr.execute("count", Some("beta"), None).await.unwrap();
    assert!(beta_count.output.trim_end().ends_with('0'));
}

// ---------------------------------------------------------------------------
// Auto-create: an unknown, non-default session id is created on first use
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_session_id_auto_creates() {
    let mgr = manager().await;
    let result = mgr.execute("display \"auto\"", Some("never-created"), None).await.unwrap();
    assert_eq!(result.session_id, "never-created");
    assert_eq!(result.status, ResultStatus::Success);

    let snapshot = mgr.get_session(Some("never-created")).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Ready);
}

// ---------------------------------------------------------------------------
// Spillover: a busy session's next caller gets a fresh session instead
// ---------------------------------------------------------------------------

#[tokio::test]
async fn busy_session_spills_over_to_a_fresh_session() {
    let mgr = manager().await;

    let busy_mgr = mgr.clone();
    let slow = tokio::spawn(async move { busy_mgr.execute("sleep 500", None, None).await });

    // Give the first call a moment to claim BUSY before routing the second.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let spilled = mgr.execute("display \"spilled\"", None, None).await.unwrap();
    assert_ne!(spilled.session_id, "default");
    assert_eq!(spilled.status, ResultStatus::Success);

    let original = slow.await.unwrap().unwrap();
    assert_eq!(original.session_id, "default");
    assert_eq!(original.status, ResultStatus::Success);
}

// ---------------------------------------------------------------------------
// S6: admission cap -- creating past max_sessions is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admission_cap_rejects_past_max_sessions() {
    let mut config = test_config();
    config.max_sessions = 2;
    std::env::set_var("STATAMCP_WORKER_BIN", env!("CARGO_BIN_EXE_statamcp-worker"));
    let mgr = SessionManager::new(config);
    mgr.start().await.unwrap(); // consumes 1 of 2 slots (default)

    let (ok, _id, _reason) = mgr.create_session(None).await.unwrap();
    assert!(ok);

    let result = mgr.create_session(None).await;
    assert!(matches!(result, Err(SessionError::AdmissionDenied { active: 2, max: 2 })));
}

// ---------------------------------------------------------------------------
// stop_execution: interrupts a long-running command and is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_execution_interrupts_a_sleep() {
    let mgr = manager().await;

    let exec_mgr = mgr.clone();
    let running = tokio::spawn(async move { exec_mgr.execute("sleep 10000", None, None).await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let status = mgr.stop_execution(None).await.unwrap();
    assert_eq!(status, "stop_sent");

    let result = running.await.unwrap().unwrap();
    assert!(matches!(result.status, ResultStatus::Cancelled | ResultStatus::Stopped));
}

#[tokio::test]
async fn stop_execution_on_idle_session_reports_not_running() {
    let mgr = manager().await;
    let status = mgr.stop_execution(None).await.unwrap();
    assert_eq!(status, "not_running");
}

// ---------------------------------------------------------------------------
// get_data: push-down filtered columnar snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_data_returns_generated_columns() {
    let mgr = manager().await;
    mgr.execute("set obs 3\ngenerate x = _n", None, None).await.unwrap();

    let snapshot = mgr.get_data(None, None, 100, None).await.unwrap();
    assert_eq!(snapshot.total_rows, 3);
    assert!(snapshot.columns.iter().any(|c| c == "x"));
}

// ---------------------------------------------------------------------------
// destroy_session: protects the default session, tears down others
// ---------------------------------------------------------------------------

#[tokio::test]
async fn destroy_session_refuses_default_without_force() {
    let mgr = manager().await;
    let result = mgr.destroy_session("default", false).await;
    assert!(matches!(result, Err(SessionError::DefaultSessionProtected)));
}

#[tokio::test]
async fn destroy_session_removes_a_named_session() {
    let mgr = manager().await;
    mgr.create_session(Some("throwaway".to_string())).await.unwrap();
    mgr.destroy_session("throwaway", false).await.unwrap();
    assert!(mgr.get_session(Some("throwaway")).await.is_none());
}

// ---------------------------------------------------------------------------
// list_sessions / get_stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_sessions_and_stats_reflect_the_registry() {
    let mgr = manager().await;
    mgr.create_session(Some("second".to_string())).await.unwrap();

    let sessions = mgr.list_sessions().await;
    let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert!(ids.contains(&"default"));
    assert!(ids.contains(&"second"));

    let stats = mgr.get_stats().await;
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.active_sessions, 2);
}
