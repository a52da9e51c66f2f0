//! Integration tests for the MCP server tools via duplex transport.
//!
//! Uses `tokio::io::duplex` to create an in-process transport, connects a
//! test client to the statamcp server, and exercises the tool surface
//! through the actual MCP protocol.

use rmcp::model::*;
use rmcp::{ClientHandler, ServiceExt};
use serde_json::Value;
use statamcp::config::Config;
use statamcp::server::StataBridgeServer;

/// Minimal test client that implements ClientHandler with defaults.
#[derive(Default, Clone)]
struct TestClient;

impl ClientHandler for TestClient {}

fn test_config() -> Config {
    let mut config = Config::default();
    config.max_sessions = 4;
    config.worker_start_timeout = 10;
    config.command_timeout = 10;
    config
}

/// Helper: start a server+client pair connected via duplex transport.
async fn setup() -> rmcp::service::RunningService<
    rmcp::service::RoleClient,
    impl rmcp::service::Service<rmcp::service::RoleClient>,
> {
    std::env::set_var("STATAMCP_WORKER_BIN", env!("CARGO_BIN_EXE_statamcp-worker"));

    let (server_transport, client_transport) = tokio::io::duplex(65536);

    let server = StataBridgeServer::new(test_config());
    server.start().await.unwrap();
    tokio::spawn(async move {
        let service = server.serve(server_transport).await.unwrap();
        let _ = service.waiting().await;
    });

    let client = TestClient::default();
    client.serve(client_transport).await.unwrap()
}

/// Helper: call a tool and parse the JSON text content from the response.
async fn call_tool(
    client: &rmcp::service::RunningService<
        rmcp::service::RoleClient,
        impl rmcp::service::Service<rmcp::service::RoleClient>,
    >,
    name: &str,
    args: Value,
) -> Value {
    let params = CallToolRequestParams {
        meta: None,
        name: name.to_string().into(),
        arguments: Some(serde_json::from_value(args).unwrap()),
        task: None,
    };
    let request = ClientRequest::CallToolRequest(Request::new(params));
    let response = client.send_request(request).await.unwrap();

    let ServerResult::CallToolResult(result) = response else {
        panic!("expected CallToolResult, got {response:?}");
    };

    let text = result
        .content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
}

// ---------------------------------------------------------------------------
// run_selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_run_selection_hello_world() {
    let client = setup().await;
    let result = call_tool(
        &client,
        "run_selection",
        serde_json::json!({"selection": "display \"hello world\""}),
    )
    .await;

    assert_eq!(result["status"], "success");
    assert_eq!(result["session_id"], "default");
    assert!(result["output"].as_str().unwrap().contains("hello world"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_run_selection_targets_named_session() {
    let client = setup().await;

    call_tool(
        &client,
        "create_session",
        serde_json::json!({"session_id": "named"}),
    )
    .await;

    let result = call_tool(
        &client,
        "run_selection",
        serde_json::json!({"selection": "display \"hi\"", "session_id": "named"}),
    )
    .await;

    assert_eq!(result["session_id"], "named");
    assert_eq!(result["status"], "success");

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// create_session / list_sessions / destroy_session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_and_list_sessions() {
    let client = setup().await;

    let created = call_tool(
        &client,
        "create_session",
        serde_json::json!({"session_id": "s1"}),
    )
    .await;
    assert_eq!(created["created"], true);
    assert_eq!(created["session_id"], "s1");

    let list = call_tool(&client, "list_sessions", serde_json::json!({})).await;
    let entries = list.as_array().unwrap();
    let ids: Vec<&str> = entries
        .iter()
        .filter_map(|e| e["session_id"].as_str())
        .collect();
    assert!(ids.contains(&"default"));
    assert!(ids.contains(&"s1"));

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_destroy_session_refuses_default() {
    let client = setup().await;

    let result = call_tool(
        &client,
        "destroy_session",
        serde_json::json!({"session_id": "default"}),
    )
    .await;

    let text = result.as_str().unwrap_or("");
    assert!(
        text.contains("default"),
        "expected a default-session-protected error, got: {result}"
    );

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_destroy_session_removes_named_session() {
    let client = setup().await;

    call_tool(
        &client,
        "create_session",
        serde_json::json!({"session_id": "throwaway"}),
    )
    .await;

    let result = call_tool(
        &client,
        "destroy_session",
        serde_json::json!({"session_id": "throwaway"}),
    )
    .await;
    assert_eq!(result["destroyed"], true);

    let status = call_tool(
        &client,
        "get_status",
        serde_json::json!({"session_id": "throwaway"}),
    )
    .await;
    let text = status.as_str().unwrap_or("");
    assert!(text.contains("not found"));

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// stop_execution / get_status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_execution_on_idle_session() {
    let client = setup().await;

    let result = call_tool(&client, "stop_execution", serde_json::json!({})).await;
    assert_eq!(result["status"], "not_running");

    client.cancel().await.unwrap();
}

#[tokio::test]
async fn test_get_status_reports_default_session() {
    let client = setup().await;

    let status = call_tool(&client, "get_status", serde_json::json!({})).await;
    assert_eq!(status["session_id"], "default");
    assert_eq!(status["state"], "ready");
    assert_eq!(status["is_default"], true);

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// get_data
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_get_data_returns_generated_columns() {
    let client = setup().await;

    call_tool(
        &client,
        "run_selection",
        serde_json::json!({"selection": "set obs 3\ngenerate x = _n"}),
    )
    .await;

    let data = call_tool(&client, "get_data", serde_json::json!({})).await;
    assert_eq!(data["total_rows"], 3);
    let columns = data["columns"].as_array().unwrap();
    assert!(columns.iter().any(|c| c == "x"));

    client.cancel().await.unwrap();
}

// ---------------------------------------------------------------------------
// health_check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_health_check_reports_healthy() {
    let client = setup().await;

    let health = call_tool(&client, "health_check", serde_json::json!({})).await;
    assert_eq!(health["healthy"], true);
    assert_eq!(health["default_session"]["state"], "ready");
    assert_eq!(health["stats"]["total_sessions"], 1);

    client.cancel().await.unwrap();
}
