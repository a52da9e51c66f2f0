//! Entry point for the statamcp MCP server.
//!
//! Initializes tracing (to stderr, so it doesn't interfere with MCP stdio
//! transport), loads configuration, starts the session manager (spawning the
//! default session's worker), and serves the MCP tool surface on stdin/stdout.

use anyhow::Result;
use rmcp::{ServiceExt, transport::stdio};
use statamcp::config::Config;
use statamcp::server::StataBridgeServer;
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is used for MCP JSON-RPC).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("starting statamcp server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load();
    let server = StataBridgeServer::new(config);
    server.start().await?;

    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    tracing::info!("statamcp server shut down");
    Ok(())
}
