//! hydrosync MCP server entry point.
//!
//! Boots the server on stdio transport. Logging goes to stderr so stdout
//! carries only JSON-RPC.

use anyhow::Result;
use hydrosync_core::AppConfig;
use hydrosync_server::{App, HydrosyncServer};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(
        db = %config.db_path.display(),
        hydro = %config.hydro_url,
        hydro2 = %config.hydro2_url,
        "Starting hydrosync server on stdio transport"
    );

    let app = App::from_config(config).await?;
    let server = serve_server(HydrosyncServer::new(app), stdio()).await?;

    server.waiting().await?;

    Ok(())
}
