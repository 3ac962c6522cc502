//! linkscope server entry point.
//!
//! Boots the MCP server on stdio transport. Logging goes to stderr to avoid
//! interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use linkscope_core::AppConfig;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod error;
mod handler;
mod present;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    let app = Arc::new(app::App::build(config).await?);
    let maintenance = app.start().await;

    tracing::info!("Starting linkscope server on stdio transport");

    let handler = handler::LinkscopeServer::new(app.clone());
    let server = serve_server(handler, stdio()).await?;

    tokio::select! {
        res = server.waiting() => { res?; }
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted, shutting down"),
    }

    app.shutdown(maintenance).await;
    tracing::info!("linkscope stopped");
    Ok(())
}
