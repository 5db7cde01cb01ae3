// Unified Microsoft MCP Server - Main Entry Point
//
// Serves two tools over MCP stdio:
// - execute_azure_cli_command: sanitized Azure CLI execution
// - graph_command: Microsoft Graph API calls
//
// stdout carries protocol frames only; all logging goes to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use unified_mcp::mcp::McpServer;
use unified_mcp::settings::Settings;

/// Unified Azure CLI + Microsoft Graph MCP server
#[derive(Parser, Debug)]
#[command(name = "unified-mcp")]
#[command(version)]
#[command(about = "MCP server for Azure CLI and Microsoft Graph", long_about = None)]
struct Args {
    /// Enable verbose logging (overrides LOG_LEVEL)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::from_env().context("failed to resolve settings")?;

    let default_level = if args.verbose {
        "debug".to_string()
    } else {
        settings.log_level.clone()
    };
    // stdout is the protocol channel; logs must go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .parse_lossy(format!("unified_mcp={default_level},info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting unified Microsoft MCP server");
    settings.log_summary();

    let server = McpServer::new(Arc::new(settings));
    server.serve_stdio().await
}
