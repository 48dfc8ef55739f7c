mod cli;
mod config_discovery;
mod response;
mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use rmcp::transport::io::stdio;
use rmcp::ServiceExt;
use tracing::info;

/// How often the main loop checks whether the detected runtime has gone
/// idle long enough to warrant forcing re-detection on next use.
const RUNTIME_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

use mcpbridge_core::bridge::Bridge;
use mcpbridge_core::config::BridgeConfig;
use mcpbridge_core::logging::init_logging;

use crate::cli::Cli;
use crate::service::BridgeService;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_to_file)?;

    let servers_path = cli
        .servers_file
        .unwrap_or_else(config_discovery::default_config_path);
    let servers = config_discovery::load(&servers_path)?;
    info!(
        path = %servers_path.display(),
        count = servers.len(),
        "loaded downstream server table"
    );

    let config = BridgeConfig::from_env();
    let bridge = Arc::new(Bridge::new(config, servers));

    let service = BridgeService::new(bridge.clone());
    let running = service.serve(stdio()).await?;

    let shutdown_bridge = bridge.clone();
    let waiting = running.waiting();
    tokio::pin!(waiting);
    let mut sweep = tokio::time::interval(RUNTIME_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            result = &mut waiting => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "mcp server loop exited with error");
                }
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
            _ = sweep.tick() => {
                bridge.sweep_idle_runtime().await;
            }
        }
    }

    shutdown_bridge.shutdown().await;
    Ok(())
}
