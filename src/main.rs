//! `mcp-fleet [config-path]` — run a fleet of MCP servers until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use mcp_fleet::{logging, ConfigSource, ServerManager};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let source = match std::env::args_os().nth(1) {
        Some(path) => ConfigSource::Files(vec![PathBuf::from(path)]),
        None => ConfigSource::default_candidates(),
    };

    // Settings drive logging, so read them before the subscriber exists.
    let config = source.load().context("failed to load configuration")?;
    logging::init_tracing(&config.settings).context("failed to initialize logging")?;

    let manager = ServerManager::new(source);

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "{}", event.name()),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    manager
        .initialize()
        .await
        .context("failed to initialize fleet")?;

    for status in manager.get_all_server_statuses() {
        tracing::info!(
            server = %status.id,
            status = %status.status,
            tools = status.tools,
            resources = status.resources,
            prompts = status.prompts,
            pid = ?status.pid,
            "server status"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("received Ctrl-C, shutting down");
    manager.shutdown().await;
    Ok(())
}
