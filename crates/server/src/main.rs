mod api;
mod bootstrap;
mod collaborators;
mod health;

use std::time::Duration;

use anyhow::Result;
use frontdesk_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use frontdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = api::router(app.state.clone())
        .merge(health::router(app.db_pool.clone(), app.state.kill_switch.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "frontdesk-server listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "shutdown signal received; draining connections"
    );
    let _ = shutdown_tx.send(());

    // Bound the drain so a stuck in-flight request cannot hold the process
    // open past the configured window.
    let drain_window = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(drain_window, server).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            "graceful drain window elapsed; exiting"
        ),
    }

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        "frontdesk-server stopped"
    );

    Ok(())
}
