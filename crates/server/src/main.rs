use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vendabot_core::config::{AppConfig, LoadOptions};
use vendabot_server::{bootstrap, scheduler};

fn init_logging(config: &AppConfig) {
    use vendabot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let mut app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let receiver = app.queue_rx.take().context("event queue receiver already taken")?;
    let mut handles = app.worker_pool().spawn(receiver, shutdown_rx.clone());
    handles.push(scheduler::spawn_sweeps(
        app.reminders.clone(),
        Duration::from_secs(app.config.scheduler.sweep_interval_secs.max(1)),
        shutdown_rx,
    ));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(event_name = "system.server.started", address = %address, "vendabot-server listening");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(event_name = "system.server.signal_failed", error = %error, "ctrl-c handler failed");
            }
            tracing::info!(event_name = "system.server.stopping", "vendabot-server stopping");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, futures::future::join_all(handles)).await.is_err() {
        tracing::warn!(event_name = "system.server.shutdown_timeout", "background tasks did not stop in time");
    }
    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", "vendabot-server stopped");

    Ok(())
}
