mod api;
mod bootstrap;
mod health;

use anyhow::Result;
use changeflow_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use changeflow_core::config::LogFormat::*;
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
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let api_address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&api_address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        request_id = "unknown",
        bind_address = %api_address,
        "changeflow-server listening"
    );

    let drain_secs = app.config.server.graceful_shutdown_secs;
    axum::serve(listener, api::router(app.engine.clone()))
        .with_graceful_shutdown(wait_for_shutdown(drain_secs))
        .await?;

    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        request_id = "unknown",
        "changeflow-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown(drain_secs: u64) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        request_id = "unknown",
        drain_secs,
        "shutdown signal received, draining in-flight requests"
    );
}
