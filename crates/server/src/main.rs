mod api;
mod bootstrap;
mod health;
mod messages;

use anyhow::Result;
use gestflow_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use gestflow_core::config::LogFormat::*;
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
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    tracing::info!(
        event_name = "system.server.started",
        company_id = app.tenant.company_id,
        company_name = %app.tenant.company_name,
        "gestflow-server started"
    );

    let state = api::AppState { db_pool: app.db_pool.clone(), conversation: app.conversation };
    api::serve(&app.config.server.bind_address, app.config.server.port, state, wait_for_shutdown())
        .await?;

    tracing::info!(event_name = "system.server.stopping", "gestflow-server stopping");
    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "could not listen for shutdown signal"
        );
    }
}
