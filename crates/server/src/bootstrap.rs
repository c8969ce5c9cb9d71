use std::sync::Arc;

use gestflow_agent::ConversationRuntime;
use gestflow_core::config::{AppConfig, ConfigError, LoadOptions};
use gestflow_core::errors::ApplicationError;
use gestflow_db::{
    connect_with_settings, migrations, DbPool, Gateway, SeedResult, SqlSessionStore, TenantSeed,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub tenant: SeedResult,
    pub conversation: Arc<ConversationRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("tenant seed failed: {0}")]
    Seed(#[source] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Connects, migrates and makes sure the first tenant exists before any message is served.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let gateway = Gateway::new(db_pool.clone());
    let tenant =
        TenantSeed::load(&gateway, &config.seed, false).await.map_err(BootstrapError::Seed)?;

    let sessions = Arc::new(SqlSessionStore::new(gateway.clone()));
    let conversation =
        Arc::new(ConversationRuntime::new(gateway, config.business.clone(), sessions));

    Ok(Application { config, db_pool, tenant, conversation })
}

#[cfg(test)]
mod tests {
    use gestflow_core::config::{ConfigOverrides, LoadOptions};
    use tempfile::TempDir;

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("mysql://localhost/gestflow".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("database.url"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_seeds_the_first_tenant() {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("server.db").display());
        let options = || LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(url.clone()),
                owner_chat_identity: Some("whatsapp:+5571999990000".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        };

        let app = bootstrap(options()).await.expect("bootstrap should succeed");
        assert!(app.tenant.company_created);
        assert!(app.tenant.owner_created);

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('budgets', 'sales', 'stock_movements', 'wa_sessions')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("ledger tables should exist after bootstrap");
        assert_eq!(table_count, 4);
        app.db_pool.close().await;

        let again = bootstrap(options()).await.expect("second bootstrap");
        assert!(!again.tenant.company_created);
        assert_eq!(again.tenant.company_id, app.tenant.company_id);
        again.db_pool.close().await;
    }
}
