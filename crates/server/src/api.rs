use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use gestflow_agent::ConversationRuntime;
use gestflow_db::DbPool;
use tracing::info;

use crate::{health, messages};

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub conversation: Arc<ConversationRuntime>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/messages", post(messages::receive))
        .with_state(state)
}

/// Serves the API until `shutdown` resolves.
pub async fn serve<F>(
    bind_address: &str,
    port: u16,
    state: AppState,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(event_name = "system.http.start", bind_address = %address, "http endpoint started");
    axum::serve(listener, router(state)).with_graceful_shutdown(shutdown).await
}

#[cfg(test)]
pub(crate) async fn test_state() -> AppState {
    use gestflow_core::config::AppConfig;
    use gestflow_db::{connect_with_settings, migrations, Gateway, InMemorySessionStore, TenantSeed};

    let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let gateway = Gateway::new(pool.clone());

    let mut config = AppConfig::default();
    config.seed.owner_chat_identity = Some(TEST_OWNER.to_string());
    TenantSeed::load(&gateway, &config.seed, true).await.expect("seed");

    let conversation = ConversationRuntime::new(
        gateway,
        config.business,
        Arc::new(InMemorySessionStore::default()),
    );
    AppState { db_pool: pool, conversation: Arc::new(conversation) }
}

#[cfg(test)]
pub(crate) const TEST_OWNER: &str = "whatsapp:+5571999990000";
