use chrono::Utc;
use tracing::{debug, warn};

use gestflow_core::domain::session::{ConversationState, SessionState};
use gestflow_core::domain::tenancy::CompanyId;
use gestflow_core::errors::ApplicationError;

use super::{column, timestamp_column, RepositoryError, SessionStore};
use crate::gateway::Gateway;
use crate::repositories::tenancy::ensure_company;

/// `wa_sessions`-backed conversation state, one row per (company, chat identity).
#[derive(Clone)]
pub struct SqlSessionStore {
    gateway: Gateway,
}

impl SqlSessionStore {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn load(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
    ) -> Result<SessionState, ApplicationError> {
        let chat_identity = chat_identity.trim().to_string();
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let row = tx
                        .query_optional(
                            sqlx::query(
                                "SELECT state, context_json, updated_at FROM wa_sessions
                                 WHERE company_id = ? AND chat_identity = ?",
                            )
                            .bind(company_id.0)
                            .bind(&chat_identity),
                        )
                        .await?;
                    let Some(row) = row else {
                        return Ok(SessionState::default());
                    };

                    let state_name: String = column(&row, "state")?;
                    let context_json: String = column(&row, "context_json")?;
                    let updated_at = timestamp_column(&row, "updated_at")?;
                    match serde_json::from_str::<ConversationState>(&context_json) {
                        Ok(state) => Ok(SessionState { state, updated_at: Some(updated_at) }),
                        Err(error) => {
                            warn!(
                                event_name = "session.context_unreadable",
                                company_id = company_id.0,
                                state = %state_name,
                                error = %error,
                                "stored conversation context could not be decoded; starting idle"
                            );
                            Ok(SessionState { state: ConversationState::Idle, updated_at: Some(updated_at) })
                        }
                    }
                })
            })
            .await
    }

    async fn save(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        state: SessionState,
    ) -> Result<SessionState, ApplicationError> {
        let chat_identity = chat_identity.trim().to_string();
        let context_json = serde_json::to_string(&state.state)
            .map_err(|error| RepositoryError::Decode(format!("context_json: {error}")))?;

        let saved = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    let updated_at = Utc::now();
                    tx.execute(
                        sqlx::query(
                            "INSERT INTO wa_sessions
                                (company_id, chat_identity, state, context_json, updated_at)
                             VALUES (?, ?, ?, ?, ?)
                             ON CONFLICT(company_id, chat_identity) DO UPDATE SET
                                 state = excluded.state,
                                 context_json = excluded.context_json,
                                 updated_at = excluded.updated_at",
                        )
                        .bind(company_id.0)
                        .bind(&chat_identity)
                        .bind(state.state.name())
                        .bind(&context_json)
                        .bind(updated_at.to_rfc3339()),
                    )
                    .await?;
                    Ok(SessionState { state: state.state, updated_at: Some(updated_at) })
                })
            })
            .await?;

        debug!(
            event_name = "session.saved",
            company_id = company_id.0,
            state = saved.state.name(),
            "conversation state saved"
        );
        Ok(saved)
    }

    async fn reset(&self, company_id: CompanyId, chat_identity: &str) -> Result<(), ApplicationError> {
        self.save(company_id, chat_identity, SessionState::default()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use gestflow_core::domain::budget::BudgetId;
    use gestflow_core::domain::session::{ConversationState, SessionState};
    use gestflow_core::domain::tenancy::CompanyId;
    use gestflow_core::errors::{ApplicationError, DomainError};

    use super::SqlSessionStore;
    use crate::gateway::Gateway;
    use crate::repositories::{SessionStore, TenantRegistry};
    use crate::{connect_with_settings, migrations};

    async fn store() -> (CompanyId, SqlSessionStore) {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let gateway = Gateway::new(pool);
        let company =
            TenantRegistry::new(gateway.clone()).create_company("Acme").await.expect("company").id;
        (company, SqlSessionStore::new(gateway))
    }

    #[tokio::test]
    async fn unknown_identity_starts_idle() {
        let (company, store) = store().await;
        let state = store.load(company, "whatsapp:+1").await.expect("load");
        assert_eq!(state, SessionState::default());
    }

    #[tokio::test]
    async fn save_then_load_returns_the_same_context() {
        let (company, store) = store().await;
        let building = ConversationState::BuildingBudget {
            budget_id: BudgetId(12),
            budget_code: "ORC-2026-0012".to_string(),
        };

        store
            .save(company, "whatsapp:+1", SessionState { state: ConversationState::ChoosingCustomer, updated_at: None })
            .await
            .expect("first save");
        let saved = store
            .save(company, "whatsapp:+1", SessionState { state: building.clone(), updated_at: None })
            .await
            .expect("overwrite");

        let loaded = store.load(company, "whatsapp:+1").await.expect("load");
        assert_eq!(loaded.state, building);
        assert_eq!(loaded.updated_at, saved.updated_at);

        store.reset(company, "whatsapp:+1").await.expect("reset");
        assert_eq!(store.load(company, "whatsapp:+1").await.expect("load").state, ConversationState::Idle);
    }

    #[tokio::test]
    async fn sessions_require_an_existing_company() {
        let (_, store) = store().await;
        let error = store
            .save(CompanyId(999), "whatsapp:+1", SessionState::default())
            .await
            .expect_err("missing company");
        assert!(matches!(error, ApplicationError::Domain(DomainError::NotFound { .. })));
    }
}
