use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use gestflow_core::domain::session::SessionState;
use gestflow_core::domain::tenancy::CompanyId;
use gestflow_core::errors::ApplicationError;

use super::SessionStore;

/// Process-local session store for tests and single-process demos.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<(CompanyId, String), SessionState>>,
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
    ) -> Result<SessionState, ApplicationError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&(company_id, chat_identity.trim().to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        state: SessionState,
    ) -> Result<SessionState, ApplicationError> {
        let saved = SessionState { state: state.state, updated_at: Some(Utc::now()) };
        let mut sessions = self.sessions.write().await;
        sessions.insert((company_id, chat_identity.trim().to_string()), saved.clone());
        Ok(saved)
    }

    async fn reset(&self, company_id: CompanyId, chat_identity: &str) -> Result<(), ApplicationError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&(company_id, chat_identity.trim().to_string()));
        Ok(())
    }
}
