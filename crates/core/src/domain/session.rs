use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::budget::BudgetId;

/// Where a chat identity is in a multi-message workflow. Each step carries only the data it needs
/// to resume on the next inbound message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    ChoosingCustomer,
    BuildingBudget {
        budget_id: BudgetId,
        budget_code: String,
    },
}

impl ConversationState {
    /// Tag persisted in `wa_sessions.state`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ChoosingCustomer => "choosing_customer",
            Self::BuildingBudget { .. } => "building_budget",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub state: ConversationState,
    pub updated_at: Option<DateTime<Utc>>,
}
