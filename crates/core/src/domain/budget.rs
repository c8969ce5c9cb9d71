use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::customer::CustomerId;
use crate::domain::line::{document_total, LineItem};
use crate::domain::tenancy::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BudgetItemId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Draft,
    Confirmed,
    Cancelled,
    Approved,
}

impl BudgetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Approved => "approved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BudgetStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Confirmed)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Confirmed, Self::Approved)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Approved)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub id: BudgetId,
    pub company_id: CompanyId,
    pub code: String,
    pub customer_id: CustomerId,
    pub status: BudgetStatus,
    pub total: Decimal,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<LineItem>,
}

impl Budget {
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status != BudgetStatus::Draft {
            return Err(DomainError::InvalidState(format!(
                "budget {} is {} and its items can no longer change",
                self.code,
                self.status.as_str()
            )));
        }
        Ok(())
    }

    pub fn transition_to(&mut self, next: BudgetStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidBudgetTransition { from: self.status, to: next });
        }
        if next == BudgetStatus::Confirmed && self.items.is_empty() {
            return Err(DomainError::Validation(format!(
                "budget {} has no items to confirm",
                self.code
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn items_total(&self) -> Decimal {
        document_total(self.items.iter().map(|item| &item.subtotal))
    }

    /// Last day the quote is honoured, counted in the business's local calendar.
    pub fn valid_until(&self, validity_days: u32, offset: FixedOffset) -> NaiveDate {
        let local_created = self.created_at.with_timezone(&offset).date_naive();
        local_created + Duration::days(i64::from(validity_days))
    }
}
