use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::budget::BudgetId;
use crate::domain::catalog::ItemRef;
use crate::domain::customer::CustomerId;
use crate::domain::line::LineItem;
use crate::domain::tenancy::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaleId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Open,
    Paid,
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub company_id: CompanyId,
    pub code: String,
    pub budget_id: Option<BudgetId>,
    pub customer_id: CustomerId,
    pub status: SaleStatus,
    pub total: Decimal,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<LineItem>,
}

impl Sale {
    pub fn ensure_open(&self, action: &str) -> Result<(), DomainError> {
        if self.status != SaleStatus::Open {
            return Err(DomainError::InvalidState(format!(
                "cannot {action} sale {}: status is {}",
                self.code,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLineRequest {
    pub item: ItemRef,
    pub qty: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaleOptions {
    pub created_by: Option<UserId>,
    /// Sold on credit: opens a receivable for the full total due on this date.
    pub credit_due_date: Option<NaiveDate>,
    pub allow_negative_stock: bool,
}
