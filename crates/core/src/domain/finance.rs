use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::sale::SaleId;
use crate::domain::tenancy::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceivableId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayableId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Open,
    Partial,
    Paid,
    Cancelled,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(Self::Open),
            "partial" => Some(Self::Partial),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How a title with payments already applied may be cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicy {
    /// Only titles with nothing paid yet.
    #[default]
    Strict,
    /// Partially paid titles are closed; `paid_total` keeps what was received.
    WriteOff,
}

/// Balance of a receivable or payable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub status: SettlementStatus,
    pub total: Decimal,
    pub paid_total: Decimal,
}

impl Settlement {
    pub fn open(total: Decimal) -> Result<Self, DomainError> {
        if total <= Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "title total {total} must be greater than zero"
            )));
        }
        Ok(Self { status: SettlementStatus::Open, total, paid_total: Decimal::ZERO })
    }

    pub fn outstanding(&self) -> Decimal {
        self.total - self.paid_total
    }

    /// Applies a payment, rejecting (never clamping) anything above the outstanding balance.
    pub fn apply(&self, amount: Decimal) -> Result<Self, DomainError> {
        ensure_positive_amount(amount)?;
        if matches!(self.status, SettlementStatus::Cancelled | SettlementStatus::Paid) {
            return Err(DomainError::InvalidState(format!(
                "title is {} and accepts no further payments",
                self.status.as_str()
            )));
        }
        let outstanding = self.outstanding();
        if amount > outstanding {
            return Err(DomainError::Validation(format!(
                "payment {amount} exceeds outstanding balance {outstanding}"
            )));
        }

        let paid_total = self.paid_total + amount;
        let status = if paid_total == self.total {
            SettlementStatus::Paid
        } else if paid_total > Decimal::ZERO {
            SettlementStatus::Partial
        } else {
            self.status
        };
        Ok(Self { status, total: self.total, paid_total })
    }

    pub fn cancel(&self, policy: CancelPolicy) -> Result<Self, DomainError> {
        match self.status {
            SettlementStatus::Cancelled | SettlementStatus::Paid => {
                Err(DomainError::InvalidState(format!(
                    "title is {} and cannot be cancelled",
                    self.status.as_str()
                )))
            }
            SettlementStatus::Partial if policy == CancelPolicy::Strict => {
                Err(DomainError::InvalidState(format!(
                    "title has {} paid; cancel it as a write-off instead",
                    self.paid_total
                )))
            }
            _ => Ok(Self { status: SettlementStatus::Cancelled, ..*self }),
        }
    }
}

pub fn ensure_positive_amount(amount: Decimal) -> Result<Decimal, DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::Validation(format!("amount {amount} must be greater than zero")));
    }
    Ok(amount)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receivable {
    pub id: ReceivableId,
    pub company_id: CompanyId,
    pub sale_id: SaleId,
    pub settlement: Settlement,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payable {
    pub id: PayableId,
    pub company_id: CompanyId,
    pub supplier_name: String,
    pub description: Option<String>,
    pub settlement: Settlement,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    In,
    Out,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginType {
    Receivable,
    Payable,
    SaleDirect,
    Manual,
}

impl OriginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receivable => "receivable",
            Self::Payable => "payable",
            Self::SaleDirect => "sale_direct",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "receivable" => Some(Self::Receivable),
            "payable" => Some(Self::Payable),
            "sale_direct" => Some(Self::SaleDirect),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    Cash,
    Card,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pix => "pix",
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Transfer => "transfer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pix" => Some(Self::Pix),
            "cash" => Some(Self::Cash),
            "card" => Some(Self::Card),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }
}

/// What a payment settles. The direction of money follows from the origin except for manual entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin_type", rename_all = "snake_case")]
pub enum PaymentOrigin {
    Receivable { id: ReceivableId },
    Payable { id: PayableId },
    SaleDirect { id: SaleId },
    Manual { direction: PaymentDirection },
}

impl PaymentOrigin {
    pub fn origin_type(&self) -> OriginType {
        match self {
            Self::Receivable { .. } => OriginType::Receivable,
            Self::Payable { .. } => OriginType::Payable,
            Self::SaleDirect { .. } => OriginType::SaleDirect,
            Self::Manual { .. } => OriginType::Manual,
        }
    }

    pub fn origin_id(&self) -> Option<i64> {
        match self {
            Self::Receivable { id } => Some(id.0),
            Self::Payable { id } => Some(id.0),
            Self::SaleDirect { id } => Some(id.0),
            Self::Manual { .. } => None,
        }
    }

    pub fn direction(&self) -> PaymentDirection {
        match self {
            Self::Receivable { .. } | Self::SaleDirect { .. } => PaymentDirection::In,
            Self::Payable { .. } => PaymentDirection::Out,
            Self::Manual { direction } => *direction,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    pub origin: PaymentOrigin,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub company_id: CompanyId,
    pub direction: PaymentDirection,
    pub origin_type: OriginType,
    pub origin_id: Option<i64>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub note: Option<String>,
}
