use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::ProductId;
use crate::domain::tenancy::{CompanyId, UserId};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockMovementId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    In,
    Out,
    Sale,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Sale => "sale",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "in" => Some(Self::In),
            "out" => Some(Self::Out),
            "sale" => Some(Self::Sale),
            _ => None,
        }
    }

    /// Quantities are stored positive; the movement type carries the direction.
    pub fn signed(&self, qty: Decimal) -> Decimal {
        match self {
            Self::In => qty,
            Self::Out | Self::Sale => -qty,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Sale,
    Manual,
    Other,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "sale",
            Self::Manual => "manual",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sale" => Some(Self::Sale),
            "manual" => Some(Self::Manual),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: StockMovementId,
    pub company_id: CompanyId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub qty: Decimal,
    pub reason: Option<String>,
    pub ref_type: Option<RefType>,
    pub ref_id: Option<i64>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewStockMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub qty: Decimal,
    pub reason: Option<String>,
    pub ref_type: RefType,
    pub ref_id: Option<i64>,
    pub created_by: Option<UserId>,
}

/// Current stock is the signed sum of a product's movements.
pub fn stock_level<'a>(movements: impl IntoIterator<Item = (MovementType, &'a Decimal)>) -> Decimal {
    movements.into_iter().map(|(movement_type, qty)| movement_type.signed(*qty)).sum()
}

/// Checks that withdrawing `qty` from `current` keeps stock non-negative.
pub fn ensure_available(
    product_label: &str,
    current: Decimal,
    qty: Decimal,
    allow_negative: bool,
) -> Result<(), DomainError> {
    if allow_negative || current - qty >= Decimal::ZERO {
        return Ok(());
    }
    Err(DomainError::Validation(format!(
        "insufficient stock for {product_label}: available {current}, requested {qty}"
    )))
}
