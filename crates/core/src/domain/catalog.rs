use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::tenancy::CompanyId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Product,
    Service,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Service => "service",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "product" => Some(Self::Product),
            "service" => Some(Self::Service),
            _ => None,
        }
    }
}

/// Typed pointer at a catalog row: the pair (`item_type`, `item_id`) stored on line items.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "item_type", content = "item_id", rename_all = "snake_case")]
pub enum ItemRef {
    Product(ProductId),
    Service(ServiceId),
}

impl ItemRef {
    pub fn from_parts(item_type: ItemType, item_id: i64) -> Self {
        match item_type {
            ItemType::Product => Self::Product(ProductId(item_id)),
            ItemType::Service => Self::Service(ServiceId(item_id)),
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Self::Product(_) => ItemType::Product,
            Self::Service(_) => ItemType::Service,
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            Self::Product(id) => id.0,
            Self::Service(id) => id.0,
        }
    }

    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            Self::Product(id) => Some(*id),
            Self::Service(_) => None,
        }
    }
}

/// A product or service as registered in a tenant's catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item: ItemRef,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub price: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewCatalogItem {
    pub item_type: ItemType,
    pub code: String,
    pub name: String,
    pub price: Decimal,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogItemUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    pub price: Option<Decimal>,
}

/// Codes compare case-insensitively, so they are stored trimmed and upper-cased.
pub fn normalize_code(code: &str) -> Result<String, DomainError> {
    let normalized = code.trim().to_ascii_uppercase();
    if normalized.is_empty() {
        return Err(DomainError::Validation("catalog code must not be empty".to_string()));
    }
    if normalized.chars().any(char::is_whitespace) {
        return Err(DomainError::Validation(format!(
            "catalog code `{normalized}` must not contain whitespace"
        )));
    }
    Ok(normalized)
}

pub fn validate_price(price: Decimal) -> Result<Decimal, DomainError> {
    if price.is_sign_negative() {
        return Err(DomainError::Validation(format!("price {price} must not be negative")));
    }
    Ok(price)
}

pub fn validate_name(name: &str) -> Result<String, DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation("name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{normalize_code, validate_price, ItemRef, ItemType, ProductId, ServiceId};

    #[test]
    fn codes_are_normalized_to_upper_case() {
        assert_eq!(normalize_code("  p001 ").expect("valid code"), "P001");
        assert!(normalize_code("   ").is_err());
        assert!(normalize_code("P 001").is_err());
    }

    #[test]
    fn negative_prices_are_rejected() {
        assert!(validate_price(Decimal::new(-1, 0)).is_err());
        assert_eq!(validate_price(Decimal::ZERO).expect("zero is a valid price"), Decimal::ZERO);
    }

    #[test]
    fn item_ref_exposes_storage_parts() {
        let product = ItemRef::from_parts(ItemType::Product, 7);
        assert_eq!(product, ItemRef::Product(ProductId(7)));
        assert_eq!(product.item_type().as_str(), "product");
        assert_eq!(product.product_id(), Some(ProductId(7)));

        let service = ItemRef::Service(ServiceId(3));
        assert_eq!(service.raw_id(), 3);
        assert_eq!(service.product_id(), None);
    }
}
