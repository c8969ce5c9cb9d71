use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::catalog::{CatalogItem, ItemRef};
use crate::errors::DomainError;

/// Money values carry two decimal places.
pub const MONEY_SCALE: u32 = 2;

/// Row shape shared by budget items and sale items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub item: ItemRef,
    pub description_snapshot: String,
    pub unit_price: Decimal,
    pub qty: Decimal,
    pub subtotal: Decimal,
}

/// A line before it is persisted: price and name are frozen from the catalog at this point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricedLine {
    pub item: ItemRef,
    pub description_snapshot: String,
    pub unit_price: Decimal,
    pub qty: Decimal,
    pub subtotal: Decimal,
}

impl PricedLine {
    pub fn from_catalog(entry: &CatalogItem, qty: Decimal) -> Result<Self, DomainError> {
        let qty = validate_qty(qty)?;
        Ok(Self {
            item: entry.item,
            description_snapshot: entry.name.clone(),
            unit_price: entry.price,
            qty,
            subtotal: line_subtotal(entry.price, qty),
        })
    }
}

pub fn validate_qty(qty: Decimal) -> Result<Decimal, DomainError> {
    if qty <= Decimal::ZERO {
        return Err(DomainError::Validation(format!("quantity {qty} must be greater than zero")));
    }
    Ok(qty)
}

pub fn line_subtotal(unit_price: Decimal, qty: Decimal) -> Decimal {
    (unit_price * qty).round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn document_total<'a>(subtotals: impl IntoIterator<Item = &'a Decimal>) -> Decimal {
    subtotals.into_iter().copied().sum()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::catalog::{CatalogItem, ItemRef, ProductId};
    use crate::domain::tenancy::CompanyId;

    use super::{document_total, line_subtotal, validate_qty, PricedLine};

    #[test]
    fn subtotal_is_price_times_quantity_at_money_scale() {
        assert_eq!(line_subtotal(Decimal::new(1000, 2), Decimal::new(3, 0)), Decimal::new(3000, 2));
        assert_eq!(line_subtotal(Decimal::new(333, 2), Decimal::new(15, 1)), Decimal::new(500, 2));
    }

    #[test]
    fn zero_and_negative_quantities_are_rejected() {
        assert!(validate_qty(Decimal::ZERO).is_err());
        assert!(validate_qty(Decimal::new(-2, 0)).is_err());
        assert!(validate_qty(Decimal::new(1, 1)).is_ok());
    }

    #[test]
    fn priced_line_snapshots_catalog_name_and_price() {
        let entry = CatalogItem {
            item: ItemRef::Product(ProductId(1)),
            company_id: CompanyId(1),
            code: "P001".to_string(),
            name: "Cement bag".to_string(),
            price: Decimal::new(2550, 2),
            active: true,
            created_at: Utc::now(),
        };

        let line = PricedLine::from_catalog(&entry, Decimal::new(2, 0)).expect("valid line");

        assert_eq!(line.description_snapshot, "Cement bag");
        assert_eq!(line.unit_price, Decimal::new(2550, 2));
        assert_eq!(line.subtotal, Decimal::new(5100, 2));
    }

    #[test]
    fn document_total_sums_subtotals() {
        let subtotals = [Decimal::new(1050, 2), Decimal::new(200, 2)];
        assert_eq!(document_total(&subtotals), Decimal::new(1250, 2));
        assert_eq!(document_total(&[]), Decimal::ZERO);
    }
}
