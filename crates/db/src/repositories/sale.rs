use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use tracing::{info, warn};

use gestflow_core::config::BusinessConfig;
use gestflow_core::domain::budget::{BudgetId, BudgetStatus};
use gestflow_core::domain::catalog::{normalize_code, ItemRef, ProductId};
use gestflow_core::domain::customer::CustomerId;
use gestflow_core::domain::finance::SettlementStatus;
use gestflow_core::domain::line::{document_total, validate_qty, LineItem, PricedLine};
use gestflow_core::domain::sale::{Sale, SaleId, SaleLineRequest, SaleOptions, SaleStatus};
use gestflow_core::domain::sequence::DocumentKind;
use gestflow_core::domain::stock::{
    ensure_available, stock_level, MovementType, NewStockMovement, RefType, StockMovement,
    StockMovementId,
};
use gestflow_core::domain::tenancy::{CompanyId, UserId};
use gestflow_core::errors::{ApplicationError, DomainError};

use super::{column, decimal_column, enum_column, timestamp_column, RepositoryError};
use crate::gateway::{Gateway, TxHandle};
use crate::repositories::budget::{load_budget, row_to_line};
use crate::repositories::catalog::{load_active_customer, load_active_item, load_item};
use crate::repositories::finance::{insert_receivable, live_receivable_for_sale, sale_direct_paid};
use crate::repositories::sequence::allocate_document_code;
use crate::repositories::tenancy::ensure_member;

/// Stock adjustment entered by an operator rather than produced by a sale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManualMovement {
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub qty: Decimal,
    pub reason: Option<String>,
    pub created_by: Option<UserId>,
}

/// Sales and the stock movements they produce.
#[derive(Clone)]
pub struct SaleLedger {
    gateway: Gateway,
    business: BusinessConfig,
}

struct SaleDraft {
    company_id: CompanyId,
    customer_id: CustomerId,
    budget_id: Option<BudgetId>,
    lines: Vec<PricedLine>,
    options: SaleOptions,
}

impl SaleLedger {
    pub fn new(gateway: Gateway, business: BusinessConfig) -> Self {
        Self { gateway, business }
    }

    /// Converts an approved budget into a sale at the prices quoted on it.
    pub async fn create_sale_from_budget(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
        options: SaleOptions,
    ) -> Result<Sale, ApplicationError> {
        let business = self.business.clone();
        let sale = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let budget = load_budget(tx, company_id, budget_id).await?;
                    if budget.status != BudgetStatus::Approved {
                        return Err(DomainError::InvalidState(format!(
                            "budget {} is {}; only approved budgets become sales",
                            budget.code,
                            budget.status.as_str()
                        ))
                        .into());
                    }
                    let existing = tx
                        .query_optional(
                            sqlx::query(
                                "SELECT code FROM sales
                                 WHERE company_id = ? AND budget_id = ? AND status <> 'cancelled'",
                            )
                            .bind(company_id.0)
                            .bind(budget_id.0),
                        )
                        .await?;
                    if let Some(row) = existing {
                        let sale_code: String = column(&row, "code")?;
                        return Err(DomainError::Conflict(format!(
                            "budget {} already backs sale {sale_code}",
                            budget.code
                        ))
                        .into());
                    }

                    let lines = budget
                        .items
                        .iter()
                        .map(|line| PricedLine {
                            item: line.item,
                            description_snapshot: line.description_snapshot.clone(),
                            unit_price: line.unit_price,
                            qty: line.qty,
                            subtotal: line.subtotal,
                        })
                        .collect();
                    let draft = SaleDraft {
                        company_id,
                        customer_id: budget.customer_id,
                        budget_id: Some(budget_id),
                        lines,
                        options,
                    };
                    insert_sale(tx, draft, &business).await
                })
            })
            .await?;

        log_sale_created(&sale);
        Ok(sale)
    }

    /// Sells catalog items at current prices without a prior budget.
    pub async fn create_direct_sale(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
        items: Vec<SaleLineRequest>,
        options: SaleOptions,
    ) -> Result<Sale, ApplicationError> {
        if items.is_empty() {
            return Err(DomainError::Validation("a sale needs at least one item".to_string()).into());
        }
        for request in &items {
            validate_qty(request.qty)?;
        }

        let business = self.business.clone();
        let sale = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    load_active_customer(tx, company_id, customer_id).await?;
                    let mut lines = Vec::with_capacity(items.len());
                    for request in &items {
                        let entry = load_active_item(tx, company_id, request.item).await?;
                        lines.push(PricedLine::from_catalog(&entry, request.qty)?);
                    }
                    let draft = SaleDraft { company_id, customer_id, budget_id: None, lines, options };
                    insert_sale(tx, draft, &business).await
                })
            })
            .await?;

        log_sale_created(&sale);
        Ok(sale)
    }

    /// Cancels an open sale: product lines are returned to stock with `in` movements and an
    /// unpaid receivable is cancelled with it. Sales with money already received are refused.
    pub async fn cancel_sale(
        &self,
        company_id: CompanyId,
        sale_id: SaleId,
        cancelled_by: Option<UserId>,
    ) -> Result<Sale, ApplicationError> {
        let sale = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_member(tx, company_id, cancelled_by).await?;
                    let mut sale = load_sale(tx, company_id, sale_id).await?;
                    sale.ensure_open("cancel")?;

                    if sale_direct_paid(tx, company_id, sale_id).await? > Decimal::ZERO {
                        return Err(DomainError::InvalidState(format!(
                            "sale {} has direct payments and cannot be cancelled",
                            sale.code
                        ))
                        .into());
                    }
                    if let Some(receivable) = live_receivable_for_sale(tx, company_id, sale_id).await? {
                        if receivable.settlement.paid_total > Decimal::ZERO {
                            return Err(DomainError::InvalidState(format!(
                                "sale {} has {} received on its receivable and cannot be cancelled",
                                sale.code, receivable.settlement.paid_total
                            ))
                            .into());
                        }
                        tx.execute(
                            sqlx::query(
                                "UPDATE accounts_receivable SET status = ?
                                 WHERE id = ? AND company_id = ?",
                            )
                            .bind(SettlementStatus::Cancelled.as_str())
                            .bind(receivable.id.0)
                            .bind(company_id.0),
                        )
                        .await?;
                    }

                    let now = Utc::now();
                    let reason = format!("sale {} cancelled", sale.code);
                    for line in &sale.items {
                        let Some(product_id) = line.item.product_id() else { continue };
                        let movement = NewStockMovement {
                            product_id,
                            movement_type: MovementType::In,
                            qty: line.qty,
                            reason: Some(reason.clone()),
                            ref_type: RefType::Sale,
                            ref_id: Some(sale_id.0),
                            created_by: cancelled_by,
                        };
                        insert_movement(tx, company_id, &movement, now).await?;
                    }

                    set_sale_status(tx, company_id, sale_id, SaleStatus::Open, SaleStatus::Cancelled).await?;
                    sale.status = SaleStatus::Cancelled;
                    Ok(sale)
                })
            })
            .await?;

        info!(
            event_name = "sale.cancelled",
            company_id = company_id.0,
            sale_id = sale_id.0,
            code = %sale.code,
            "sale cancelled and stock returned"
        );
        Ok(sale)
    }

    pub async fn mark_paid(
        &self,
        company_id: CompanyId,
        sale_id: SaleId,
    ) -> Result<Sale, ApplicationError> {
        let sale = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut sale = load_sale(tx, company_id, sale_id).await?;
                    sale.ensure_open("mark paid")?;
                    set_sale_status(tx, company_id, sale_id, SaleStatus::Open, SaleStatus::Paid).await?;
                    sale.status = SaleStatus::Paid;
                    Ok(sale)
                })
            })
            .await?;

        info!(event_name = "sale.paid", company_id = company_id.0, sale_id = sale_id.0, "sale marked paid");
        Ok(sale)
    }

    pub async fn get(&self, company_id: CompanyId, sale_id: SaleId) -> Result<Sale, ApplicationError> {
        self.gateway.with_read(move |tx| Box::pin(load_sale(tx, company_id, sale_id))).await
    }

    pub async fn find_by_code(&self, company_id: CompanyId, code: &str) -> Result<Sale, ApplicationError> {
        let code = normalize_code(code)?;
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let row = tx
                        .query_optional(
                            sqlx::query("SELECT id FROM sales WHERE company_id = ? AND code = ?")
                                .bind(company_id.0)
                                .bind(&code),
                        )
                        .await?;
                    let Some(row) = row else {
                        return Err(DomainError::not_found("sale", code).into());
                    };
                    load_sale(tx, company_id, SaleId(column(&row, "id")?)).await
                })
            })
            .await
    }

    pub async fn list(
        &self,
        company_id: CompanyId,
        status: Option<SaleStatus>,
    ) -> Result<Vec<Sale>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id FROM sales
                                 WHERE company_id = ? AND (? IS NULL OR status = ?)
                                 ORDER BY id DESC",
                            )
                            .bind(company_id.0)
                            .bind(status.map(|status| status.as_str()))
                            .bind(status.map(|status| status.as_str())),
                        )
                        .await?;
                    let mut sales = Vec::with_capacity(rows.len());
                    for row in &rows {
                        sales.push(load_sale(tx, company_id, SaleId(column(row, "id")?)).await?);
                    }
                    Ok(sales)
                })
            })
            .await
    }

    /// Records an `in` or `out` adjustment. `out` obeys the same non-negative stock rule as
    /// sales unless the business allows negative stock.
    pub async fn record_manual_movement(
        &self,
        company_id: CompanyId,
        movement: ManualMovement,
    ) -> Result<StockMovement, ApplicationError> {
        if movement.movement_type == MovementType::Sale {
            return Err(DomainError::Validation(
                "sale movements are only produced by sales".to_string(),
            )
            .into());
        }
        let qty = validate_qty(movement.qty)?;
        let allow_negative = self.business.allow_negative_stock;

        let recorded = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_member(tx, company_id, movement.created_by).await?;
                    let product = load_active_item(tx, company_id, ItemRef::Product(movement.product_id)).await?;
                    if movement.movement_type == MovementType::Out {
                        let current = current_stock_of(tx, company_id, movement.product_id).await?;
                        ensure_available(&product.code, current, qty, allow_negative)?;
                    }
                    let new_movement = NewStockMovement {
                        product_id: movement.product_id,
                        movement_type: movement.movement_type,
                        qty,
                        reason: movement.reason.map(|reason| reason.trim().to_string()).filter(|reason| !reason.is_empty()),
                        ref_type: RefType::Manual,
                        ref_id: None,
                        created_by: movement.created_by,
                    };
                    insert_movement(tx, company_id, &new_movement, Utc::now()).await
                })
            })
            .await?;

        info!(
            event_name = "stock.manual_movement",
            company_id = company_id.0,
            product_id = recorded.product_id.0,
            movement_type = recorded.movement_type.as_str(),
            qty = %recorded.qty,
            "manual stock movement recorded"
        );
        Ok(recorded)
    }

    pub async fn current_stock(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Decimal, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    load_item(tx, company_id, ItemRef::Product(product_id)).await?;
                    Ok(current_stock_of(tx, company_id, product_id).await?)
                })
            })
            .await
    }

    pub async fn list_movements(
        &self,
        company_id: CompanyId,
        product_id: ProductId,
    ) -> Result<Vec<StockMovement>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, product_id, movement_type, qty, reason,
                                        ref_type, ref_id, created_by, created_at
                                 FROM stock_movements
                                 WHERE company_id = ? AND product_id = ?
                                 ORDER BY id",
                            )
                            .bind(company_id.0)
                            .bind(product_id.0),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_movement).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }
}

/// Writes the sale, its lines, one `sale` movement per product line and the optional receivable.
/// Every check runs before the first write.
async fn insert_sale(
    tx: &mut TxHandle,
    draft: SaleDraft,
    business: &BusinessConfig,
) -> Result<Sale, ApplicationError> {
    let SaleDraft { company_id, customer_id, budget_id, lines, options } = draft;
    ensure_member(tx, company_id, options.created_by).await?;
    if lines.is_empty() {
        return Err(DomainError::Validation("a sale needs at least one item".to_string()).into());
    }

    let allow_negative = options.allow_negative_stock || business.allow_negative_stock;
    let withdrawals = product_quantities(lines.iter().map(|line| (line.item, line.qty)));
    for (product_id, qty) in &withdrawals {
        let product = load_item(tx, company_id, ItemRef::Product(*product_id)).await?;
        let current = current_stock_of(tx, company_id, *product_id).await?;
        ensure_available(&product.code, current, *qty, allow_negative)?;
    }

    let total = document_total(lines.iter().map(|line| &line.subtotal));
    if options.credit_due_date.is_some() && total <= Decimal::ZERO {
        return Err(DomainError::Validation(
            "a credit sale needs a total greater than zero".to_string(),
        )
        .into());
    }

    let now = Utc::now();
    let code = allocate_document_code(tx, company_id, DocumentKind::Sale, business, now).await?;
    let result = tx
        .execute(
            sqlx::query(
                "INSERT INTO sales
                    (company_id, code, budget_id, customer_id, status, total, created_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(company_id.0)
            .bind(&code)
            .bind(budget_id.map(|id| id.0))
            .bind(customer_id.0)
            .bind(SaleStatus::Open.as_str())
            .bind(total.to_string())
            .bind(options.created_by.map(|user| user.0))
            .bind(now.to_rfc3339()),
        )
        .await?;
    let sale_id = SaleId(result.last_insert_rowid());

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let result = tx
            .execute(
                sqlx::query(
                    "INSERT INTO sale_items
                        (company_id, sale_id, item_type, item_id, description_snapshot,
                         unit_price, qty, subtotal)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(company_id.0)
                .bind(sale_id.0)
                .bind(line.item.item_type().as_str())
                .bind(line.item.raw_id())
                .bind(&line.description_snapshot)
                .bind(line.unit_price.to_string())
                .bind(line.qty.to_string())
                .bind(line.subtotal.to_string()),
            )
            .await?;
        items.push(LineItem {
            id: result.last_insert_rowid(),
            item: line.item,
            description_snapshot: line.description_snapshot,
            unit_price: line.unit_price,
            qty: line.qty,
            subtotal: line.subtotal,
        });
    }

    for item in &items {
        let Some(product_id) = item.item.product_id() else { continue };
        let movement = NewStockMovement {
            product_id,
            movement_type: MovementType::Sale,
            qty: item.qty,
            reason: Some(format!("sale {code}")),
            ref_type: RefType::Sale,
            ref_id: Some(sale_id.0),
            created_by: options.created_by,
        };
        insert_movement(tx, company_id, &movement, now).await?;
    }

    if let Some(due_date) = options.credit_due_date {
        insert_receivable(tx, company_id, sale_id, due_date, total, now).await?;
    }

    Ok(Sale {
        id: sale_id,
        company_id,
        code,
        budget_id,
        customer_id,
        status: SaleStatus::Open,
        total,
        created_by: options.created_by,
        created_at: now,
        items,
    })
}

/// Sums quantities per product so the stock check sees the whole withdrawal. Services are
/// skipped.
fn product_quantities(lines: impl Iterator<Item = (ItemRef, Decimal)>) -> Vec<(ProductId, Decimal)> {
    let mut totals: BTreeMap<i64, Decimal> = BTreeMap::new();
    for (item, qty) in lines {
        if let Some(product_id) = item.product_id() {
            *totals.entry(product_id.0).or_insert(Decimal::ZERO) += qty;
        }
    }
    totals.into_iter().map(|(id, qty)| (ProductId(id), qty)).collect()
}

pub(crate) async fn load_sale(
    tx: &mut TxHandle,
    company_id: CompanyId,
    sale_id: SaleId,
) -> Result<Sale, ApplicationError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, code, budget_id, customer_id, status, total, created_by,
                        created_at
                 FROM sales WHERE id = ? AND company_id = ?",
            )
            .bind(sale_id.0)
            .bind(company_id.0),
        )
        .await?;
    let Some(row) = row else {
        return Err(DomainError::not_found("sale", sale_id.0).into());
    };

    let item_rows = tx
        .query_all(
            sqlx::query(
                "SELECT id, item_type, item_id, description_snapshot, unit_price, qty, subtotal
                 FROM sale_items WHERE sale_id = ? AND company_id = ?
                 ORDER BY id",
            )
            .bind(sale_id.0)
            .bind(company_id.0),
        )
        .await?;
    let items = item_rows.iter().map(row_to_line).collect::<Result<Vec<_>, _>>()?;

    Ok(row_to_sale(&row, items)?)
}

pub(crate) async fn set_sale_status(
    tx: &mut TxHandle,
    company_id: CompanyId,
    sale_id: SaleId,
    from: SaleStatus,
    to: SaleStatus,
) -> Result<(), ApplicationError> {
    let result = tx
        .execute(
            sqlx::query("UPDATE sales SET status = ? WHERE id = ? AND company_id = ? AND status = ?")
                .bind(to.as_str())
                .bind(sale_id.0)
                .bind(company_id.0)
                .bind(from.as_str()),
        )
        .await?;
    if result.rows_affected() == 0 {
        warn!(
            event_name = "sale.status_race",
            company_id = company_id.0,
            sale_id = sale_id.0,
            expected = from.as_str(),
            "sale status changed concurrently"
        );
        return Err(DomainError::Conflict(format!("sale {} is no longer {}", sale_id.0, from.as_str())).into());
    }
    Ok(())
}

async fn current_stock_of(
    tx: &mut TxHandle,
    company_id: CompanyId,
    product_id: ProductId,
) -> Result<Decimal, RepositoryError> {
    let rows = tx
        .query_all(
            sqlx::query(
                "SELECT movement_type, qty FROM stock_movements
                 WHERE company_id = ? AND product_id = ?",
            )
            .bind(company_id.0)
            .bind(product_id.0),
        )
        .await?;
    let movements = rows
        .iter()
        .map(|row| Ok((enum_column(row, "movement_type", MovementType::parse)?, decimal_column(row, "qty")?)))
        .collect::<Result<Vec<_>, RepositoryError>>()?;
    Ok(stock_level(movements.iter().map(|(movement_type, qty)| (*movement_type, qty))))
}

async fn insert_movement(
    tx: &mut TxHandle,
    company_id: CompanyId,
    movement: &NewStockMovement,
    now: DateTime<Utc>,
) -> Result<StockMovement, ApplicationError> {
    let result = tx
        .execute(
            sqlx::query(
                "INSERT INTO stock_movements
                    (company_id, product_id, movement_type, qty, reason, ref_type, ref_id,
                     created_by, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(company_id.0)
            .bind(movement.product_id.0)
            .bind(movement.movement_type.as_str())
            .bind(movement.qty.to_string())
            .bind(&movement.reason)
            .bind(movement.ref_type.as_str())
            .bind(movement.ref_id)
            .bind(movement.created_by.map(|user| user.0))
            .bind(now.to_rfc3339()),
        )
        .await?;
    Ok(StockMovement {
        id: StockMovementId(result.last_insert_rowid()),
        company_id,
        product_id: movement.product_id,
        movement_type: movement.movement_type,
        qty: movement.qty,
        reason: movement.reason.clone(),
        ref_type: Some(movement.ref_type),
        ref_id: movement.ref_id,
        created_by: movement.created_by,
        created_at: now,
    })
}

fn log_sale_created(sale: &Sale) {
    info!(
        event_name = "sale.created",
        company_id = sale.company_id.0,
        sale_id = sale.id.0,
        code = %sale.code,
        budget_id = sale.budget_id.map(|id| id.0),
        total = %sale.total,
        "sale created"
    );
}

fn row_to_sale(row: &SqliteRow, items: Vec<LineItem>) -> Result<Sale, RepositoryError> {
    Ok(Sale {
        id: SaleId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        code: column(row, "code")?,
        budget_id: column::<Option<i64>>(row, "budget_id")?.map(BudgetId),
        customer_id: CustomerId(column(row, "customer_id")?),
        status: enum_column(row, "status", SaleStatus::parse)?,
        total: decimal_column(row, "total")?,
        created_by: column::<Option<i64>>(row, "created_by")?.map(UserId),
        created_at: timestamp_column(row, "created_at")?,
        items,
    })
}

fn row_to_movement(row: &SqliteRow) -> Result<StockMovement, RepositoryError> {
    let ref_type = column::<Option<String>>(row, "ref_type")?
        .map(|raw| {
            RefType::parse(&raw)
                .ok_or_else(|| RepositoryError::Decode(format!("ref_type: unknown value `{raw}`")))
        })
        .transpose()?;
    Ok(StockMovement {
        id: StockMovementId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        product_id: ProductId(column(row, "product_id")?),
        movement_type: enum_column(row, "movement_type", MovementType::parse)?,
        qty: decimal_column(row, "qty")?,
        reason: column(row, "reason")?,
        ref_type,
        ref_id: column(row, "ref_id")?,
        created_by: column::<Option<i64>>(row, "created_by")?.map(UserId),
        created_at: timestamp_column(row, "created_at")?,
    })
}
