use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use tracing::info;

use gestflow_core::config::BusinessConfig;
use gestflow_core::domain::budget::{Budget, BudgetId, BudgetItemId, BudgetStatus};
use gestflow_core::domain::catalog::{normalize_code, ItemRef, ItemType};
use gestflow_core::domain::customer::CustomerId;
use gestflow_core::domain::line::{document_total, line_subtotal, validate_qty, LineItem, PricedLine};
use gestflow_core::domain::sequence::DocumentKind;
use gestflow_core::domain::tenancy::{CompanyId, UserId};
use gestflow_core::errors::{ApplicationError, DomainError};

use super::{column, decimal_column, enum_column, timestamp_column, RepositoryError};
use crate::gateway::{Gateway, TxHandle};
use crate::repositories::catalog::{load_active_customer, load_active_item};
use crate::repositories::sequence::allocate_document_code;
use crate::repositories::tenancy::ensure_member;

/// Builds quotes from catalog lines and drives their lifecycle.
#[derive(Clone)]
pub struct QuoteEngine {
    gateway: Gateway,
    business: BusinessConfig,
}

impl QuoteEngine {
    pub fn new(gateway: Gateway, business: BusinessConfig) -> Self {
        Self { gateway, business }
    }

    pub async fn create_draft(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
        created_by: Option<UserId>,
    ) -> Result<Budget, ApplicationError> {
        let business = self.business.clone();
        let budget = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_member(tx, company_id, created_by).await?;
                    load_active_customer(tx, company_id, customer_id).await?;
                    let now = Utc::now();
                    let code =
                        allocate_document_code(tx, company_id, DocumentKind::Budget, &business, now)
                            .await?;
                    let result = tx
                        .execute(
                            sqlx::query(
                                "INSERT INTO budgets
                                    (company_id, code, customer_id, status, total, created_by,
                                     created_at, updated_at)
                                 VALUES (?, ?, ?, 'draft', ?, ?, ?, ?)",
                            )
                            .bind(company_id.0)
                            .bind(&code)
                            .bind(customer_id.0)
                            .bind(Decimal::ZERO.to_string())
                            .bind(created_by.map(|user| user.0))
                            .bind(now.to_rfc3339())
                            .bind(now.to_rfc3339()),
                        )
                        .await?;
                    Ok(Budget {
                        id: BudgetId(result.last_insert_rowid()),
                        company_id,
                        code,
                        customer_id,
                        status: BudgetStatus::Draft,
                        total: Decimal::ZERO,
                        created_by,
                        created_at: now,
                        updated_at: now,
                        items: Vec::new(),
                    })
                })
            })
            .await?;

        info!(
            event_name = "budget.created",
            company_id = company_id.0,
            budget_id = budget.id.0,
            code = %budget.code,
            "draft budget created"
        );
        Ok(budget)
    }

    /// Prices `qty` of a catalog item onto a draft budget, freezing name and price.
    pub async fn add_item(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
        item: ItemRef,
        qty: Decimal,
    ) -> Result<Budget, ApplicationError> {
        let qty = validate_qty(qty)?;
        let budget = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let budget = load_budget(tx, company_id, budget_id).await?;
                    budget.ensure_editable()?;
                    let entry = load_active_item(tx, company_id, item).await?;
                    let line = PricedLine::from_catalog(&entry, qty)?;
                    insert_budget_line(tx, company_id, budget_id, &line).await?;
                    recompute_total(tx, company_id, budget_id).await
                })
            })
            .await?;

        info!(
            event_name = "budget.item_added",
            company_id = company_id.0,
            budget_id = budget_id.0,
            item_type = item.item_type().as_str(),
            item_id = item.raw_id(),
            total = %budget.total,
            "budget item added"
        );
        Ok(budget)
    }

    pub async fn remove_item(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
        item_id: BudgetItemId,
    ) -> Result<Budget, ApplicationError> {
        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let budget = load_budget(tx, company_id, budget_id).await?;
                    budget.ensure_editable()?;
                    let result = tx
                        .execute(
                            sqlx::query(
                                "DELETE FROM budget_items
                                 WHERE id = ? AND budget_id = ? AND company_id = ?",
                            )
                            .bind(item_id.0)
                            .bind(budget_id.0)
                            .bind(company_id.0),
                        )
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DomainError::not_found("budget item", item_id.0).into());
                    }
                    recompute_total(tx, company_id, budget_id).await
                })
            })
            .await
    }

    pub async fn update_item_qty(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
        item_id: BudgetItemId,
        qty: Decimal,
    ) -> Result<Budget, ApplicationError> {
        let qty = validate_qty(qty)?;
        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let budget = load_budget(tx, company_id, budget_id).await?;
                    budget.ensure_editable()?;
                    let line = budget
                        .items
                        .iter()
                        .find(|line| line.id == item_id.0)
                        .ok_or_else(|| DomainError::not_found("budget item", item_id.0))?;
                    let subtotal = line_subtotal(line.unit_price, qty);
                    tx.execute(
                        sqlx::query(
                            "UPDATE budget_items SET qty = ?, subtotal = ?
                             WHERE id = ? AND budget_id = ? AND company_id = ?",
                        )
                        .bind(qty.to_string())
                        .bind(subtotal.to_string())
                        .bind(item_id.0)
                        .bind(budget_id.0)
                        .bind(company_id.0),
                    )
                    .await?;
                    recompute_total(tx, company_id, budget_id).await
                })
            })
            .await
    }

    pub async fn transition(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
        next: BudgetStatus,
    ) -> Result<Budget, ApplicationError> {
        let (from, budget) = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut budget = load_budget(tx, company_id, budget_id).await?;
                    let from = budget.status;
                    budget.transition_to(next)?;
                    let now = Utc::now();
                    let result = tx
                        .execute(
                            sqlx::query(
                                "UPDATE budgets SET status = ?, updated_at = ?
                                 WHERE id = ? AND company_id = ? AND status = ?",
                            )
                            .bind(next.as_str())
                            .bind(now.to_rfc3339())
                            .bind(budget_id.0)
                            .bind(company_id.0)
                            .bind(from.as_str()),
                        )
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DomainError::Conflict(format!(
                            "budget {} changed while transitioning",
                            budget.code
                        ))
                        .into());
                    }
                    budget.updated_at = now;
                    Ok((from, budget))
                })
            })
            .await?;

        info!(
            event_name = "budget.transitioned",
            company_id = company_id.0,
            budget_id = budget_id.0,
            from = from.as_str(),
            to = next.as_str(),
            "budget status changed"
        );
        Ok(budget)
    }

    pub async fn get(
        &self,
        company_id: CompanyId,
        budget_id: BudgetId,
    ) -> Result<Budget, ApplicationError> {
        self.gateway.with_read(move |tx| Box::pin(load_budget(tx, company_id, budget_id))).await
    }

    pub async fn find_by_code(
        &self,
        company_id: CompanyId,
        code: &str,
    ) -> Result<Budget, ApplicationError> {
        let code = normalize_code(code)?;
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let row = tx
                        .query_optional(
                            sqlx::query("SELECT id FROM budgets WHERE company_id = ? AND code = ?")
                                .bind(company_id.0)
                                .bind(&code),
                        )
                        .await?;
                    let Some(row) = row else {
                        return Err(DomainError::not_found("budget", code).into());
                    };
                    load_budget(tx, company_id, BudgetId(column(&row, "id")?)).await
                })
            })
            .await
    }

    /// Budgets of a company, newest first, optionally filtered by status.
    pub async fn list(
        &self,
        company_id: CompanyId,
        status: Option<BudgetStatus>,
    ) -> Result<Vec<Budget>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id FROM budgets
                                 WHERE company_id = ? AND (? IS NULL OR status = ?)
                                 ORDER BY id DESC",
                            )
                            .bind(company_id.0)
                            .bind(status.map(|status| status.as_str()))
                            .bind(status.map(|status| status.as_str())),
                        )
                        .await?;
                    let mut budgets = Vec::with_capacity(rows.len());
                    for row in &rows {
                        budgets.push(load_budget(tx, company_id, BudgetId(column(row, "id")?)).await?);
                    }
                    Ok(budgets)
                })
            })
            .await
    }

    pub fn valid_until(&self, budget: &Budget) -> NaiveDate {
        budget.valid_until(self.business.budget_validity_days, self.business.offset())
    }
}

pub(crate) async fn load_budget(
    tx: &mut TxHandle,
    company_id: CompanyId,
    budget_id: BudgetId,
) -> Result<Budget, ApplicationError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, code, customer_id, status, total, created_by,
                        created_at, updated_at
                 FROM budgets WHERE id = ? AND company_id = ?",
            )
            .bind(budget_id.0)
            .bind(company_id.0),
        )
        .await?;
    let Some(row) = row else {
        return Err(DomainError::not_found("budget", budget_id.0).into());
    };

    let item_rows = tx
        .query_all(
            sqlx::query(
                "SELECT id, item_type, item_id, description_snapshot, unit_price, qty, subtotal
                 FROM budget_items WHERE budget_id = ? AND company_id = ?
                 ORDER BY id",
            )
            .bind(budget_id.0)
            .bind(company_id.0),
        )
        .await?;
    let items = item_rows.iter().map(row_to_line).collect::<Result<Vec<_>, _>>()?;

    Ok(row_to_budget(&row, items)?)
}

async fn insert_budget_line(
    tx: &mut TxHandle,
    company_id: CompanyId,
    budget_id: BudgetId,
    line: &PricedLine,
) -> Result<(), RepositoryError> {
    tx.execute(
        sqlx::query(
            "INSERT INTO budget_items
                (company_id, budget_id, item_type, item_id, description_snapshot,
                 unit_price, qty, subtotal)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(company_id.0)
        .bind(budget_id.0)
        .bind(line.item.item_type().as_str())
        .bind(line.item.raw_id())
        .bind(&line.description_snapshot)
        .bind(line.unit_price.to_string())
        .bind(line.qty.to_string())
        .bind(line.subtotal.to_string()),
    )
    .await?;
    Ok(())
}

/// Rewrites `budgets.total` from the live item subtotals and returns the refreshed budget.
async fn recompute_total(
    tx: &mut TxHandle,
    company_id: CompanyId,
    budget_id: BudgetId,
) -> Result<Budget, ApplicationError> {
    let mut budget = load_budget(tx, company_id, budget_id).await?;
    let total = document_total(budget.items.iter().map(|line| &line.subtotal));
    let now = Utc::now();
    tx.execute(
        sqlx::query("UPDATE budgets SET total = ?, updated_at = ? WHERE id = ? AND company_id = ?")
            .bind(total.to_string())
            .bind(now.to_rfc3339())
            .bind(budget_id.0)
            .bind(company_id.0),
    )
    .await?;
    budget.total = total;
    budget.updated_at = now;
    Ok(budget)
}

pub(crate) fn row_to_line(row: &SqliteRow) -> Result<LineItem, RepositoryError> {
    let item_type = enum_column(row, "item_type", ItemType::parse)?;
    Ok(LineItem {
        id: column(row, "id")?,
        item: ItemRef::from_parts(item_type, column(row, "item_id")?),
        description_snapshot: column(row, "description_snapshot")?,
        unit_price: decimal_column(row, "unit_price")?,
        qty: decimal_column(row, "qty")?,
        subtotal: decimal_column(row, "subtotal")?,
    })
}

fn row_to_budget(row: &SqliteRow, items: Vec<LineItem>) -> Result<Budget, RepositoryError> {
    Ok(Budget {
        id: BudgetId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        code: column(row, "code")?,
        customer_id: CustomerId(column(row, "customer_id")?),
        status: enum_column(row, "status", BudgetStatus::parse)?,
        total: decimal_column(row, "total")?,
        created_by: column::<Option<i64>>(row, "created_by")?.map(UserId),
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
        items,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use gestflow_core::config::AppConfig;
    use gestflow_core::domain::budget::{BudgetItemId, BudgetStatus};
    use gestflow_core::domain::catalog::{ItemRef, ItemType, NewCatalogItem};
    use gestflow_core::domain::customer::CustomerId;
    use gestflow_core::domain::tenancy::CompanyId;
    use gestflow_core::errors::{ApplicationError, DomainError};

    use super::QuoteEngine;
    use crate::gateway::Gateway;
    use crate::repositories::{CatalogRegistry, TenantRegistry};
    use crate::{connect_with_settings, migrations};

    struct Fixture {
        company: CompanyId,
        customer: CustomerId,
        product: ItemRef,
        service: ItemRef,
        catalog: CatalogRegistry,
        engine: QuoteEngine,
    }

    async fn fixture() -> Fixture {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let gateway = Gateway::new(pool);
        let tenants = TenantRegistry::new(gateway.clone());
        let catalog = CatalogRegistry::new(gateway.clone());
        let company = tenants.create_company("Acme").await.expect("company").id;
        let customer = catalog.create_customer(company, "Maria", None).await.expect("customer").id;
        let product = catalog
            .create_item(
                company,
                NewCatalogItem {
                    item_type: ItemType::Product,
                    code: "P001".to_string(),
                    name: "Cement".to_string(),
                    price: Decimal::new(1050, 2),
                },
            )
            .await
            .expect("product")
            .item;
        let service = catalog
            .create_item(
                company,
                NewCatalogItem {
                    item_type: ItemType::Service,
                    code: "S001".to_string(),
                    name: "Delivery".to_string(),
                    price: Decimal::new(2500, 2),
                },
            )
            .await
            .expect("service")
            .item;
        let engine = QuoteEngine::new(gateway, AppConfig::default().business);
        Fixture { company, customer, product, service, catalog, engine }
    }

    #[tokio::test]
    async fn total_tracks_item_subtotals_through_every_mutation() {
        let f = fixture().await;
        let draft = f.engine.create_draft(f.company, f.customer, None).await.expect("draft");
        assert!(draft.code.starts_with("ORC-"));
        assert_eq!(draft.total, Decimal::ZERO);

        let budget =
            f.engine.add_item(f.company, draft.id, f.product, Decimal::from(3)).await.expect("add");
        assert_eq!(budget.total, Decimal::new(3150, 2));

        let budget =
            f.engine.add_item(f.company, draft.id, f.service, Decimal::ONE).await.expect("add");
        assert_eq!(budget.total, Decimal::new(5650, 2));
        assert_eq!(budget.total, budget.items_total());

        let product_line = BudgetItemId(budget.items[0].id);
        let budget = f
            .engine
            .update_item_qty(f.company, draft.id, product_line, Decimal::new(15, 1))
            .await
            .expect("update qty");
        assert_eq!(budget.items[0].subtotal, Decimal::new(1575, 2));
        assert_eq!(budget.total, budget.items_total());

        let budget = f.engine.remove_item(f.company, draft.id, product_line).await.expect("remove");
        assert_eq!(budget.items.len(), 1);
        assert_eq!(budget.total, Decimal::new(2500, 2));

        let stored = f.engine.get(f.company, draft.id).await.expect("reload");
        assert_eq!(stored.total, budget.total);
    }

    #[tokio::test]
    async fn lines_keep_the_price_quoted_when_added() {
        let f = fixture().await;
        let draft = f.engine.create_draft(f.company, f.customer, None).await.expect("draft");
        f.engine.add_item(f.company, draft.id, f.product, Decimal::ONE).await.expect("add");

        f.catalog
            .update_item(
                f.company,
                f.product,
                gestflow_core::domain::catalog::CatalogItemUpdate {
                    price: Some(Decimal::new(9900, 2)),
                    ..Default::default()
                },
            )
            .await
            .expect("reprice");

        let budget = f.engine.get(f.company, draft.id).await.expect("reload");
        assert_eq!(budget.items[0].unit_price, Decimal::new(1050, 2));
        assert_eq!(budget.items[0].description_snapshot, "Cement");
    }

    #[tokio::test]
    async fn invalid_quantities_and_inactive_items_are_rejected() {
        let f = fixture().await;
        let draft = f.engine.create_draft(f.company, f.customer, None).await.expect("draft");

        let zero = f.engine.add_item(f.company, draft.id, f.product, Decimal::ZERO).await;
        assert!(matches!(zero, Err(ApplicationError::Domain(DomainError::Validation(_)))));

        f.catalog.deactivate_item(f.company, f.service).await.expect("deactivate");
        let inactive = f.engine.add_item(f.company, draft.id, f.service, Decimal::ONE).await;
        assert!(matches!(inactive, Err(ApplicationError::Domain(DomainError::NotFound { .. }))));

        let unchanged = f.engine.get(f.company, draft.id).await.expect("reload");
        assert!(unchanged.items.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_is_enforced_and_freezes_items() {
        let f = fixture().await;
        let draft = f.engine.create_draft(f.company, f.customer, None).await.expect("draft");

        let empty = f.engine.transition(f.company, draft.id, BudgetStatus::Confirmed).await;
        assert!(matches!(empty, Err(ApplicationError::Domain(DomainError::Validation(_)))));

        let skip = f.engine.transition(f.company, draft.id, BudgetStatus::Approved).await;
        assert!(matches!(
            skip,
            Err(ApplicationError::Domain(DomainError::InvalidBudgetTransition { .. }))
        ));

        f.engine.add_item(f.company, draft.id, f.product, Decimal::TWO).await.expect("add");
        let confirmed =
            f.engine.transition(f.company, draft.id, BudgetStatus::Confirmed).await.expect("confirm");
        assert_eq!(confirmed.status, BudgetStatus::Confirmed);

        let frozen = f.engine.add_item(f.company, draft.id, f.product, Decimal::ONE).await;
        assert!(matches!(frozen, Err(ApplicationError::Domain(DomainError::InvalidState(_)))));

        f.engine.transition(f.company, draft.id, BudgetStatus::Approved).await.expect("approve");
        let reopen = f.engine.transition(f.company, draft.id, BudgetStatus::Draft).await;
        assert!(reopen.is_err());

        let approved =
            f.engine.list(f.company, Some(BudgetStatus::Approved)).await.expect("list approved");
        assert_eq!(approved.len(), 1);
        assert!(f.engine.list(f.company, Some(BudgetStatus::Draft)).await.expect("list").is_empty());

        let by_code = f.engine.find_by_code(f.company, &draft.code.to_lowercase()).await.expect("code");
        assert_eq!(by_code.id, draft.id);
    }

    #[tokio::test]
    async fn budgets_are_invisible_to_other_companies() {
        let f = fixture().await;
        let draft = f.engine.create_draft(f.company, f.customer, None).await.expect("draft");

        let foreign = f.engine.get(CompanyId(f.company.0 + 1), draft.id).await;
        assert!(matches!(foreign, Err(ApplicationError::Domain(DomainError::NotFound { .. }))));
    }

    #[tokio::test]
    async fn valid_until_counts_days_from_creation() {
        let f = fixture().await;
        let draft = f.engine.create_draft(f.company, f.customer, None).await.expect("draft");
        let offset = AppConfig::default().business.offset();
        let created_local = draft.created_at.with_timezone(&offset).date_naive();

        assert_eq!(f.engine.valid_until(&draft), created_local + chrono::Duration::days(7));
    }
}
