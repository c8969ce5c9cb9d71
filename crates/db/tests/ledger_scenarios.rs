use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use tempfile::TempDir;

use gestflow_core::config::AppConfig;
use gestflow_core::domain::budget::BudgetStatus;
use gestflow_core::domain::catalog::{ItemRef, ItemType, NewCatalogItem};
use gestflow_core::domain::customer::CustomerId;
use gestflow_core::domain::finance::{
    PaymentMethod, PaymentOrigin, PaymentRequest, SettlementStatus,
};
use gestflow_core::domain::sale::{SaleLineRequest, SaleOptions, SaleStatus};
use gestflow_core::domain::stock::{MovementType, StockMovement};
use gestflow_core::domain::tenancy::CompanyId;
use gestflow_core::errors::{ApplicationError, DomainError};
use gestflow_db::repositories::sale::ManualMovement;
use gestflow_db::repositories::sequence::next_number;
use gestflow_db::{
    connect_with_settings, migrations, CatalogRegistry, FinancialLedger, Gateway, QuoteEngine,
    SaleLedger, TenantRegistry,
};

type ScenarioResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

struct Ledger {
    gateway: Gateway,
    company: CompanyId,
    customer: CustomerId,
    catalog: CatalogRegistry,
    quotes: QuoteEngine,
    sales: SaleLedger,
    finance: FinancialLedger,
}

fn err(error: impl std::fmt::Display) -> String {
    error.to_string()
}

async fn ledger_on(database_url: &str, max_connections: u32) -> ScenarioResult<Ledger> {
    let pool = connect_with_settings(database_url, max_connections, 10).await.map_err(err)?;
    migrations::run_pending(&pool).await.map_err(err)?;
    let gateway = Gateway::new(pool);
    let business = AppConfig::default().business;

    let company = TenantRegistry::new(gateway.clone()).create_company("Acme").await.map_err(err)?.id;
    let catalog = CatalogRegistry::new(gateway.clone());
    let customer = catalog.create_customer(company, "Maria", None).await.map_err(err)?.id;

    Ok(Ledger {
        gateway: gateway.clone(),
        company,
        customer,
        catalog,
        quotes: QuoteEngine::new(gateway.clone(), business.clone()),
        sales: SaleLedger::new(gateway.clone(), business),
        finance: FinancialLedger::new(gateway),
    })
}

async fn memory_ledger() -> ScenarioResult<Ledger> {
    ledger_on("sqlite::memory:", 1).await
}

impl Ledger {
    async fn product(&self, code: &str, price: Decimal) -> ScenarioResult<ItemRef> {
        let item = self
            .catalog
            .create_item(
                self.company,
                NewCatalogItem {
                    item_type: ItemType::Product,
                    code: code.to_string(),
                    name: format!("Product {code}"),
                    price,
                },
            )
            .await
            .map_err(err)?;
        Ok(item.item)
    }

    async fn restock(&self, item: ItemRef, qty: i64) -> ScenarioResult {
        let product_id = item.product_id().ok_or("not a product")?;
        self.sales
            .record_manual_movement(
                self.company,
                ManualMovement {
                    product_id,
                    movement_type: MovementType::In,
                    qty: Decimal::from(qty),
                    reason: Some("opening stock".to_string()),
                    created_by: None,
                },
            )
            .await
            .map_err(err)?;
        Ok(())
    }

    async fn stock(&self, item: ItemRef) -> ScenarioResult<Decimal> {
        let product_id = item.product_id().ok_or("not a product")?;
        self.sales.current_stock(self.company, product_id).await.map_err(err)
    }

    async fn count(&self, table: &str) -> ScenarioResult<i64> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {table}"))
            .fetch_one(self.gateway.pool())
            .await
            .map_err(err)?;
        Ok(row.get::<i64, _>("count"))
    }
}

fn due_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 30).unwrap_or_default()
}

fn lines(item: ItemRef, qty: i64) -> Vec<SaleLineRequest> {
    vec![SaleLineRequest { item, qty: Decimal::from(qty) }]
}

#[tokio::test]
async fn direct_sale_with_override_drives_stock_negative() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::new(100, 1)).await?;

    let sale = ledger
        .sales
        .create_direct_sale(
            ledger.company,
            ledger.customer,
            lines(p001, 3),
            SaleOptions { allow_negative_stock: true, ..SaleOptions::default() },
        )
        .await
        .map_err(err)?;

    require_eq!(sale.total, Decimal::new(300, 1));
    require_eq!(sale.status, SaleStatus::Open);
    require!(sale.code.starts_with("VEN-"), "unexpected sale code {}", sale.code);

    let product_id = p001.product_id().ok_or("not a product")?;
    let movements = ledger.sales.list_movements(ledger.company, product_id).await.map_err(err)?;
    require_eq!(movements.len(), 1);
    require_eq!(movements[0].movement_type, MovementType::Sale);
    require_eq!(movements[0].qty, Decimal::from(3));
    require_eq!(movements[0].ref_id, Some(sale.id.0));
    require_eq!(ledger.stock(p001).await?, Decimal::from(-3));
    Ok(())
}

#[tokio::test]
async fn failed_stock_check_leaves_nothing_behind() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::TEN).await?;
    let p002 = ledger.product("P002", Decimal::ONE).await?;
    ledger.restock(p001, 5).await?;
    ledger.restock(p002, 1).await?;

    let items = vec![
        SaleLineRequest { item: p001, qty: Decimal::from(2) },
        SaleLineRequest { item: p002, qty: Decimal::from(2) },
    ];
    let error = ledger
        .sales
        .create_direct_sale(ledger.company, ledger.customer, items, SaleOptions::default())
        .await;

    require!(
        matches!(error, Err(ApplicationError::Domain(DomainError::Validation(_)))),
        "expected a stock validation error, got {error:?}"
    );
    require_eq!(ledger.count("sales").await?, 0);
    require_eq!(ledger.count("sale_items").await?, 0);
    require_eq!(ledger.count("stock_movements").await?, 2);
    require_eq!(ledger.count("sequences").await?, 0);
    require_eq!(ledger.stock(p001).await?, Decimal::from(5));
    Ok(())
}

#[tokio::test]
async fn repeated_lines_of_one_product_are_checked_together() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::TEN).await?;
    ledger.restock(p001, 3).await?;

    let items = vec![
        SaleLineRequest { item: p001, qty: Decimal::from(2) },
        SaleLineRequest { item: p001, qty: Decimal::from(2) },
    ];
    let error = ledger
        .sales
        .create_direct_sale(ledger.company, ledger.customer, items, SaleOptions::default())
        .await;

    require!(error.is_err(), "4 units must not sell out of 3");
    require_eq!(ledger.stock(p001).await?, Decimal::from(3));
    Ok(())
}

#[tokio::test]
async fn concurrent_next_number_calls_get_consecutive_numbers() -> ScenarioResult {
    let dir = TempDir::new().map_err(err)?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
    let ledger = Arc::new(ledger_on(&url, 4).await?);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            let company = ledger.company;
            ledger
                .gateway
                .with_transaction(move |tx| {
                    Box::pin(async move { Ok(next_number(tx, company, "SALE", 2026).await?) })
                })
                .await
        }));
    }

    let mut issued = Vec::new();
    for handle in handles {
        issued.push(handle.await.map_err(err)?.map_err(err)?);
    }
    issued.sort_unstable();
    require_eq!(issued, vec![1, 2]);

    let stored = sqlx::query(
        "SELECT next_number FROM sequences WHERE company_id = ? AND key = 'SALE' AND year = 2026",
    )
    .bind(ledger.company.0)
    .fetch_one(ledger.gateway.pool())
    .await
    .map_err(err)?
    .get::<i64, _>("next_number");
    require_eq!(stored, 3);
    Ok(())
}

#[tokio::test]
async fn concurrent_sales_issue_distinct_codes() -> ScenarioResult {
    let dir = TempDir::new().map_err(err)?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());
    let ledger = Arc::new(ledger_on(&url, 4).await?);
    let p001 = ledger.product("P001", Decimal::TEN).await?;
    ledger.restock(p001, 100).await?;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger
                .sales
                .create_direct_sale(ledger.company, ledger.customer, lines(p001, 1), SaleOptions::default())
                .await
        }));
    }

    let mut codes = Vec::new();
    for handle in handles {
        codes.push(handle.await.map_err(err)?.map_err(err)?.code);
    }
    codes.sort();
    codes.dedup();
    require_eq!(codes.len(), 8);
    require_eq!(ledger.stock(p001).await?, Decimal::from(92));
    Ok(())
}

#[tokio::test]
async fn receivable_rejects_overpayment_and_keeps_balance() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::from(100)).await?;
    ledger.restock(p001, 1).await?;

    let sale = ledger
        .sales
        .create_direct_sale(
            ledger.company,
            ledger.customer,
            lines(p001, 1),
            SaleOptions { credit_due_date: Some(due_date()), ..SaleOptions::default() },
        )
        .await
        .map_err(err)?;
    let receivable = ledger
        .finance
        .list_open_receivables(ledger.company)
        .await
        .map_err(err)?
        .into_iter()
        .find(|receivable| receivable.sale_id == sale.id)
        .ok_or("credit sale should open a receivable")?;
    require_eq!(receivable.settlement.total, Decimal::from(100));

    let pay = |amount: i64| PaymentRequest {
        origin: PaymentOrigin::Receivable { id: receivable.id },
        amount: Decimal::from(amount),
        method: PaymentMethod::Cash,
        paid_at: Utc::now(),
        created_by: None,
        note: None,
    };

    ledger.finance.apply_payment(ledger.company, pay(60)).await.map_err(err)?;
    let after_first = ledger.finance.get_receivable(ledger.company, receivable.id).await.map_err(err)?;
    require_eq!(after_first.settlement.status, SettlementStatus::Partial);
    require_eq!(after_first.settlement.paid_total, Decimal::from(60));

    let rejected = ledger.finance.apply_payment(ledger.company, pay(50)).await;
    require!(
        matches!(rejected, Err(ApplicationError::Domain(DomainError::Validation(_)))),
        "overpayment must be rejected, got {rejected:?}"
    );
    let unchanged = ledger.finance.get_receivable(ledger.company, receivable.id).await.map_err(err)?;
    require_eq!(unchanged.settlement.paid_total, Decimal::from(60));
    require_eq!(ledger.count("payments").await?, 1);

    let unchanged_sale = ledger.sales.get(ledger.company, sale.id).await.map_err(err)?;
    require_eq!(unchanged_sale.status, SaleStatus::Open);
    Ok(())
}

#[tokio::test]
async fn approved_budget_becomes_one_sale_at_quoted_prices() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::new(1050, 2)).await?;
    ledger.restock(p001, 10).await?;

    let budget = ledger.quotes.create_draft(ledger.company, ledger.customer, None).await.map_err(err)?;
    ledger.quotes.add_item(ledger.company, budget.id, p001, Decimal::from(4)).await.map_err(err)?;

    let too_early = ledger
        .sales
        .create_sale_from_budget(ledger.company, budget.id, SaleOptions::default())
        .await;
    require!(
        matches!(too_early, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "draft budgets cannot be sold, got {too_early:?}"
    );

    ledger.quotes.transition(ledger.company, budget.id, BudgetStatus::Confirmed).await.map_err(err)?;
    ledger.quotes.transition(ledger.company, budget.id, BudgetStatus::Approved).await.map_err(err)?;
    ledger
        .catalog
        .update_item(
            ledger.company,
            p001,
            gestflow_core::domain::catalog::CatalogItemUpdate {
                price: Some(Decimal::from(99)),
                ..Default::default()
            },
        )
        .await
        .map_err(err)?;

    let sale = ledger
        .sales
        .create_sale_from_budget(ledger.company, budget.id, SaleOptions::default())
        .await
        .map_err(err)?;
    require_eq!(sale.total, Decimal::from(42));
    require_eq!(sale.budget_id, Some(budget.id));
    require_eq!(ledger.stock(p001).await?, Decimal::from(6));

    let second = ledger
        .sales
        .create_sale_from_budget(ledger.company, budget.id, SaleOptions::default())
        .await;
    require!(
        matches!(second, Err(ApplicationError::Domain(DomainError::Conflict(_)))),
        "a budget backs at most one live sale, got {second:?}"
    );

    ledger.sales.cancel_sale(ledger.company, sale.id, None).await.map_err(err)?;
    let again = ledger
        .sales
        .create_sale_from_budget(ledger.company, budget.id, SaleOptions::default())
        .await
        .map_err(err)?;
    require!(again.code != sale.code, "a new sale gets a new code");
    Ok(())
}

#[tokio::test]
async fn cancelling_a_sale_returns_stock_and_cancels_unpaid_receivable() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::from(20)).await?;
    ledger.restock(p001, 5).await?;

    let sale = ledger
        .sales
        .create_direct_sale(
            ledger.company,
            ledger.customer,
            lines(p001, 2),
            SaleOptions { credit_due_date: Some(due_date()), ..SaleOptions::default() },
        )
        .await
        .map_err(err)?;
    require_eq!(ledger.stock(p001).await?, Decimal::from(3));

    let cancelled = ledger.sales.cancel_sale(ledger.company, sale.id, None).await.map_err(err)?;
    require_eq!(cancelled.status, SaleStatus::Cancelled);
    require_eq!(ledger.stock(p001).await?, Decimal::from(5));
    require!(
        ledger.finance.list_open_receivables(ledger.company).await.map_err(err)?.is_empty(),
        "the sale's receivable should be cancelled"
    );

    let twice = ledger.sales.cancel_sale(ledger.company, sale.id, None).await;
    require!(
        matches!(twice, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "cancelled sales stay cancelled, got {twice:?}"
    );
    let pay_cancelled = ledger.sales.mark_paid(ledger.company, sale.id).await;
    require!(pay_cancelled.is_err(), "cancelled sales cannot be marked paid");
    Ok(())
}

#[tokio::test]
async fn sale_with_received_money_cannot_be_cancelled() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::from(50)).await?;
    ledger.restock(p001, 5).await?;
    let sale = ledger
        .sales
        .create_direct_sale(ledger.company, ledger.customer, lines(p001, 2), SaleOptions::default())
        .await
        .map_err(err)?;

    ledger
        .finance
        .apply_payment(
            ledger.company,
            PaymentRequest {
                origin: PaymentOrigin::SaleDirect { id: sale.id },
                amount: Decimal::from(30),
                method: PaymentMethod::Pix,
                paid_at: Utc::now(),
                created_by: None,
                note: None,
            },
        )
        .await
        .map_err(err)?;

    let refused = ledger.sales.cancel_sale(ledger.company, sale.id, None).await;
    require!(
        matches!(refused, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "partially paid sale must not be cancelled, got {refused:?}"
    );
    require_eq!(ledger.stock(p001).await?, Decimal::from(3));
    Ok(())
}

#[tokio::test]
async fn direct_payments_settle_the_sale_when_they_cover_its_total() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::from(40)).await?;
    ledger.restock(p001, 1).await?;
    let sale = ledger
        .sales
        .create_direct_sale(ledger.company, ledger.customer, lines(p001, 1), SaleOptions::default())
        .await
        .map_err(err)?;

    let pay = |amount: i64| PaymentRequest {
        origin: PaymentOrigin::SaleDirect { id: sale.id },
        amount: Decimal::from(amount),
        method: PaymentMethod::Card,
        paid_at: Utc::now(),
        created_by: None,
        note: None,
    };

    ledger.finance.apply_payment(ledger.company, pay(15)).await.map_err(err)?;
    let over = ledger.finance.apply_payment(ledger.company, pay(26)).await;
    require!(over.is_err(), "40 total with 15 paid accepts at most 25");

    ledger.finance.apply_payment(ledger.company, pay(25)).await.map_err(err)?;
    let paid = ledger.sales.get(ledger.company, sale.id).await.map_err(err)?;
    require_eq!(paid.status, SaleStatus::Paid);

    let after_paid = ledger.finance.apply_payment(ledger.company, pay(1)).await;
    require!(
        matches!(after_paid, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "paid sales accept no more direct payments, got {after_paid:?}"
    );
    Ok(())
}

#[tokio::test]
async fn manual_out_movements_respect_available_stock() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::ONE).await?;
    ledger.restock(p001, 2).await?;
    let product_id = p001.product_id().ok_or("not a product")?;

    let withdraw = |qty: i64| ManualMovement {
        product_id,
        movement_type: MovementType::Out,
        qty: Decimal::from(qty),
        reason: Some("breakage".to_string()),
        created_by: None,
    };

    let refused = ledger.sales.record_manual_movement(ledger.company, withdraw(3)).await;
    require!(refused.is_err(), "3 out of 2 must be refused");
    ledger.sales.record_manual_movement(ledger.company, withdraw(2)).await.map_err(err)?;
    require_eq!(ledger.stock(p001).await?, Decimal::ZERO);

    let sale_kind = ManualMovement { movement_type: MovementType::Sale, ..withdraw(1) };
    let invalid = ledger.sales.record_manual_movement(ledger.company, sale_kind).await;
    require!(
        matches!(invalid, Err(ApplicationError::Domain(DomainError::Validation(_)))),
        "sale movements only come from sales, got {invalid:?}"
    );
    Ok(())
}

#[tokio::test]
async fn each_product_line_writes_its_own_stock_movement() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::TEN).await?;
    ledger.restock(p001, 5).await?;
    let product_id = p001.product_id().ok_or("not a product")?;

    let items = vec![
        SaleLineRequest { item: p001, qty: Decimal::ONE },
        SaleLineRequest { item: p001, qty: Decimal::from(2) },
    ];
    let sale = ledger
        .sales
        .create_direct_sale(ledger.company, ledger.customer, items, SaleOptions::default())
        .await
        .map_err(err)?;
    require_eq!(sale.items.len(), 2);

    let quantities_of = |kind: MovementType, movements: &[StockMovement]| {
        movements
            .iter()
            .filter(|movement| movement.movement_type == kind && movement.ref_id == Some(sale.id.0))
            .map(|movement| movement.qty)
            .collect::<Vec<_>>()
    };

    let movements = ledger.sales.list_movements(ledger.company, product_id).await.map_err(err)?;
    let withdrawn = quantities_of(MovementType::Sale, &movements);
    require_eq!(withdrawn.len(), sale.items.len());
    require!(
        withdrawn.contains(&Decimal::ONE) && withdrawn.contains(&Decimal::from(2)),
        "movements should follow the sale lines, got {withdrawn:?}"
    );
    require_eq!(ledger.stock(p001).await?, Decimal::from(2));

    ledger.sales.cancel_sale(ledger.company, sale.id, None).await.map_err(err)?;
    let movements = ledger.sales.list_movements(ledger.company, product_id).await.map_err(err)?;
    let returned = quantities_of(MovementType::In, &movements);
    require_eq!(returned.len(), sale.items.len());
    require_eq!(ledger.stock(p001).await?, Decimal::from(5));
    Ok(())
}

#[tokio::test]
async fn credit_sale_is_not_collected_a_second_time_directly() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::from(100)).await?;
    ledger.restock(p001, 1).await?;
    let sale = ledger
        .sales
        .create_direct_sale(
            ledger.company,
            ledger.customer,
            lines(p001, 1),
            SaleOptions { credit_due_date: Some(due_date()), ..SaleOptions::default() },
        )
        .await
        .map_err(err)?;
    let receivable = ledger
        .finance
        .list_open_receivables(ledger.company)
        .await
        .map_err(err)?
        .into_iter()
        .find(|receivable| receivable.sale_id == sale.id)
        .ok_or("credit sale should open a receivable")?;

    let pay = |origin: PaymentOrigin| PaymentRequest {
        origin,
        amount: Decimal::from(100),
        method: PaymentMethod::Pix,
        paid_at: Utc::now(),
        created_by: None,
        note: None,
    };

    ledger
        .finance
        .apply_payment(ledger.company, pay(PaymentOrigin::Receivable { id: receivable.id }))
        .await
        .map_err(err)?;
    let direct = ledger
        .finance
        .apply_payment(ledger.company, pay(PaymentOrigin::SaleDirect { id: sale.id }))
        .await;
    require!(
        matches!(direct, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "a sale with a receivable is paid through it, got {direct:?}"
    );
    require_eq!(ledger.count("payments").await?, 1);
    require_eq!(ledger.sales.get(ledger.company, sale.id).await.map_err(err)?.status, SaleStatus::Open);
    Ok(())
}

#[tokio::test]
async fn directly_paid_sale_cannot_open_a_receivable() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::from(100)).await?;
    ledger.restock(p001, 1).await?;
    let sale = ledger
        .sales
        .create_direct_sale(ledger.company, ledger.customer, lines(p001, 1), SaleOptions::default())
        .await
        .map_err(err)?;

    let pay = |amount: i64| PaymentRequest {
        origin: PaymentOrigin::SaleDirect { id: sale.id },
        amount: Decimal::from(amount),
        method: PaymentMethod::Cash,
        paid_at: Utc::now(),
        created_by: None,
        note: None,
    };

    ledger.finance.apply_payment(ledger.company, pay(30)).await.map_err(err)?;
    let partly_paid =
        ledger.finance.open_receivable(ledger.company, sale.id, due_date(), Decimal::from(70)).await;
    require!(
        matches!(partly_paid, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "a sale paid directly takes no receivable, got {partly_paid:?}"
    );

    ledger.finance.apply_payment(ledger.company, pay(70)).await.map_err(err)?;
    let settled =
        ledger.finance.open_receivable(ledger.company, sale.id, due_date(), Decimal::from(100)).await;
    require!(
        matches!(settled, Err(ApplicationError::Domain(DomainError::InvalidState(_)))),
        "a paid sale takes no receivable, got {settled:?}"
    );
    require_eq!(ledger.count("accounts_receivable").await?, 0);
    Ok(())
}

#[tokio::test]
async fn another_company_cannot_sell_or_quote_foreign_items() -> ScenarioResult {
    let ledger = memory_ledger().await?;
    let p001 = ledger.product("P001", Decimal::TEN).await?;
    ledger.restock(p001, 5).await?;

    let other = TenantRegistry::new(ledger.gateway.clone())
        .create_company("Beta")
        .await
        .map_err(err)?
        .id;
    let other_customer = ledger.catalog.create_customer(other, "Joao", None).await.map_err(err)?.id;

    let budget = ledger.quotes.create_draft(other, other_customer, None).await.map_err(err)?;
    let quoted = ledger.quotes.add_item(other, budget.id, p001, Decimal::ONE).await;
    require!(
        matches!(quoted, Err(ApplicationError::Domain(DomainError::NotFound { .. }))),
        "foreign catalog items are invisible to budgets, got {quoted:?}"
    );

    let sold = ledger
        .sales
        .create_direct_sale(other, other_customer, lines(p001, 1), SaleOptions::default())
        .await;
    require!(
        matches!(sold, Err(ApplicationError::Domain(DomainError::NotFound { .. }))),
        "foreign catalog items are invisible to sales, got {sold:?}"
    );

    require_eq!(ledger.count("budget_items").await?, 0);
    require_eq!(ledger.count("sales").await?, 0);
    require_eq!(ledger.count("sale_items").await?, 0);
    require_eq!(ledger.count("stock_movements").await?, 1);
    require_eq!(ledger.stock(p001).await?, Decimal::from(5));
    Ok(())
}
