use std::str::FromStr;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use gestflow_core::config::SeedConfig;
use gestflow_core::domain::catalog::ItemType;
use gestflow_core::domain::tenancy::{Company, CompanyId, UserRole};
use gestflow_core::errors::{ApplicationError, DomainError};

use crate::gateway::{Gateway, TxHandle};
use crate::repositories::tenancy::{find_user, first_company, insert_company, insert_user};

/// Starter catalog loaded by `seed --demo`, keyed by code so reloading is a no-op.
const DEMO_ITEMS: &[DemoItem] = &[
    DemoItem { item_type: ItemType::Product, code: "P001", name: "Cement 50kg", price: "10.00" },
    DemoItem { item_type: ItemType::Product, code: "P002", name: "Sand m3", price: "85.50" },
    DemoItem { item_type: ItemType::Product, code: "P003", name: "Brick (unit)", price: "0.95" },
    DemoItem { item_type: ItemType::Service, code: "S001", name: "Delivery", price: "25.00" },
];

const DEMO_CUSTOMERS: &[&str] = &["Walk-in customer", "Maria Souza"];

struct DemoItem {
    item_type: ItemType,
    code: &'static str,
    name: &'static str,
    price: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub company_id: i64,
    pub company_name: String,
    pub company_created: bool,
    pub owner_created: bool,
    pub demo_items_created: usize,
    pub demo_customers_created: usize,
}

/// Bootstraps the first tenant: a company when none exists and an owner user for the configured
/// chat identity. Every step checks before inserting, so running it again changes nothing.
pub struct TenantSeed;

impl TenantSeed {
    pub async fn load(
        gateway: &Gateway,
        seed: &SeedConfig,
        with_demo: bool,
    ) -> Result<SeedResult, ApplicationError> {
        let seed = seed.clone();
        let result = gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let (company, company_created) = match first_company(tx).await? {
                        Some(company) => (company, false),
                        None => (insert_company(tx, seed.company_name.trim().to_string()).await?, true),
                    };

                    let owner_created = match seed.owner_chat_identity.as_deref().map(str::trim) {
                        Some(identity) if !identity.is_empty() => {
                            ensure_owner(tx, &company, identity, seed.owner_name.trim()).await?
                        }
                        _ => false,
                    };

                    let (demo_items_created, demo_customers_created) = if with_demo {
                        load_demo_dataset(tx, company.id).await?
                    } else {
                        (0, 0)
                    };

                    Ok(SeedResult {
                        company_id: company.id.0,
                        company_name: company.name,
                        company_created,
                        owner_created,
                        demo_items_created,
                        demo_customers_created,
                    })
                })
            })
            .await?;

        info!(
            event_name = "seed.completed",
            company_id = result.company_id,
            company_created = result.company_created,
            owner_created = result.owner_created,
            demo_items_created = result.demo_items_created,
            "tenant seed completed"
        );
        Ok(result)
    }
}

async fn ensure_owner(
    tx: &mut TxHandle,
    company: &Company,
    chat_identity: &str,
    owner_name: &str,
) -> Result<bool, ApplicationError> {
    if find_user(tx, company.id, chat_identity.to_string()).await?.is_some() {
        return Ok(false);
    }
    let name = if owner_name.is_empty() { "Owner" } else { owner_name };
    insert_user(tx, company.id, chat_identity.to_string(), name.to_string(), UserRole::Owner).await?;
    Ok(true)
}

async fn load_demo_dataset(
    tx: &mut TxHandle,
    company_id: CompanyId,
) -> Result<(usize, usize), ApplicationError> {
    let now = Utc::now().to_rfc3339();
    let mut items_created = 0;
    for item in DEMO_ITEMS {
        let price = Decimal::from_str(item.price).map_err(|error| {
            DomainError::Validation(format!("demo price {} is invalid: {error}", item.price))
        })?;
        let table = match item.item_type {
            ItemType::Product => "products",
            ItemType::Service => "services",
        };
        let sql = format!(
            "INSERT INTO {table} (company_id, code, name, price, active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)
             ON CONFLICT(company_id, code) DO NOTHING"
        );
        let result = tx
            .execute(
                sqlx::query(&sql)
                    .bind(company_id.0)
                    .bind(item.code)
                    .bind(item.name)
                    .bind(price.to_string())
                    .bind(&now),
            )
            .await?;
        items_created += result.rows_affected() as usize;
    }

    let mut customers_created = 0;
    for name in DEMO_CUSTOMERS {
        let existing = tx
            .query_optional(
                sqlx::query("SELECT id FROM customers WHERE company_id = ? AND name = ?")
                    .bind(company_id.0)
                    .bind(*name),
            )
            .await?;
        if existing.is_some() {
            continue;
        }
        tx.execute(
            sqlx::query(
                "INSERT INTO customers (company_id, name, phone, active, created_at)
                 VALUES (?, ?, NULL, 1, ?)",
            )
            .bind(company_id.0)
            .bind(*name)
            .bind(&now),
        )
        .await?;
        customers_created += 1;
    }

    Ok((items_created, customers_created))
}

#[cfg(test)]
mod tests {
    use gestflow_core::config::AppConfig;
    use gestflow_core::domain::catalog::ItemType;
    use gestflow_core::domain::tenancy::UserRole;

    use super::TenantSeed;
    use crate::gateway::Gateway;
    use crate::repositories::{CatalogRegistry, TenantRegistry};
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seed_is_idempotent() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let gateway = Gateway::new(pool);
        let mut seed = AppConfig::default().seed;
        seed.owner_chat_identity = Some("whatsapp:+5571999990000".to_string());

        let first = TenantSeed::load(&gateway, &seed, true).await.expect("first seed");
        assert!(first.company_created);
        assert!(first.owner_created);
        assert_eq!(first.company_name, "GESTFLOW");
        assert_eq!(first.demo_items_created, 4);

        let second = TenantSeed::load(&gateway, &seed, true).await.expect("second seed");
        assert_eq!(second.company_id, first.company_id);
        assert!(!second.company_created);
        assert!(!second.owner_created);
        assert_eq!(second.demo_items_created, 0);
        assert_eq!(second.demo_customers_created, 0);

        let tenants = TenantRegistry::new(gateway.clone());
        let company = tenants.first_company().await.expect("lookup").expect("company");
        let users = tenants.list_users(company.id).await.expect("users");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, UserRole::Owner);

        let catalog = CatalogRegistry::new(gateway);
        assert_eq!(catalog.list_items(company.id, ItemType::Product, false).await.expect("list").len(), 3);
    }

    #[tokio::test]
    async fn seed_without_owner_identity_only_creates_company() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let gateway = Gateway::new(pool);

        let result =
            TenantSeed::load(&gateway, &AppConfig::default().seed, false).await.expect("seed");

        assert!(result.company_created);
        assert!(!result.owner_created);
        assert_eq!(result.demo_items_created, 0);
    }
}
