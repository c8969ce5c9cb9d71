use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use tracing::info;

use gestflow_core::domain::catalog::{
    normalize_code, validate_name, validate_price, CatalogItem, CatalogItemUpdate, ItemRef,
    ItemType, NewCatalogItem,
};
use gestflow_core::domain::customer::{Customer, CustomerId, CustomerUpdate};
use gestflow_core::domain::tenancy::CompanyId;
use gestflow_core::errors::{ApplicationError, DomainError};

use super::{column, decimal_column, timestamp_column, RepositoryError};
use crate::gateway::{Gateway, TxHandle};
use crate::repositories::tenancy::ensure_company;

/// Tenant-scoped customers, products and services.
#[derive(Clone)]
pub struct CatalogRegistry {
    gateway: Gateway,
}

fn table_for(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Product => "products",
        ItemType::Service => "services",
    }
}

fn entity_for(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Product => "product",
        ItemType::Service => "service",
    }
}

impl CatalogRegistry {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn create_customer(
        &self,
        company_id: CompanyId,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Customer, ApplicationError> {
        let name = validate_name(name)?;
        let phone = clean_phone(phone);
        let customer = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    let created_at = Utc::now();
                    let result = tx
                        .execute(
                            sqlx::query(
                                "INSERT INTO customers (company_id, name, phone, active, created_at)
                                 VALUES (?, ?, ?, 1, ?)",
                            )
                            .bind(company_id.0)
                            .bind(&name)
                            .bind(&phone)
                            .bind(created_at.to_rfc3339()),
                        )
                        .await?;
                    Ok(Customer {
                        id: CustomerId(result.last_insert_rowid()),
                        company_id,
                        name,
                        phone,
                        active: true,
                        created_at,
                    })
                })
            })
            .await?;

        info!(
            event_name = "catalog.customer_created",
            company_id = company_id.0,
            customer_id = customer.id.0,
            "customer created"
        );
        Ok(customer)
    }

    pub async fn get_customer(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
    ) -> Result<Customer, ApplicationError> {
        self.gateway
            .with_read(move |tx| Box::pin(load_customer(tx, company_id, customer_id)))
            .await
    }

    pub async fn list_customers(
        &self,
        company_id: CompanyId,
        include_inactive: bool,
    ) -> Result<Vec<Customer>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, name, phone, active, created_at
                                 FROM customers
                                 WHERE company_id = ? AND (active = 1 OR ?)
                                 ORDER BY name COLLATE NOCASE, id",
                            )
                            .bind(company_id.0)
                            .bind(include_inactive),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_customer).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }

    pub async fn update_customer(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
        update: CustomerUpdate,
    ) -> Result<Customer, ApplicationError> {
        let name = update.name.as_deref().map(validate_name).transpose()?;
        let phone = update.phone.map(|phone| clean_phone(phone.as_deref()));

        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut customer = load_customer(tx, company_id, customer_id).await?;
                    if let Some(name) = name {
                        customer.name = name;
                    }
                    if let Some(phone) = phone {
                        customer.phone = phone;
                    }
                    tx.execute(
                        sqlx::query(
                            "UPDATE customers SET name = ?, phone = ? WHERE id = ? AND company_id = ?",
                        )
                        .bind(&customer.name)
                        .bind(&customer.phone)
                        .bind(customer_id.0)
                        .bind(company_id.0),
                    )
                    .await?;
                    Ok(customer)
                })
            })
            .await
    }

    pub async fn deactivate_customer(
        &self,
        company_id: CompanyId,
        customer_id: CustomerId,
    ) -> Result<Customer, ApplicationError> {
        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut customer = load_customer(tx, company_id, customer_id).await?;
                    tx.execute(
                        sqlx::query("UPDATE customers SET active = 0 WHERE id = ? AND company_id = ?")
                            .bind(customer_id.0)
                            .bind(company_id.0),
                    )
                    .await?;
                    customer.active = false;
                    Ok(customer)
                })
            })
            .await
    }

    /// Registers a product or service. Codes are unique per company across both tables so a
    /// code typed in chat resolves to exactly one item.
    pub async fn create_item(
        &self,
        company_id: CompanyId,
        new_item: NewCatalogItem,
    ) -> Result<CatalogItem, ApplicationError> {
        let code = normalize_code(&new_item.code)?;
        let name = validate_name(&new_item.name)?;
        let price = validate_price(new_item.price)?;
        let item_type = new_item.item_type;

        let item = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    ensure_code_free(tx, company_id, &code, None).await?;
                    let created_at = Utc::now();
                    let sql = format!(
                        "INSERT INTO {} (company_id, code, name, price, active, created_at)
                         VALUES (?, ?, ?, ?, 1, ?)",
                        table_for(item_type)
                    );
                    let result = tx
                        .execute(
                            sqlx::query(&sql)
                                .bind(company_id.0)
                                .bind(&code)
                                .bind(&name)
                                .bind(price.to_string())
                                .bind(created_at.to_rfc3339()),
                        )
                        .await?;
                    Ok(CatalogItem {
                        item: ItemRef::from_parts(item_type, result.last_insert_rowid()),
                        company_id,
                        code,
                        name,
                        price,
                        active: true,
                        created_at,
                    })
                })
            })
            .await?;

        info!(
            event_name = "catalog.item_created",
            company_id = company_id.0,
            item_type = item_type.as_str(),
            item_id = item.item.raw_id(),
            code = %item.code,
            "catalog item created"
        );
        Ok(item)
    }

    pub async fn get_item(
        &self,
        company_id: CompanyId,
        item: ItemRef,
    ) -> Result<CatalogItem, ApplicationError> {
        self.gateway.with_read(move |tx| Box::pin(load_item(tx, company_id, item))).await
    }

    /// Active product or service with this code, if any.
    pub async fn find_by_code(
        &self,
        company_id: CompanyId,
        code: &str,
    ) -> Result<Option<CatalogItem>, ApplicationError> {
        let code = normalize_code(code)?;
        self.gateway
            .with_read(move |tx| Box::pin(find_active_by_code(tx, company_id, code)))
            .await
    }

    pub async fn list_items(
        &self,
        company_id: CompanyId,
        item_type: ItemType,
        include_inactive: bool,
    ) -> Result<Vec<CatalogItem>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let sql = format!(
                        "SELECT id, company_id, code, name, price, active, created_at
                         FROM {} WHERE company_id = ? AND (active = 1 OR ?)
                         ORDER BY code",
                        table_for(item_type)
                    );
                    let rows = tx
                        .query_all(sqlx::query(&sql).bind(company_id.0).bind(include_inactive))
                        .await?;
                    Ok(rows
                        .iter()
                        .map(|row| row_to_item(row, item_type))
                        .collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }

    pub async fn update_item(
        &self,
        company_id: CompanyId,
        item: ItemRef,
        update: CatalogItemUpdate,
    ) -> Result<CatalogItem, ApplicationError> {
        let code = update.code.as_deref().map(normalize_code).transpose()?;
        let name = update.name.as_deref().map(validate_name).transpose()?;
        let price = update.price.map(validate_price).transpose()?;

        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut current = load_item(tx, company_id, item).await?;
                    if let Some(code) = code {
                        if code != current.code {
                            ensure_code_free(tx, company_id, &code, Some(item)).await?;
                        }
                        current.code = code;
                    }
                    if let Some(name) = name {
                        current.name = name;
                    }
                    if let Some(price) = price {
                        current.price = price;
                    }
                    let sql = format!(
                        "UPDATE {} SET code = ?, name = ?, price = ? WHERE id = ? AND company_id = ?",
                        table_for(item.item_type())
                    );
                    tx.execute(
                        sqlx::query(&sql)
                            .bind(&current.code)
                            .bind(&current.name)
                            .bind(current.price.to_string())
                            .bind(item.raw_id())
                            .bind(company_id.0),
                    )
                    .await?;
                    Ok(current)
                })
            })
            .await
    }

    pub async fn deactivate_item(
        &self,
        company_id: CompanyId,
        item: ItemRef,
    ) -> Result<CatalogItem, ApplicationError> {
        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let mut current = load_item(tx, company_id, item).await?;
                    let sql = format!(
                        "UPDATE {} SET active = 0 WHERE id = ? AND company_id = ?",
                        table_for(item.item_type())
                    );
                    tx.execute(sqlx::query(&sql).bind(item.raw_id()).bind(company_id.0)).await?;
                    current.active = false;
                    Ok(current)
                })
            })
            .await
    }
}

pub(crate) async fn load_customer(
    tx: &mut TxHandle,
    company_id: CompanyId,
    customer_id: CustomerId,
) -> Result<Customer, ApplicationError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, name, phone, active, created_at
                 FROM customers WHERE id = ? AND company_id = ?",
            )
            .bind(customer_id.0)
            .bind(company_id.0),
        )
        .await?;
    match row {
        Some(row) => Ok(row_to_customer(&row)?),
        None => Err(DomainError::not_found("customer", customer_id.0).into()),
    }
}

/// Customer that new documents may be issued to. Deactivated customers are hidden.
pub(crate) async fn load_active_customer(
    tx: &mut TxHandle,
    company_id: CompanyId,
    customer_id: CustomerId,
) -> Result<Customer, ApplicationError> {
    let customer = load_customer(tx, company_id, customer_id).await?;
    if !customer.active {
        return Err(DomainError::not_found("customer", customer_id.0).into());
    }
    Ok(customer)
}

pub(crate) async fn load_item(
    tx: &mut TxHandle,
    company_id: CompanyId,
    item: ItemRef,
) -> Result<CatalogItem, ApplicationError> {
    let item_type = item.item_type();
    let sql = format!(
        "SELECT id, company_id, code, name, price, active, created_at
         FROM {} WHERE id = ? AND company_id = ?",
        table_for(item_type)
    );
    let row = tx.query_optional(sqlx::query(&sql).bind(item.raw_id()).bind(company_id.0)).await?;
    match row {
        Some(row) => Ok(row_to_item(&row, item_type)?),
        None => Err(DomainError::not_found(entity_for(item_type), item.raw_id()).into()),
    }
}

/// Catalog item that can be priced onto a new line. Inactive items look missing.
pub(crate) async fn load_active_item(
    tx: &mut TxHandle,
    company_id: CompanyId,
    item: ItemRef,
) -> Result<CatalogItem, ApplicationError> {
    let entry = load_item(tx, company_id, item).await?;
    if !entry.active {
        return Err(DomainError::not_found(entity_for(item.item_type()), item.raw_id()).into());
    }
    Ok(entry)
}

pub(crate) async fn find_active_by_code(
    tx: &mut TxHandle,
    company_id: CompanyId,
    code: String,
) -> Result<Option<CatalogItem>, ApplicationError> {
    for item_type in [ItemType::Product, ItemType::Service] {
        let sql = format!(
            "SELECT id, company_id, code, name, price, active, created_at
             FROM {} WHERE company_id = ? AND code = ? AND active = 1",
            table_for(item_type)
        );
        let row = tx.query_optional(sqlx::query(&sql).bind(company_id.0).bind(&code)).await?;
        if let Some(row) = row {
            return Ok(Some(row_to_item(&row, item_type)?));
        }
    }
    Ok(None)
}

async fn ensure_code_free(
    tx: &mut TxHandle,
    company_id: CompanyId,
    code: &str,
    except: Option<ItemRef>,
) -> Result<(), ApplicationError> {
    for item_type in [ItemType::Product, ItemType::Service] {
        let sql =
            format!("SELECT id FROM {} WHERE company_id = ? AND code = ?", table_for(item_type));
        let row = tx.query_optional(sqlx::query(&sql).bind(company_id.0).bind(code)).await?;
        if let Some(row) = row {
            let existing = ItemRef::from_parts(item_type, column(&row, "id")?);
            if Some(existing) != except {
                return Err(DomainError::Conflict(format!(
                    "code {code} is already used by a {}",
                    entity_for(item_type)
                ))
                .into());
            }
        }
    }
    Ok(())
}

fn clean_phone(phone: Option<&str>) -> Option<String> {
    phone.map(str::trim).filter(|phone| !phone.is_empty()).map(str::to_string)
}

fn row_to_customer(row: &SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: CustomerId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        name: column(row, "name")?,
        phone: column(row, "phone")?,
        active: column(row, "active")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn row_to_item(row: &SqliteRow, item_type: ItemType) -> Result<CatalogItem, RepositoryError> {
    Ok(CatalogItem {
        item: ItemRef::from_parts(item_type, column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        code: column(row, "code")?,
        name: column(row, "name")?,
        price: decimal_column(row, "price")?,
        active: column(row, "active")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}
