use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use tracing::info;

use gestflow_core::domain::catalog::validate_name;
use gestflow_core::domain::tenancy::{
    BackupId, BackupRecord, Company, CompanyId, User, UserId, UserRole,
};
use gestflow_core::errors::{ApplicationError, DomainError};

use super::{column, date_column, enum_column, format_date, timestamp_column, RepositoryError};
use crate::gateway::{Gateway, TxHandle};

/// Companies, their users and backup bookkeeping.
#[derive(Clone)]
pub struct TenantRegistry {
    gateway: Gateway,
}

impl TenantRegistry {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn create_company(&self, name: &str) -> Result<Company, ApplicationError> {
        let name = validate_name(name)?;
        let company = self
            .gateway
            .with_transaction(move |tx| Box::pin(insert_company(tx, name)))
            .await?;
        info!(event_name = "tenancy.company_created", company_id = company.id.0, "company created");
        Ok(company)
    }

    pub async fn get_company(&self, company_id: CompanyId) -> Result<Company, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let row = tx
                        .query_optional(
                            sqlx::query("SELECT id, name, created_at FROM companies WHERE id = ?")
                                .bind(company_id.0),
                        )
                        .await?;
                    match row {
                        Some(row) => Ok(row_to_company(&row)?),
                        None => Err(DomainError::not_found("company", company_id.0).into()),
                    }
                })
            })
            .await
    }

    /// Oldest company, used by single-tenant deployments and the bootstrap seed.
    pub async fn first_company(&self) -> Result<Option<Company>, ApplicationError> {
        self.gateway.with_read(|tx| Box::pin(first_company(tx))).await
    }

    pub async fn register_user(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        name: &str,
        role: UserRole,
    ) -> Result<User, ApplicationError> {
        let chat_identity = normalize_chat_identity(chat_identity)?;
        let name = validate_name(name)?;
        let user = self
            .gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    insert_user(tx, company_id, chat_identity, name, role).await
                })
            })
            .await?;

        info!(
            event_name = "tenancy.user_registered",
            company_id = company_id.0,
            user_id = user.id.0,
            role = role.as_str(),
            "user registered"
        );
        Ok(user)
    }

    pub async fn find_user_by_chat_identity(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
    ) -> Result<Option<User>, ApplicationError> {
        let chat_identity = chat_identity.trim().to_string();
        self.gateway
            .with_read(move |tx| Box::pin(find_user(tx, company_id, chat_identity)))
            .await
    }

    pub async fn list_users(&self, company_id: CompanyId) -> Result<Vec<User>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, chat_identity, name, role, created_at
                                 FROM users WHERE company_id = ? ORDER BY id",
                            )
                            .bind(company_id.0),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_user).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }

    pub async fn record_backup(
        &self,
        company_id: CompanyId,
        backup_date: NaiveDate,
        file_name: &str,
    ) -> Result<BackupRecord, ApplicationError> {
        let file_name = file_name.trim().to_string();
        if file_name.is_empty() {
            return Err(DomainError::Validation("backup file name must not be empty".to_string()).into());
        }

        self.gateway
            .with_transaction(move |tx| {
                Box::pin(async move {
                    ensure_company(tx, company_id).await?;
                    let created_at = Utc::now();
                    let result = tx
                        .execute(
                            sqlx::query(
                                "INSERT INTO backups (company_id, backup_date, file_name, created_at)
                                 VALUES (?, ?, ?, ?)",
                            )
                            .bind(company_id.0)
                            .bind(format_date(backup_date))
                            .bind(&file_name)
                            .bind(created_at.to_rfc3339()),
                        )
                        .await?;
                    Ok(BackupRecord {
                        id: BackupId(result.last_insert_rowid()),
                        company_id,
                        backup_date,
                        file_name,
                        created_at,
                    })
                })
            })
            .await
    }

    pub async fn list_backups(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<BackupRecord>, ApplicationError> {
        self.gateway
            .with_read(move |tx| {
                Box::pin(async move {
                    let rows = tx
                        .query_all(
                            sqlx::query(
                                "SELECT id, company_id, backup_date, file_name, created_at
                                 FROM backups WHERE company_id = ?
                                 ORDER BY backup_date DESC, id DESC",
                            )
                            .bind(company_id.0),
                        )
                        .await?;
                    Ok(rows.iter().map(row_to_backup).collect::<Result<Vec<_>, _>>()?)
                })
            })
            .await
    }
}

pub(crate) async fn insert_company(
    tx: &mut TxHandle,
    name: String,
) -> Result<Company, ApplicationError> {
    let created_at = Utc::now();
    let result = tx
        .execute(
            sqlx::query("INSERT INTO companies (name, created_at) VALUES (?, ?)")
                .bind(&name)
                .bind(created_at.to_rfc3339()),
        )
        .await?;
    Ok(Company { id: CompanyId(result.last_insert_rowid()), name, created_at })
}

pub(crate) async fn first_company(tx: &mut TxHandle) -> Result<Option<Company>, ApplicationError> {
    let row = tx
        .query_optional(sqlx::query(
            "SELECT id, name, created_at FROM companies ORDER BY id LIMIT 1",
        ))
        .await?;
    Ok(row.as_ref().map(row_to_company).transpose()?)
}

pub(crate) async fn insert_user(
    tx: &mut TxHandle,
    company_id: CompanyId,
    chat_identity: String,
    name: String,
    role: UserRole,
) -> Result<User, ApplicationError> {
    let created_at = Utc::now();
    let result = tx
        .execute(
            sqlx::query(
                "INSERT INTO users (company_id, chat_identity, name, role, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(company_id.0)
            .bind(&chat_identity)
            .bind(&name)
            .bind(role.as_str())
            .bind(created_at.to_rfc3339()),
        )
        .await?;
    Ok(User {
        id: UserId(result.last_insert_rowid()),
        company_id,
        chat_identity,
        name,
        role,
        created_at,
    })
}

pub(crate) async fn find_user(
    tx: &mut TxHandle,
    company_id: CompanyId,
    chat_identity: String,
) -> Result<Option<User>, ApplicationError> {
    let row = tx
        .query_optional(
            sqlx::query(
                "SELECT id, company_id, chat_identity, name, role, created_at
                 FROM users WHERE company_id = ? AND chat_identity = ?",
            )
            .bind(company_id.0)
            .bind(&chat_identity),
        )
        .await?;
    Ok(row.as_ref().map(row_to_user).transpose()?)
}

pub(crate) async fn ensure_company(
    tx: &mut TxHandle,
    company_id: CompanyId,
) -> Result<(), ApplicationError> {
    let row = tx
        .query_optional(sqlx::query("SELECT id FROM companies WHERE id = ?").bind(company_id.0))
        .await?;
    match row {
        Some(_) => Ok(()),
        None => Err(DomainError::not_found("company", company_id.0).into()),
    }
}

/// Checks that an acting user belongs to the company the operation is scoped to.
pub(crate) async fn ensure_member(
    tx: &mut TxHandle,
    company_id: CompanyId,
    user_id: Option<UserId>,
) -> Result<(), ApplicationError> {
    let Some(user_id) = user_id else {
        return Ok(());
    };
    let row = tx
        .query_optional(
            sqlx::query("SELECT id FROM users WHERE id = ? AND company_id = ?")
                .bind(user_id.0)
                .bind(company_id.0),
        )
        .await?;
    match row {
        Some(_) => Ok(()),
        None => Err(DomainError::not_found("user", user_id.0).into()),
    }
}

fn normalize_chat_identity(chat_identity: &str) -> Result<String, DomainError> {
    let trimmed = chat_identity.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation("chat identity must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

fn row_to_company(row: &SqliteRow) -> Result<Company, RepositoryError> {
    Ok(Company {
        id: CompanyId(column(row, "id")?),
        name: column(row, "name")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: UserId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        chat_identity: column(row, "chat_identity")?,
        name: column(row, "name")?,
        role: enum_column(row, "role", UserRole::parse)?,
        created_at: timestamp_column(row, "created_at")?,
    })
}

fn row_to_backup(row: &SqliteRow) -> Result<BackupRecord, RepositoryError> {
    Ok(BackupRecord {
        id: BackupId(column(row, "id")?),
        company_id: CompanyId(column(row, "company_id")?),
        backup_date: date_column(row, "backup_date")?,
        file_name: column(row, "file_name")?,
        created_at: timestamp_column(row, "created_at")?,
    })
}
