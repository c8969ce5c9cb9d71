use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use gestflow_core::domain::session::SessionState;
use gestflow_core::domain::tenancy::CompanyId;
use gestflow_core::errors::{ApplicationError, DomainError};

pub mod budget;
pub mod catalog;
pub mod finance;
pub mod memory;
pub mod sale;
pub mod sequence;
pub mod session;
pub mod tenancy;

pub use budget::QuoteEngine;
pub use catalog::CatalogRegistry;
pub use finance::{FinancialLedger, NewPayable};
pub use memory::InMemorySessionStore;
pub use sale::{ManualMovement, SaleLedger};
pub use sequence::{allocate_document_code, next_number};
pub use session::SqlSessionStore;
pub use tenancy::TenantRegistry;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(sqlx::Error::Database(db_error))
                if db_error.is_unique_violation() =>
            {
                DomainError::Conflict(db_error.message().to_string()).into()
            }
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

/// Durable per-(company, chat identity) conversation state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
    ) -> Result<SessionState, ApplicationError>;

    async fn save(
        &self,
        company_id: CompanyId,
        chat_identity: &str,
        state: SessionState,
    ) -> Result<SessionState, ApplicationError>;

    async fn reset(&self, company_id: CompanyId, chat_identity: &str)
        -> Result<(), ApplicationError>;
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn decimal_column(row: &SqliteRow, name: &str) -> Result<Decimal, RepositoryError> {
    let raw: String = column(row, name)?;
    Decimal::from_str(&raw)
        .map_err(|error| RepositoryError::Decode(format!("{name}: `{raw}` is not a decimal: {error}")))
}

pub(crate) fn timestamp_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{name}: `{raw}` is not RFC 3339: {error}")))
}

pub(crate) fn date_column(row: &SqliteRow, name: &str) -> Result<NaiveDate, RepositoryError> {
    let raw: String = column(row, name)?;
    parse_date(name, &raw)
}

pub(crate) fn parse_date(name: &str, raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|error| RepositoryError::Decode(format!("{name}: `{raw}` is not a date: {error}")))
}

pub(crate) fn enum_column<T>(
    row: &SqliteRow,
    name: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, RepositoryError> {
    let raw: String = column(row, name)?;
    parse(&raw).ok_or_else(|| RepositoryError::Decode(format!("{name}: unknown value `{raw}`")))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
