use chrono::{DateTime, Utc};
use sqlx::Row;

use gestflow_core::config::BusinessConfig;
use gestflow_core::domain::sequence::{business_year, DocumentKind};
use gestflow_core::domain::tenancy::CompanyId;
use gestflow_core::errors::ApplicationError;

use super::RepositoryError;
use crate::gateway::TxHandle;

/// Issues the next number of a (company, key, year) scope inside the caller's transaction.
///
/// A single upsert both creates the scope (storing 2 after handing out 1) and bumps existing
/// scopes, so the read and the increment cannot interleave with another writer. Numbers are
/// gapless as long as the surrounding transaction commits.
pub async fn next_number(
    tx: &mut TxHandle,
    company_id: CompanyId,
    key: &str,
    year: i32,
) -> Result<i64, RepositoryError> {
    let row = tx
        .query_one(
            sqlx::query(
                "INSERT INTO sequences (company_id, key, year, next_number)
                 VALUES (?, ?, ?, 2)
                 ON CONFLICT(company_id, key, year)
                 DO UPDATE SET next_number = next_number + 1
                 RETURNING next_number",
            )
            .bind(company_id.0)
            .bind(key)
            .bind(year),
        )
        .await?;

    let stored: i64 = row.try_get("next_number")?;
    Ok(stored - 1)
}

/// Allocates a formatted document code, e.g. `VEN-2026-0003`, in the business-local year.
pub async fn allocate_document_code(
    tx: &mut TxHandle,
    company_id: CompanyId,
    kind: DocumentKind,
    business: &BusinessConfig,
    now: DateTime<Utc>,
) -> Result<String, ApplicationError> {
    let year = business_year(now, business.offset());
    let number = next_number(tx, company_id, kind.sequence_key(), year).await?;
    Ok(business.prefixes().format(kind, year, number))
}
