//! Transaction boundary for every ledger operation.
//!
//! Work runs inside [`Gateway::with_transaction`]: the closure receives a [`TxHandle`], the
//! transaction commits when the closure returns `Ok` and rolls back on any error. Write
//! transactions begin with `BEGIN IMMEDIATE`, so two writers queue on SQLite's reserved lock
//! (bounded by `busy_timeout`) instead of failing when a read snapshot is upgraded.

use std::future::Future;
use std::pin::Pin;

use gestflow_core::errors::ApplicationError;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteQueryResult, SqliteRow};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::warn;

use crate::repositories::RepositoryError;
use crate::DbPool;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

#[derive(Clone)]
pub struct Gateway {
    pool: DbPool,
}

/// Live transaction handed to unit-of-work closures.
pub struct TxHandle {
    tx: Transaction<'static, Sqlite>,
}

impl Gateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn with_transaction<T, F>(&self, work: F) -> Result<T, ApplicationError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut TxHandle) -> BoxFuture<'c, Result<T, ApplicationError>> + Send,
    {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(RepositoryError::from)?;
        self.run(tx, work).await
    }

    /// Deferred transaction for read-only work; it never takes the write lock.
    pub async fn with_read<T, F>(&self, work: F) -> Result<T, ApplicationError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut TxHandle) -> BoxFuture<'c, Result<T, ApplicationError>> + Send,
    {
        let tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        self.run(tx, work).await
    }

    async fn run<T, F>(&self, tx: Transaction<'static, Sqlite>, work: F) -> Result<T, ApplicationError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut TxHandle) -> BoxFuture<'c, Result<T, ApplicationError>> + Send,
    {
        let mut handle = TxHandle { tx };
        match work(&mut handle).await {
            Ok(value) => {
                handle.tx.commit().await.map_err(RepositoryError::from)?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = handle.tx.rollback().await {
                    warn!(
                        event_name = "storage.rollback_failed",
                        error = %rollback_error,
                        "transaction rollback failed; connection is discarded"
                    );
                }
                Err(error)
            }
        }
    }
}

impl TxHandle {
    pub async fn query_one<'q>(&mut self, query: SqliteQuery<'q>) -> Result<SqliteRow, RepositoryError> {
        Ok(query.fetch_one(&mut *self.tx).await?)
    }

    pub async fn query_optional<'q>(
        &mut self,
        query: SqliteQuery<'q>,
    ) -> Result<Option<SqliteRow>, RepositoryError> {
        Ok(query.fetch_optional(&mut *self.tx).await?)
    }

    pub async fn query_all<'q>(
        &mut self,
        query: SqliteQuery<'q>,
    ) -> Result<Vec<SqliteRow>, RepositoryError> {
        Ok(query.fetch_all(&mut *self.tx).await?)
    }

    pub async fn execute<'q>(
        &mut self,
        query: SqliteQuery<'q>,
    ) -> Result<SqliteQueryResult, RepositoryError> {
        Ok(query.execute(&mut *self.tx).await?)
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }
}
