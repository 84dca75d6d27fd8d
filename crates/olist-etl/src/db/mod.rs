//! Database boundary
//!
//! The pipeline talks to storage only through [`Database`]: one read query
//! for lookups, multi-row insert-or-skip statements, and explicit commits.
//! Each backend opens a transaction lazily on the first write and keeps it
//! until [`Database::commit`] or [`Database::rollback`].

#[macro_use]
mod sqlx_backend;

pub mod dialect;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;

use crate::config::DatabaseSettings;
use crate::error::EtlResult;
use crate::value::{TypedRow, Value};
use dialect::{Dialect, UpsertSkip};

#[async_trait]
pub trait Database: Send {
    fn dialect(&self) -> Dialect;

    /// Run a read query and return every row as decoded values.
    async fn query(&mut self, sql: &str, params: &[Value]) -> EtlResult<Vec<Vec<Value>>>;

    /// Run a statement without parameters inside the current transaction.
    async fn execute(&mut self, sql: &str) -> EtlResult<u64>;

    /// Insert `rows` with one multi-row statement, skipping key collisions.
    /// Returns the number of rows actually inserted.
    async fn execute_many(&mut self, statement: &UpsertSkip, rows: &[TypedRow]) -> EtlResult<u64>;

    async fn commit(&mut self) -> EtlResult<()>;

    async fn rollback(&mut self) -> EtlResult<()>;
}

/// Open a single-connection backend for the configured vendor.
pub async fn connect(settings: &DatabaseSettings) -> EtlResult<Box<dyn Database>> {
    tracing::info!(
        vendor = %settings.vendor,
        target = %settings.redacted(),
        "Connecting to database"
    );

    let db: Box<dyn Database> = match settings.vendor {
        Dialect::Postgres => Box::new(postgres::PgDatabase::connect(settings).await?),
        Dialect::Mysql => Box::new(mysql::MySqlDatabase::connect(settings).await?),
    };

    Ok(db)
}
