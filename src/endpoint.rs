// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The database endpoint seam.
//!
//! Both pipelines talk to databases exclusively through [`Endpoint`]:
//! the flush engine uses the describe/insert/execute subset against its
//! destinations, and the downsync engine additionally uses table
//! enumeration, DDL introspection, and watermark reads across its
//! source/target pair.
//!
//! This trait is what makes the engines testable: integration tests drive
//! them against an in-memory implementation with failure injection, and
//! production wires up [`ClickHouseEndpoint`](crate::clickhouse::ClickHouseEndpoint).

use crate::batch::RowBatch;
use crate::error::Result;
use async_trait::async_trait;

/// One column as reported by table introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type text, e.g. `DateTime64(3)` or `Nullable(Date)`.
    pub type_name: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }

    /// Whether the declared type is date- or time-like (cursor candidate).
    pub fn is_temporal(&self) -> bool {
        self.type_name.contains("Date") || self.type_name.contains("Time")
    }

    /// Whether the type is date-only (no time-of-day component).
    pub fn is_date_only(&self) -> bool {
        self.type_name.contains("Date") && !self.type_name.contains("DateTime")
    }
}

/// One table as reported by database enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    /// Storage engine name, e.g. `SharedReplacingMergeTree`.
    pub engine: String,
}

/// A database connection endpoint plus a table namespace.
///
/// Implementations must be safe to share across tasks; the flush engine
/// fans out one insert per destination concurrently.
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    /// Identity for logs and metrics (e.g. "local", "cloud").
    fn name(&self) -> &str;

    /// Columns of `database.table`, in declaration order.
    async fn describe(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Insert rows into `database.table`, restricted to the batch's columns.
    ///
    /// The batch must already be projected to columns that exist at this
    /// endpoint; the implementation does not reconcile schemas.
    async fn insert(&self, database: &str, table: &str, batch: &RowBatch) -> Result<()>;

    /// Execute a DDL or maintenance statement (CREATE TABLE, OPTIMIZE,
    /// server-side INSERT ... SELECT).
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Base tables in `database`, excluding views and materialized views.
    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>>;

    /// Whether `database.table` exists at this endpoint.
    async fn table_exists(&self, database: &str, table: &str) -> Result<bool>;

    /// Create `database` if it does not exist.
    async fn ensure_database(&self, database: &str) -> Result<()>;

    /// The CREATE TABLE statement for `database.table`.
    async fn show_create_table(&self, database: &str, table: &str) -> Result<String>;

    /// `max(column)` over `database.table` rendered as text, or `None`
    /// when the table has zero rows.
    async fn max_value(&self, database: &str, table: &str, column: &str)
        -> Result<Option<String>>;

    /// Row count of `database.table` under a SQL predicate.
    async fn count_where(&self, database: &str, table: &str, predicate: &str) -> Result<u64>;
}
