//! Table bootstrap: create a missing target table and seed it.
//!
//! The target table is created from the *source's* own CREATE TABLE
//! statement, passed through engine normalization
//! ([`ddl::normalize_create_statement`]) so cloud-only storage engines map
//! to their on-premise counterparts. Seeding is one server-side
//! `INSERT INTO … SELECT * FROM remoteSecure(…)` executed on the target,
//! so the full copy moves through the database servers in O(1) application
//! memory regardless of table size.

use crate::clickhouse::remote_table_expr;
use crate::config::EndpointConfig;
use crate::ddl;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::metrics;
use crate::resilience::with_timeout;
use std::time::Duration;
use tracing::{debug, info};

/// Create and seed `database.table` at the target if it is missing.
///
/// Returns `true` when the table was created and fully copied, `false`
/// when it already existed (nothing done). Errors propagate to the caller,
/// which isolates them per table.
pub async fn bootstrap_table(
    source: &dyn Endpoint,
    target: &dyn Endpoint,
    source_config: &EndpointConfig,
    database: &str,
    table: &str,
    timeout: Duration,
) -> Result<bool> {
    let exists = with_timeout(
        timeout,
        target.name(),
        "TABLE_EXISTS",
        target.table_exists(database, table),
    )
    .await?;
    if exists {
        debug!(
            table = %format!("{}.{}", database, table),
            "Target table present; no bootstrap needed"
        );
        return Ok(false);
    }

    let statement = with_timeout(
        timeout,
        source.name(),
        "SHOW_CREATE",
        source.show_create_table(database, table),
    )
    .await?;
    let normalized = ddl::normalize_create_statement(&statement)?;

    with_timeout(
        timeout,
        target.name(),
        "CREATE_DATABASE",
        target.ensure_database(database),
    )
    .await?;
    with_timeout(timeout, target.name(), "CREATE_TABLE", target.execute(&normalized)).await?;

    let remote = remote_table_expr(source_config, database, table)?;
    let copy = format!(
        "INSERT INTO {}.{} SELECT * FROM {}",
        database, table, remote
    );
    with_timeout(timeout, target.name(), "FULL_COPY", target.execute(&copy)).await?;

    metrics::record_table_bootstrapped(database, table);
    info!(
        table = %format!("{}.{}", database, table),
        "Bootstrapped table from source"
    );
    Ok(true)
}
