// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cursor resolution and the incremental pull.
//!
//! A table's cursor column is resolved fresh each run: an explicit
//! per-table override wins when it names a real source column, otherwise
//! the best-ranked date/time-typed column is inferred from a configurable
//! keyword list. The watermark is *derived*, never stored — always
//! `max(cursor)` at the target at sync time — so there is no cursor state
//! to corrupt or migrate.

use crate::clickhouse::{escape_string, remote_table_expr};
use crate::config::EndpointConfig;
use crate::endpoint::{ColumnInfo, Endpoint};
use crate::error::Result;
use crate::metrics;
use crate::resilience::with_timeout;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The resolved cursor binding for one table, valid for one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorSpec {
    pub column: String,
    /// The column is date-typed with no time-of-day component; watermark
    /// literals are truncated to `YYYY-MM-DD` to match.
    pub date_only: bool,
}

/// Pick the cursor column for a table.
///
/// An override naming a column absent from the source table is ignored
/// (with a warning) and inference takes over — a renamed column must not
/// silently halt a table's sync.
///
/// Inference ranks the date/time-typed columns: for each priority keyword
/// in order, an exact (case-insensitive) name match beats a substring
/// match; remaining temporal columns come last. Name-ascending order
/// breaks ties so the choice is deterministic.
pub fn resolve_cursor(
    columns: &[ColumnInfo],
    override_name: Option<&str>,
    priority: &[String],
) -> Option<CursorSpec> {
    if let Some(name) = override_name {
        match columns.iter().find(|c| c.name == name) {
            Some(col) => {
                return Some(CursorSpec {
                    column: col.name.clone(),
                    date_only: col.is_date_only(),
                });
            }
            None => {
                warn!(
                    column = name,
                    "Cursor override names a missing column; falling back to inference"
                );
            }
        }
    }

    let mut candidates: Vec<&ColumnInfo> = columns.iter().filter(|c| c.is_temporal()).collect();
    candidates.sort_by(|a, b| a.name.cmp(&b.name));

    for keyword in priority {
        let keyword = keyword.to_lowercase();
        if let Some(col) = candidates
            .iter()
            .find(|c| c.name.to_lowercase() == keyword)
        {
            return Some(CursorSpec {
                column: col.name.clone(),
                date_only: col.is_date_only(),
            });
        }
        if let Some(col) = candidates
            .iter()
            .find(|c| c.name.to_lowercase().contains(&keyword))
        {
            return Some(CursorSpec {
                column: col.name.clone(),
                date_only: col.is_date_only(),
            });
        }
    }

    candidates.first().map(|col| CursorSpec {
        column: col.name.clone(),
        date_only: col.is_date_only(),
    })
}

/// Render the lower-exclusive-bound filter for a watermark value.
///
/// The watermark text comes from the target server's own `toString()`, so
/// a date-time value is already `YYYY-MM-DD HH:MM:SS[.fff]`. For a
/// date-only cursor the literal is truncated to the date part to avoid a
/// type-mismatch in the comparison.
pub fn watermark_predicate(spec: &CursorSpec, watermark: &str) -> String {
    let literal = if spec.date_only && watermark.len() > 10 {
        &watermark[..10]
    } else {
        watermark
    };
    format!("`{}` > '{}'", spec.column, escape_string(literal))
}

/// Pull rows newer than the target's watermark, server-side.
///
/// Returns the number of rows the pull added at the target (observability
/// only; correctness rests on the watermark filter). A target table with
/// zero rows is skipped — there is no watermark to anchor on, and the
/// bootstrap full copy is the mechanism that seeds it.
pub async fn sync_incremental(
    target: &dyn Endpoint,
    source_config: &EndpointConfig,
    database: &str,
    table: &str,
    spec: &CursorSpec,
    timeout: Duration,
) -> Result<u64> {
    let watermark = with_timeout(
        timeout,
        target.name(),
        "MAX_VALUE",
        target.max_value(database, table, &spec.column),
    )
    .await?;

    let Some(watermark) = watermark else {
        info!(
            table = %format!("{}.{}", database, table),
            cursor = %spec.column,
            "Target table is empty; skipping incremental pull this run"
        );
        return Ok(0);
    };

    let predicate = watermark_predicate(spec, &watermark);
    let remote = remote_table_expr(source_config, database, table)?;
    let pull = format!(
        "INSERT INTO {}.{} SELECT * FROM {} WHERE {}",
        database, table, remote, predicate
    );

    debug!(
        table = %format!("{}.{}", database, table),
        cursor = %spec.column,
        watermark = %watermark,
        "Pulling rows above watermark"
    );
    with_timeout(timeout, target.name(), "REMOTE_PULL", target.execute(&pull)).await?;

    // Best effort: a failed count never fails the sync
    let pulled = match with_timeout(
        timeout,
        target.name(),
        "COUNT",
        target.count_where(database, table, &predicate),
    )
    .await
    {
        Ok(count) => count,
        Err(e) => {
            warn!(
                table = %format!("{}.{}", database, table),
                error = %e,
                "Could not count pulled rows"
            );
            0
        }
    };

    metrics::record_rows_pulled(database, table, pulled);
    if pulled > 0 {
        info!(
            table = %format!("{}.{}", database, table),
            cursor = %spec.column,
            watermark = %watermark,
            rows = pulled,
            "Incremental pull complete"
        );
    }
    Ok(pulled)
}
