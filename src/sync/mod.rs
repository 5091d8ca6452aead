// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The downward-sync engine: cloud → on-premise, per table, per database.
//!
//! ```text
//!   source (cloud)                       target (on-premise)
//!   ┌────────────┐   list_tables        ┌────────────┐
//!   │  Endpoint  │─────────────────────►│  Endpoint  │
//!   └────────────┘                      └────────────┘
//!         │    per table (bounded concurrency):
//!         │      1. bootstrap  — create + full copy if missing
//!         │      2. cursor     — resolve column, read watermark
//!         │      3. pull       — INSERT … WHERE cursor > watermark
//!         ▼
//!   every table isolated: one failure never stops its siblings
//! ```
//!
//! Bootstrap and the incremental pull both run for every table, in that
//! order. A freshly-bootstrapped table's watermark already equals the
//! newest copied row, so the immediate incremental pass inserts zero rows;
//! that no-op is intentional and not special-cased.

pub mod bootstrap;
pub mod cursor;

pub use cursor::CursorSpec;

use crate::config::DownsyncConfig;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::metrics;
use crate::resilience::{with_timeout, Bulkhead};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What happened to one table during a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// Bootstrap and incremental sync both completed. `cursor` is `None`
    /// when the table has no date/time column and is therefore not
    /// incrementally syncable (bootstrap may still have copied it).
    Synced {
        bootstrapped: bool,
        cursor: Option<String>,
        rows_pulled: u64,
    },
    /// On the deprecated-table skip-list; nothing attempted.
    Skipped,
    /// Some step failed; siblings were unaffected.
    Failed(String),
}

/// Per-table result row for one sync run.
#[derive(Debug, Clone)]
pub struct TableReport {
    pub database: String,
    pub table: String,
    pub outcome: TableOutcome,
}

/// Replicates configured databases from a source endpoint down to a target.
#[derive(Clone)]
pub struct DownsyncEngine {
    source: Arc<dyn Endpoint>,
    target: Arc<dyn Endpoint>,
    config: Arc<DownsyncConfig>,
    bulkhead: Arc<Bulkhead>,
    op_timeout: Duration,
}

impl DownsyncEngine {
    pub fn new(
        source: Arc<dyn Endpoint>,
        target: Arc<dyn Endpoint>,
        config: DownsyncConfig,
    ) -> Self {
        let op_timeout = config.op_timeout_duration();
        let bulkhead = Arc::new(Bulkhead::new(config.table_concurrency));
        Self {
            source,
            target,
            config: Arc::new(config),
            bulkhead,
            op_timeout,
        }
    }

    /// Sync every configured database, in order.
    ///
    /// A database whose tables cannot be enumerated is logged and skipped;
    /// the run continues with the remaining databases.
    pub async fn run(&self) -> Vec<TableReport> {
        let mut reports = Vec::new();
        for database in &self.config.databases {
            match self.sync_database(database).await {
                Ok(mut table_reports) => reports.append(&mut table_reports),
                Err(e) => {
                    error!(database = %database, error = %e, "Could not enumerate tables");
                    metrics::record_error("downsync", "enumerate");
                }
            }
        }

        let synced = reports
            .iter()
            .filter(|r| matches!(r.outcome, TableOutcome::Synced { .. }))
            .count();
        let failed = reports
            .iter()
            .filter(|r| matches!(r.outcome, TableOutcome::Failed(_)))
            .count();
        info!(tables = reports.len(), synced, failed, "Sync run complete");
        reports
    }

    /// Sync one database: enumerate, filter, fan out per table.
    ///
    /// Returns `Err` only when the source table list itself cannot be
    /// read — the one hard-stop condition for a database.
    pub async fn sync_database(&self, database: &str) -> Result<Vec<TableReport>> {
        let tables = with_timeout(
            self.op_timeout,
            self.source.name(),
            "LIST_TABLES",
            self.source.list_tables(database),
        )
        .await?;
        info!(database = %database, tables = tables.len(), "Syncing database");

        let mut reports = Vec::with_capacity(tables.len());
        let mut set = JoinSet::new();
        for table in tables {
            if self.config.is_skipped(database, &table.name) {
                info!(
                    table = %format!("{}.{}", database, table.name),
                    "On skip-list; not syncing"
                );
                metrics::record_table_sync(database, &table.name, "skipped", Duration::ZERO);
                reports.push(TableReport {
                    database: database.to_string(),
                    table: table.name,
                    outcome: TableOutcome::Skipped,
                });
                continue;
            }

            let engine = self.clone();
            let database = database.to_string();
            let name = table.name.clone();
            set.spawn(async move {
                let _permit = match engine.bulkhead.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return TableReport {
                            database,
                            table: name,
                            outcome: TableOutcome::Failed(e.to_string()),
                        };
                    }
                };
                let outcome = engine.sync_table(&database, &name).await;
                TableReport {
                    database,
                    table: name,
                    outcome,
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(database = %database, error = %e, "Table sync task panicked");
                    metrics::record_error("downsync", "join");
                }
            }
        }

        reports.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(reports)
    }

    /// Bootstrap-then-incremental for one table, fully isolated.
    async fn sync_table(&self, database: &str, table: &str) -> TableOutcome {
        let started = Instant::now();

        let bootstrapped = match bootstrap::bootstrap_table(
            self.source.as_ref(),
            self.target.as_ref(),
            &self.config.source,
            database,
            table,
            self.op_timeout,
        )
        .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(
                    table = %format!("{}.{}", database, table),
                    error = %e,
                    "Bootstrap failed"
                );
                metrics::record_error("downsync", "bootstrap");
                metrics::record_table_sync(database, table, "failed", started.elapsed());
                return TableOutcome::Failed(e.to_string());
            }
        };

        let columns = match with_timeout(
            self.op_timeout,
            self.source.name(),
            "DESCRIBE",
            self.source.describe(database, table),
        )
        .await
        {
            Ok(columns) => columns,
            Err(e) => {
                warn!(
                    table = %format!("{}.{}", database, table),
                    error = %e,
                    "Could not describe source table"
                );
                metrics::record_error("downsync", "describe");
                metrics::record_table_sync(database, table, "failed", started.elapsed());
                return TableOutcome::Failed(e.to_string());
            }
        };

        let spec = cursor::resolve_cursor(
            &columns,
            self.config.cursor_override(database, table),
            &self.config.cursor_priority,
        );
        let Some(spec) = spec else {
            info!(
                table = %format!("{}.{}", database, table),
                "No date/time column; not incrementally syncable"
            );
            metrics::record_table_sync(database, table, "no_cursor", started.elapsed());
            return TableOutcome::Synced {
                bootstrapped,
                cursor: None,
                rows_pulled: 0,
            };
        };

        match cursor::sync_incremental(
            self.target.as_ref(),
            &self.config.source,
            database,
            table,
            &spec,
            self.op_timeout,
        )
        .await
        {
            Ok(rows_pulled) => {
                metrics::record_table_sync(database, table, "synced", started.elapsed());
                TableOutcome::Synced {
                    bootstrapped,
                    cursor: Some(spec.column),
                    rows_pulled,
                }
            }
            Err(e) => {
                warn!(
                    table = %format!("{}.{}", database, table),
                    cursor = %spec.column,
                    error = %e,
                    "Incremental pull failed"
                );
                metrics::record_error("downsync", "pull");
                metrics::record_table_sync(database, table, "failed", started.elapsed());
                TableOutcome::Failed(e.to_string())
            }
        }
    }
}
