// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The flush engine: staged batches → all destinations, at-least-once.
//!
//! ```text
//!            ┌──────────────┐
//!            │ StagingStore │  category files on disk
//!            └──────┬───────┘
//!                   │ claim + consume
//!                   ▼
//!            ┌──────────────┐     describe      ┌─────────────┐
//!            │ FlushEngine  │◄─────────────────►│ destination │ (×N)
//!            │  reconcile   │                   └─────────────┘
//!            │  project     │     insert (concurrent, timed)
//!            │  delete?     │──────────────────►
//!            └──────────────┘
//! ```
//!
//! # Delivery Contract
//!
//! Staged files are deleted only when **every** destination accepted the
//! insert. One failure anywhere retains the files, so the next cycle
//! re-inserts the same rows into destinations that already took them.
//! At-least-once, never at-most-once: destination tables are expected to
//! absorb replays (ReplacingMergeTree keyed on natural IDs).
//!
//! # Schema Reconciliation
//!
//! Destination schemas are described fresh on every cycle and intersected
//! with the batch's columns ([`schema::common_columns`]); only the common
//! subset is inserted anywhere. An empty intersection means no insert is
//! attempted and the files are retained.

use crate::config::{CategoryConfig, FlushConfig};
use crate::endpoint::Endpoint;
use crate::error::{RelayError, Result};
use crate::resilience::with_timeout;
use crate::staging::StagingStore;
use crate::{metrics, schema};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of one destination within a flush cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOutcome {
    /// The projected batch was accepted.
    Inserted,
    /// Describe or insert failed; the error text is retained for the report.
    Failed(String),
    /// No insert was issued (nothing to send after reconciliation).
    NotAttempted,
}

impl DestinationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// What happened to one category during a flush cycle.
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub category: String,
    /// Rows in the combined batch (after corrupt-file exclusion).
    pub rows: usize,
    /// Staged files consumed this cycle.
    pub files: usize,
    /// Per-destination outcomes, in destination order.
    pub outcomes: Vec<(String, DestinationOutcome)>,
    /// Whether the staged files were deleted.
    pub deleted: bool,
}

impl FlushReport {
    fn idle(category: &str) -> Self {
        Self {
            category: category.to_string(),
            rows: 0,
            files: 0,
            outcomes: Vec::new(),
            deleted: false,
        }
    }

    /// True when every destination accepted the batch.
    pub fn fully_flushed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|(_, o)| o.is_success())
    }
}

/// Drains the staging store into every destination.
pub struct FlushEngine {
    staging: Arc<StagingStore>,
    destinations: Vec<Arc<dyn Endpoint>>,
    categories: Vec<CategoryConfig>,
    op_timeout: Duration,
}

impl FlushEngine {
    pub fn new(
        staging: Arc<StagingStore>,
        destinations: Vec<Arc<dyn Endpoint>>,
        categories: Vec<CategoryConfig>,
        config: &FlushConfig,
    ) -> Self {
        Self {
            staging,
            destinations,
            categories,
            op_timeout: config.op_timeout_duration(),
        }
    }

    /// Flush every configured category once, in configuration order.
    ///
    /// Categories are isolated: a failure in one does not stop the rest.
    pub async fn flush_all(&self) -> Vec<FlushReport> {
        let mut reports = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            let report = self.flush_category(category).await;
            reports.push(report);
        }

        let flushed = reports.iter().filter(|r| r.deleted).count();
        let pending: usize = reports.iter().filter(|r| !r.deleted).map(|r| r.files).sum();
        info!(
            categories = reports.len(),
            flushed,
            files_retained = pending,
            "Flush cycle complete"
        );
        reports
    }

    /// Flush one category: claim, consume, reconcile, fan out, settle.
    pub async fn flush_category(&self, category: &CategoryConfig) -> FlushReport {
        let _guard = self.staging.claim(&category.name).await;
        let started = Instant::now();

        let (batch, files) = match self.staging.consume(&category.name) {
            Ok(consumed) => consumed,
            Err(e) => {
                warn!(category = %category.name, error = %e, "Failed to read staged batches");
                metrics::record_error("flush", "staging");
                return FlushReport::idle(&category.name);
            }
        };
        metrics::set_pending_files(&category.name, files.len());

        if files.is_empty() {
            debug!(category = %category.name, "Nothing staged");
            return FlushReport::idle(&category.name);
        }

        let mut report = FlushReport {
            category: category.name.clone(),
            rows: batch.len(),
            files: files.len(),
            outcomes: Vec::new(),
            deleted: false,
        };

        let (database, table) = match split_table(&category.table) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(category = %category.name, error = %e, "Bad table routing");
                metrics::record_error("flush", "config");
                return report;
            }
        };

        // Fresh describes every cycle; schemas evolve between runs
        let mut described: Vec<Vec<String>> = Vec::new();
        let mut describe_failed = Vec::new();
        for dest in &self.destinations {
            match with_timeout(
                self.op_timeout,
                dest.name(),
                "DESCRIBE",
                dest.describe(database, table),
            )
            .await
            {
                Ok(cols) => described.push(cols.into_iter().map(|c| c.name).collect()),
                Err(e) => {
                    warn!(
                        category = %category.name,
                        destination = dest.name(),
                        error = %e,
                        "Describe failed"
                    );
                    describe_failed.push((dest.name().to_string(), e.to_string()));
                }
            }
        }

        // Any destination we cannot describe blocks deletion for the cycle:
        // inserting into the others would still be wasted work, since the
        // files must be replayed in full next time anyway.
        if !describe_failed.is_empty() {
            for dest in &self.destinations {
                let outcome = describe_failed
                    .iter()
                    .find(|(name, _)| name == dest.name())
                    .map(|(_, e)| DestinationOutcome::Failed(e.clone()))
                    .unwrap_or(DestinationOutcome::NotAttempted);
                if let DestinationOutcome::Failed(_) = outcome {
                    metrics::record_destination_insert(&category.name, dest.name(), false);
                }
                report.outcomes.push((dest.name().to_string(), outcome));
            }
            metrics::record_error("flush", "describe");
            return report;
        }

        let common = schema::common_columns(&described, &batch.columns);
        if common.is_empty() {
            warn!(
                category = %category.name,
                batch_columns = batch.columns.len(),
                "No columns common to batch and all destinations; retaining files"
            );
            for dest in &self.destinations {
                report
                    .outcomes
                    .push((dest.name().to_string(), DestinationOutcome::NotAttempted));
            }
            return report;
        }
        if common.len() < batch.columns.len() {
            debug!(
                category = %category.name,
                batch_columns = batch.columns.len(),
                common_columns = common.len(),
                "Projecting batch to reconciled column subset"
            );
        }

        let projected = Arc::new(batch.project(&common));

        // One insert per destination, concurrently, each under the op timeout
        let mut set = JoinSet::new();
        for (idx, dest) in self.destinations.iter().enumerate() {
            let dest = Arc::clone(dest);
            let projected = Arc::clone(&projected);
            let database = database.to_string();
            let table = table.to_string();
            let timeout = self.op_timeout;
            set.spawn(async move {
                let name = dest.name().to_string();
                let result = with_timeout(
                    timeout,
                    &name,
                    "INSERT",
                    dest.insert(&database, &table, &projected),
                )
                .await;
                (idx, name, result)
            });
        }

        let mut outcomes: Vec<Option<(String, DestinationOutcome)>> =
            vec![None; self.destinations.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, name, Ok(()))) => {
                    metrics::record_destination_insert(&category.name, &name, true);
                    outcomes[idx] = Some((name, DestinationOutcome::Inserted));
                }
                Ok((idx, name, Err(e))) => {
                    warn!(
                        category = %category.name,
                        destination = %name,
                        error = %e,
                        "Insert failed; staged files retained"
                    );
                    metrics::record_destination_insert(&category.name, &name, false);
                    outcomes[idx] = Some((name, DestinationOutcome::Failed(e.to_string())));
                }
                Err(e) => {
                    warn!(category = %category.name, error = %e, "Insert task panicked");
                    metrics::record_error("flush", "join");
                }
            }
        }
        report.outcomes = outcomes
            .into_iter()
            .zip(&self.destinations)
            .map(|(slot, dest)| {
                slot.unwrap_or_else(|| {
                    (
                        dest.name().to_string(),
                        DestinationOutcome::Failed("insert task aborted".to_string()),
                    )
                })
            })
            .collect();

        if report.fully_flushed() {
            self.staging.delete(&files);
            report.deleted = true;
            info!(
                category = %category.name,
                rows = report.rows,
                files = report.files,
                "Flushed and cleared staged batches"
            );

            if category.optimize_final {
                self.optimize_final(&category.name, database, table).await;
            }
        }

        metrics::record_flush(
            &category.name,
            report.rows,
            report.files,
            if report.deleted { report.files } else { 0 },
            started.elapsed(),
        );
        report
    }

    /// Best-effort merge compaction after a successful flush.
    ///
    /// Replay tolerance relies on ReplacingMergeTree collapsing duplicate
    /// keys; OPTIMIZE FINAL forces the collapse instead of waiting for a
    /// background merge. Failure here never affects the delivery contract.
    async fn optimize_final(&self, category: &str, database: &str, table: &str) {
        let sql = format!("OPTIMIZE TABLE {}.{} FINAL", database, table);
        for dest in &self.destinations {
            if let Err(e) =
                with_timeout(self.op_timeout, dest.name(), "OPTIMIZE", dest.execute(&sql)).await
            {
                warn!(
                    category = %category,
                    destination = dest.name(),
                    error = %e,
                    "OPTIMIZE FINAL failed (non-fatal)"
                );
            }
        }
    }
}

/// Split "database.table" routing into its parts.
fn split_table(qualified: &str) -> Result<(&str, &str)> {
    match qualified.split_once('.') {
        Some((db, table)) if !db.is_empty() && !table.is_empty() => Ok((db, table)),
        _ => Err(RelayError::Config(format!(
            "table route '{}' is not of the form database.table",
            qualified
        ))),
    }
}
