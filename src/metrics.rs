//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Flush outcomes per category and destination
//! - Staged file backlog
//! - Downsync table outcomes and row movement
//! - Watermark-based sync lag
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `relay_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Flush Metrics
// =============================================================================

/// Record one flush attempt for a category with detailed stats.
pub fn record_flush(
    category: &str,
    rows: usize,
    files: usize,
    deleted: usize,
    duration: Duration,
) {
    let cat = category.to_string();

    counter!("relay_flush_attempts_total", "category" => cat.clone()).increment(1);
    counter!("relay_flush_rows_total", "category" => cat.clone()).increment(rows as u64);
    counter!("relay_flush_files_total", "category" => cat.clone()).increment(files as u64);
    counter!("relay_flush_files_deleted_total", "category" => cat.clone())
        .increment(deleted as u64);

    histogram!("relay_flush_duration_seconds", "category" => cat.clone())
        .record(duration.as_secs_f64());
    histogram!("relay_flush_batch_rows", "category" => cat).record(rows as f64);
}

/// Record one destination insert outcome within a flush.
pub fn record_destination_insert(category: &str, destination: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "relay_destination_inserts_total",
        "category" => category.to_string(),
        "destination" => destination.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a staged file skipped because it could not be decoded.
pub fn record_corrupt_file(category: &str) {
    counter!("relay_corrupt_files_total", "category" => category.to_string()).increment(1);
}

/// Gauge for staged files awaiting flush in one category.
pub fn set_pending_files(category: &str, count: usize) {
    gauge!("relay_pending_files", "category" => category.to_string()).set(count as f64);
}

// =============================================================================
// Downsync Metrics
// =============================================================================

/// Record one table sync outcome.
pub fn record_table_sync(database: &str, table: &str, outcome: &str, duration: Duration) {
    counter!(
        "relay_table_syncs_total",
        "database" => database.to_string(),
        "table" => table.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        "relay_table_sync_duration_seconds",
        "database" => database.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record rows pulled from the source during one incremental pass.
pub fn record_rows_pulled(database: &str, table: &str, rows: u64) {
    if rows > 0 {
        counter!(
            "relay_rows_pulled_total",
            "database" => database.to_string(),
            "table" => table.to_string()
        )
        .increment(rows);
    }
}

/// Record a table created at the target during bootstrap.
pub fn record_table_bootstrapped(database: &str, table: &str) {
    counter!(
        "relay_tables_bootstrapped_total",
        "database" => database.to_string(),
        "table" => table.to_string()
    )
    .increment(1);
}

/// Record errors by pipeline and type.
pub fn record_error(pipeline: &str, error_type: &str) {
    counter!(
        "relay_errors_total",
        "pipeline" => pipeline.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}
