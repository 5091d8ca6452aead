// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the relay.
//!
//! Errors are categorized by their source so callers can apply the right
//! isolation policy: database errors are isolated per destination or per
//! table and never abort sibling units of work, while staging I/O errors
//! propagate to whoever produced the rows.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Database` | Yes | Destination unreachable, insert rejected, timeout |
//! | `Staging` | No | Local disk errors while appending or reading batches |
//! | `BatchDecode` | No | A staged batch file failed to deserialize |
//! | `Ddl` | No | CREATE TABLE statement could not be parsed |
//! | `Config` | No | Configuration invalid |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! "Retryable" here means "the unit of work will be re-attempted on the next
//! scheduled run": a failed destination insert leaves the staged files on
//! disk, and a failed table sync is retried next cycle. Non-retryable errors
//! need operator attention before the data can move again.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while staging or replicating data.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Local staging I/O failure.
    ///
    /// Raised on `append`, `list_pending`, or `consume` when the staging
    /// directory cannot be read or written. Never swallowed: if staging
    /// fails the rows were never durable and the caller must decide
    /// whether to retry immediately.
    #[error("Staging I/O error at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A staged batch file failed to deserialize.
    ///
    /// During a flush the file is skipped and its siblings are still
    /// processed; this variant only surfaces when a caller asks about a
    /// specific file.
    #[error("Batch decode error in {path}: {message}")]
    BatchDecode { path: PathBuf, message: String },

    /// Database operation failure.
    ///
    /// Covers unreachable endpoints, rejected inserts, introspection
    /// failures, and timeouts. Isolated per destination (flush) or per
    /// table (downsync); the retained files or derived watermark make the
    /// work re-attemptable on the next run.
    #[error("Database error ({endpoint}, {operation}): {message}")]
    Database {
        endpoint: String,
        operation: String,
        message: String,
    },

    /// CREATE TABLE statement could not be parsed.
    ///
    /// Bootstrap for that table is skipped; the statement text needs
    /// inspection.
    #[error("DDL parse error: {0}")]
    Ddl(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create a database error with endpoint and operation context.
    pub fn database(
        endpoint: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Database {
            endpoint: endpoint.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a staging error for a path.
    pub fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Staging {
            path: path.into(),
            source,
        }
    }

    /// Check if the failed unit of work will be re-attempted on a later run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database { .. } => true,
            Self::Staging { .. } => false,
            Self::BatchDecode { .. } => false,
            Self::Ddl(_) => false,
            Self::Config(_) => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e
            .url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Self::Database {
            endpoint,
            operation: "http".to_string(),
            message: e.to_string(),
        }
    }
}
