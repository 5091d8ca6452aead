// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The local write-ahead staging store.
//!
//! Rows polled from the venue are appended here as immutable, timestamped
//! batch files and only removed once every flush destination has confirmed
//! the insert. Losing the destination databases therefore never loses rows;
//! the staging directory is the durability boundary.
//!
//! # File Layout
//!
//! One file per batch, named so that lexicographic order equals creation
//! order:
//!
//! ```text
//! data/buffer/
//!   trades_20250601_120000_000142_000001.json
//!   trades_20250601_123000_991204_000002.json
//!   account_20250601_120001_004310_000003.json
//! ```
//!
//! `{category}_{timestamp}_{seq}.json` — `seq` is a process-wide monotonic
//! counter that disambiguates same-microsecond appends.
//!
//! # Claim Guard
//!
//! Flushing a category takes an in-process claim so two concurrent flush
//! calls for the same category serialize instead of double-consuming the
//! same files. Overlap across *processes* remains an operational
//! precondition: the scheduler must not start a second flush run while one
//! is still executing.

use crate::batch::RowBatch;
use crate::error::{RelayError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Guard proving the holder has exclusive in-process access to a category.
///
/// Dropping the guard releases the claim.
pub struct ClaimGuard {
    _inner: tokio::sync::OwnedMutexGuard<()>,
}

/// Append-only directory of immutable batch files.
pub struct StagingStore {
    dir: PathBuf,
    /// Monotonic disambiguator for same-microsecond appends.
    seq: AtomicU64,
    /// Per-category claim locks (in-process only).
    claims: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StagingStore {
    /// Create a store rooted at `dir`. The directory itself is created
    /// lazily on first append.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// The staging directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Take the in-process claim for a category, waiting if another flush
    /// of the same category is in flight.
    pub async fn claim(&self, category: &str) -> ClaimGuard {
        let lock = {
            let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                claims
                    .entry(category.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        ClaimGuard {
            _inner: lock.lock_owned().await,
        }
    }

    /// Write `batch` as one new immutable batch file.
    ///
    /// No-op on an empty batch (returns `Ok(None)`). Disk errors propagate:
    /// if this fails the rows were never durable and the caller decides
    /// whether to retry.
    pub fn append(&self, category: &str, batch: &RowBatch) -> Result<Option<PathBuf>> {
        if batch.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.dir).map_err(|e| RelayError::staging(&self.dir, e))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let filename = format!("{}_{}_{:06}.json", category, timestamp, seq);
        let path = self.dir.join(filename);

        let body = serde_json::to_vec(batch)
            .map_err(|e| RelayError::Internal(format!("batch serialization failed: {}", e)))?;
        fs::write(&path, body).map_err(|e| RelayError::staging(&path, e))?;

        debug!(
            category,
            rows = batch.len(),
            path = %path.display(),
            "Staged batch"
        );
        Ok(Some(path))
    }

    /// All pending batch files for a category, in creation order.
    ///
    /// Scoped by filename prefix; safe to call while other categories are
    /// being appended concurrently. A missing staging directory means no
    /// pending batches, not an error.
    pub fn list_pending(&self, category: &str) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelayError::staging(&self.dir, e)),
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RelayError::staging(&self.dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_category_file(name, category) {
                paths.push(entry.path());
            }
        }

        // Filename encodes creation order
        paths.sort();
        Ok(paths)
    }

    /// Read and concatenate every pending batch for a category.
    ///
    /// Returns the combined row-set plus the paths of the files that
    /// decoded successfully; the caller passes those paths back to
    /// [`delete`](Self::delete) once the rows are durably applied
    /// downstream. A file that fails to read or decode is logged and
    /// skipped (and its path withheld, so it is retried next flush).
    pub fn consume(&self, category: &str) -> Result<(RowBatch, Vec<PathBuf>)> {
        let pending = self.list_pending(category)?;

        let mut combined = RowBatch::empty();
        let mut valid = Vec::with_capacity(pending.len());

        for path in pending {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(category, path = %path.display(), error = %e, "Failed to read staged batch, skipping");
                    continue;
                }
            };
            match serde_json::from_slice::<RowBatch>(&bytes) {
                Ok(batch) => {
                    combined.extend(batch);
                    valid.push(path);
                }
                Err(e) => {
                    warn!(category, path = %path.display(), error = %e, "Failed to decode staged batch, skipping");
                    crate::metrics::record_corrupt_file(category);
                }
            }
        }

        Ok((combined, valid))
    }

    /// Remove consumed batch files.
    ///
    /// Only called after the flush engine has confirmed that every
    /// attempted destination insert succeeded. Individual unlink failures
    /// are logged and do not abort the remaining deletions.
    pub fn delete(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to delete staged batch");
            }
        }
    }
}

/// Check whether `filename` is a batch file belonging to `category`.
///
/// The prefix match requires the timestamp to follow immediately, so
/// category "trades" never claims "trades_v2" files.
fn is_category_file(filename: &str, category: &str) -> bool {
    let Some(rest) = filename.strip_prefix(category) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('_') else {
        return false;
    };
    // Timestamp section starts with eight date digits
    rest.len() > 8
        && rest.as_bytes()[..8].iter().all(|b| b.is_ascii_digit())
        && filename.ends_with(".json")
}
