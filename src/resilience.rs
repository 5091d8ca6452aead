//! Resilience utilities: bulkheads and per-call timeouts.
//!
//! - [`Bulkhead`]: Semaphore to limit concurrent operations
//! - [`with_timeout`]: Deadline wrapper that converts elapsed timers into
//!   the same retryable error shape as a failed database call
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), telemetry_relay::resilience::BulkheadFull> {
//! use telemetry_relay::resilience::Bulkhead;
//!
//! // Max 4 tables syncing concurrently
//! let bulkhead = Bulkhead::new(4);
//! let _permit = bulkhead.acquire().await?;
//! // permit dropped = slot released
//! # Ok(())
//! # }
//! ```

use crate::error::{RelayError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error when bulkhead is full.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Bulkhead pattern: limits concurrent operations to prevent resource exhaustion.
///
/// Uses a semaphore to limit how many operations can run simultaneously.
/// The downsync engine holds one permit per in-flight table so a wide
/// database cannot saturate the target server with remote-read copies.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    /// Create a new bulkhead with the given concurrency limit.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Acquire a permit, waiting if necessary.
    ///
    /// Returns a permit that releases the slot when dropped.
    pub async fn acquire(&self) -> std::result::Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Try to acquire a permit without waiting.
    ///
    /// Returns `None` if the bulkhead is full.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    /// Get the number of available permits.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the maximum concurrent operations allowed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Check if the bulkhead is full (no permits available).
    pub fn is_full(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

/// Run a fallible operation under a deadline.
///
/// An elapsed timer maps to a retryable database error carrying the
/// endpoint and operation names, so callers treat a hung call and a
/// failed call identically.
pub async fn with_timeout<T, F>(
    deadline: Duration,
    endpoint: &str,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::database(
            endpoint,
            operation,
            format!("timed out after {:?}", deadline),
        )),
    }
}
