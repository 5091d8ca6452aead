//! # Telemetry Relay
//!
//! The reliability layer between venue telemetry ingestion and two
//! analytical ClickHouse clusters, plus a scheduled cloud → on-premise
//! replication engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                           telemetry-relay                             │
//! │                                                                       │
//! │  ┌──────────────┐    ┌─────────────┐    ┌──────────────────────────┐  │
//! │  │ StagingStore │───►│ FlushEngine │───►│ destinations (local +    │  │
//! │  │ (disk WAL)   │    │ (reconcile, │    │ cloud, independent       │  │
//! │  └──────────────┘    │  fan out)   │    │ failure domains)         │  │
//! │                      └─────────────┘    └──────────────────────────┘  │
//! │                                                                       │
//! │  ┌──────────────────────────────────────────────────────────────────┐ │
//! │  │ DownsyncEngine: cloud ──(bootstrap + watermark pull)──► local    │ │
//! │  └──────────────────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Pipelines, One Problem
//!
//! 1. **Flush**: staged batch files → every destination, at-least-once;
//!    files are deleted only after all destinations accepted the rows.
//! 2. **Downsync**: per table, create-if-missing then pull rows strictly
//!    above the target's watermark (`max(cursor)` at the target, derived
//!    fresh each run).
//!
//! Both answer the same question: never lose a row, never double-apply
//! beyond what duplicate-tolerant storage absorbs, tolerate an endpoint
//! being unreachable.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use telemetry_relay::{FlushEngine, StagingStore, RelayConfig};
//! use std::sync::Arc;
//!
//! # async fn example(config: RelayConfig, destinations: Vec<Arc<dyn telemetry_relay::Endpoint>>) {
//! let staging = Arc::new(StagingStore::new(config.staging.dir.clone()));
//! let engine = FlushEngine::new(staging, destinations, config.categories.clone(), &config.flush);
//! let reports = engine.flush_all().await;
//! # }
//! ```

pub mod batch;
pub mod clickhouse;
pub mod config;
pub mod ddl;
pub mod endpoint;
pub mod error;
pub mod flush;
pub mod metrics;
pub mod resilience;
pub mod schema;
pub mod staging;
pub mod sync;

// Re-exports for convenience
pub use batch::RowBatch;
pub use clickhouse::ClickHouseEndpoint;
pub use config::{CategoryConfig, DownsyncConfig, EndpointConfig, FlushConfig, RelayConfig};
pub use endpoint::{ColumnInfo, Endpoint, TableInfo};
pub use error::{RelayError, Result};
pub use flush::{DestinationOutcome, FlushEngine, FlushReport};
pub use staging::StagingStore;
pub use sync::{DownsyncEngine, TableOutcome, TableReport};
