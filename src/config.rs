//! Configuration for the relay.
//!
//! Configuration can be constructed programmatically or deserialized from a
//! JSON file (the `relay` binary does the latter).
//!
//! # Configuration Structure
//!
//! ```text
//! RelayConfig
//! ├── staging: StagingConfig        # local batch-file directory
//! ├── destinations: [EndpointConfig]# flush targets (e.g. local + cloud)
//! ├── categories: [CategoryConfig]  # category -> destination table routing
//! ├── flush: FlushConfig            # per-call timeout for flush inserts
//! └── downsync: DownsyncConfig      # cloud -> on-premise pull settings
//!     ├── source: EndpointConfig    # source of truth (cloud)
//!     ├── target: EndpointConfig    # on-premise target
//!     ├── databases: [String]       # databases to sync
//!     ├── cursor_overrides          # "db.table" -> cursor column
//!     ├── skip_tables               # deprecated "db.table" entries
//!     └── cursor_priority           # ranked keywords for inference
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "staging": { "dir": "data/buffer" },
//!   "destinations": [
//!     { "name": "local", "http_url": "http://chenlin04:8123", "user": "relay", "password": "..." },
//!     { "name": "cloud", "http_url": "https://abc.clickhouse.cloud:8443", "user": "relay", "password": "..." }
//!   ],
//!   "downsync": {
//!     "source": { "name": "cloud", "http_url": "https://abc.clickhouse.cloud:8443", "native_host": "abc.clickhouse.cloud", "native_port": 9440, "user": "relay", "password": "..." },
//!     "target": { "name": "local", "http_url": "http://chenlin04:8123", "user": "relay", "password": "..." },
//!     "databases": ["hyperliquid", "maicro_logs", "binance", "maicro_monitors"],
//!     "cursor_overrides": { "maicro_monitors.trades": "time" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object for both pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local staging directory settings.
    #[serde(default)]
    pub staging: StagingConfig,

    /// Flush destinations. Two are active in production (local + cloud);
    /// the flush engine treats them as independent failure domains.
    pub destinations: Vec<EndpointConfig>,

    /// Category routing. Defaults to the venue telemetry streams.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,

    /// Flush engine tunables.
    #[serde(default)]
    pub flush: FlushConfig,

    /// Downward-sync settings.
    pub downsync: DownsyncConfig,
}

impl RelayConfig {
    /// Minimal config for tests: one staging dir, no endpoints.
    pub fn for_testing(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging: StagingConfig {
                dir: staging_dir.into(),
            },
            destinations: Vec::new(),
            categories: default_categories(),
            flush: FlushConfig::default(),
            downsync: DownsyncConfig::for_testing(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StagingConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Local staging directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory holding staged batch files. Created on first append.
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/buffer")
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EndpointConfig: one database endpoint (HTTP interface + native address)
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for one ClickHouse endpoint.
///
/// `http_url` is used for all queries issued by this process. The native
/// host/port pair is only needed on a *source* endpoint: it is what the
/// target's server-side `remoteSecure(...)` expression dials during
/// bootstrap and incremental copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Identity used in logs and metrics (e.g. "local", "cloud").
    pub name: String,

    /// HTTP interface URL, e.g. `http://host:8123`.
    pub http_url: String,

    /// Native protocol host, for `remoteSecure()` expressions.
    #[serde(default)]
    pub native_host: Option<String>,

    /// Native protocol port. ClickHouse Cloud uses 9440 (TLS).
    #[serde(default = "default_native_port")]
    pub native_port: u16,

    pub user: String,
    pub password: String,
}

fn default_native_port() -> u16 {
    9440
}

impl EndpointConfig {
    /// Create an endpoint config for testing.
    pub fn for_testing(name: &str, http_url: &str) -> Self {
        Self {
            name: name.to_string(),
            http_url: http_url.to_string(),
            native_host: None,
            native_port: 9440,
            user: "default".to_string(),
            password: String::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CategoryConfig: category -> table routing
// ═══════════════════════════════════════════════════════════════════════════════

/// Routing for one logical stream of staged data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Staging filename prefix, e.g. "trades".
    pub name: String,

    /// Fully qualified destination table, e.g. "maicro_monitors.trades".
    /// The same table name is used at every destination.
    pub table: String,

    /// Run `OPTIMIZE TABLE ... FINAL` after a successful insert.
    /// Only sensible for ReplacingMergeTree-backed tables; best effort.
    #[serde(default)]
    pub optimize_final: bool,
}

impl CategoryConfig {
    fn new(name: &str, table: &str, optimize_final: bool) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            optimize_final,
        }
    }
}

/// The venue telemetry streams this deployment stages and flushes.
fn default_categories() -> Vec<CategoryConfig> {
    vec![
        CategoryConfig::new("account", "maicro_monitors.account_snapshots", false),
        CategoryConfig::new("positions", "maicro_monitors.positions_snapshots", false),
        CategoryConfig::new("trades", "maicro_monitors.trades", true),
        CategoryConfig::new("orders", "maicro_monitors.orders", true),
        CategoryConfig::new("funding", "maicro_monitors.funding_payments", true),
        CategoryConfig::new("ledger", "maicro_monitors.ledger_updates", true),
        CategoryConfig::new("candles", "maicro_monitors.candles", true),
        CategoryConfig::new("meta", "maicro_monitors.hl_meta", false),
    ]
}

// ═══════════════════════════════════════════════════════════════════════════════
// FlushConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Flush engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Timeout for each destination call as a duration string (e.g. "60s").
    /// A timed-out insert is treated identically to a failed insert.
    #[serde(default = "default_op_timeout")]
    pub op_timeout: String,
}

fn default_op_timeout() -> String {
    "60s".to_string()
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            op_timeout: default_op_timeout(),
        }
    }
}

impl FlushConfig {
    /// Parse `op_timeout` to a Duration.
    pub fn op_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.op_timeout).unwrap_or(Duration::from_secs(60))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DownsyncConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Cloud → on-premise replication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownsyncConfig {
    /// Source of truth (remote).
    pub source: EndpointConfig,

    /// Target endpoint (on-premise).
    pub target: EndpointConfig,

    /// Databases to sync, in order.
    #[serde(default)]
    pub databases: Vec<String>,

    /// Per-table cursor column overrides, keyed by "database.table".
    /// An override naming a column absent from the source table falls back
    /// to inference.
    #[serde(default)]
    pub cursor_overrides: HashMap<String, String>,

    /// Deprecated tables that must not be synced, as "database.table".
    #[serde(default)]
    pub skip_tables: Vec<String>,

    /// Ranked cursor-inference keywords, best first. An exact column-name
    /// match on an earlier keyword beats any match on a later one; exact
    /// beats substring at the same rank.
    #[serde(default = "default_cursor_priority")]
    pub cursor_priority: Vec<String>,

    /// Maximum tables synced concurrently within one database.
    #[serde(default = "default_table_concurrency")]
    pub table_concurrency: usize,

    /// Timeout for each database call as a duration string. Remote-read
    /// copies can move large tables, so this defaults high.
    #[serde(default = "default_sync_timeout")]
    pub op_timeout: String,
}

fn default_cursor_priority() -> Vec<String> {
    vec![
        "timestamp".to_string(),
        "time".to_string(),
        "date".to_string(),
    ]
}

fn default_table_concurrency() -> usize {
    4
}

fn default_sync_timeout() -> String {
    "30m".to_string()
}

impl DownsyncConfig {
    /// Parse `op_timeout` to a Duration.
    pub fn op_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.op_timeout)
            .unwrap_or(Duration::from_secs(30 * 60))
    }

    /// Look up a cursor override for a table.
    pub fn cursor_override(&self, database: &str, table: &str) -> Option<&str> {
        self.cursor_overrides
            .get(&format!("{}.{}", database, table))
            .map(|s| s.as_str())
    }

    /// Check the deprecated-table skip-list.
    pub fn is_skipped(&self, database: &str, table: &str) -> bool {
        let key = format!("{}.{}", database, table);
        self.skip_tables.iter().any(|t| t == &key)
    }

    /// Create a minimal config for testing (endpoints unused by mocks).
    pub fn for_testing() -> Self {
        Self {
            source: EndpointConfig::for_testing("cloud", "http://cloud:8123"),
            target: EndpointConfig::for_testing("local", "http://local:8123"),
            databases: Vec::new(),
            cursor_overrides: HashMap::new(),
            skip_tables: Vec::new(),
            cursor_priority: default_cursor_priority(),
            table_concurrency: default_table_concurrency(),
            op_timeout: "5s".to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
