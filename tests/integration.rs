//! Integration tests for the flush and downsync engines.
//!
//! Both engines run against in-memory mock endpoints with failure
//! injection (see `common::mock_endpoint`); the staging store runs
//! against a real temporary directory.

mod common;

use common::MockEndpoint;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use telemetry_relay::endpoint::ColumnInfo;
use telemetry_relay::{
    CategoryConfig, DownsyncConfig, Endpoint, FlushConfig, FlushEngine, RowBatch, StagingStore,
    DownsyncEngine, TableOutcome,
};
use tempfile::tempdir;

// =============================================================================
// Helpers
// =============================================================================

fn trades_category() -> CategoryConfig {
    CategoryConfig {
        name: "trades".to_string(),
        table: "maicro_monitors.trades".to_string(),
        optimize_final: false,
    }
}

fn trade_batch(ids: &[u64]) -> RowBatch {
    let rows = ids
        .iter()
        .map(|id| vec![json!(id), json!("BTC"), json!(50000.0)])
        .collect();
    RowBatch::new(
        vec!["id".to_string(), "coin".to_string(), "px".to_string()],
        rows,
    )
    .unwrap()
}

fn trade_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "UInt64"),
        ColumnInfo::new("coin", "String"),
        ColumnInfo::new("px", "Float64"),
    ]
}

async fn flush_fixture() -> (tempfile::TempDir, Arc<StagingStore>, Arc<MockEndpoint>, Arc<MockEndpoint>) {
    let dir = tempdir().unwrap();
    let staging = Arc::new(StagingStore::new(dir.path()));

    let local = MockEndpoint::new("local");
    let cloud = MockEndpoint::new("cloud");
    for dest in [&local, &cloud] {
        dest.add_table(
            "maicro_monitors",
            "trades",
            trade_columns(),
            "ReplacingMergeTree",
            "CREATE TABLE maicro_monitors.trades (...) ENGINE = ReplacingMergeTree() ORDER BY id",
        )
        .await;
    }
    (dir, staging, local, cloud)
}

fn engine_for(
    staging: Arc<StagingStore>,
    destinations: Vec<Arc<dyn Endpoint>>,
    category: CategoryConfig,
) -> FlushEngine {
    FlushEngine::new(staging, destinations, vec![category], &FlushConfig::default())
}

// =============================================================================
// Flush Engine
// =============================================================================

#[tokio::test]
async fn flush_deletes_files_only_after_all_destinations_succeed() {
    let (_dir, staging, local, cloud) = flush_fixture().await;
    staging.append("trades", &trade_batch(&[1])).unwrap();
    staging.append("trades", &trade_batch(&[2])).unwrap();

    // First flush: cloud rejects the insert
    cloud.fail_next_inserts(1);
    let engine = engine_for(
        Arc::clone(&staging),
        vec![local.clone(), cloud.clone()],
        trades_category(),
    );

    let report = engine.flush_category(&trades_category()).await;
    assert!(!report.deleted);
    assert_eq!(report.rows, 2);
    assert_eq!(staging.list_pending("trades").unwrap().len(), 2, "files retained");
    assert_eq!(local.row_count("maicro_monitors", "trades").await, 2);
    assert_eq!(cloud.row_count("maicro_monitors", "trades").await, 0);

    // Second flush: both healthy; the full row-set replays everywhere
    let report = engine.flush_category(&trades_category()).await;
    assert!(report.deleted);
    assert!(staging.list_pending("trades").unwrap().is_empty());
    assert_eq!(local.row_count("maicro_monitors", "trades").await, 4, "replayed into local");
    assert_eq!(cloud.row_count("maicro_monitors", "trades").await, 2);
}

#[tokio::test]
async fn flush_intersects_columns_across_all_destinations() {
    let dir = tempdir().unwrap();
    let staging = Arc::new(StagingStore::new(dir.path()));

    // Destination A has {a,b,c}, B has {a,b,d}; batch carries {a,b,c,d}
    let a = MockEndpoint::new("a");
    a.add_table(
        "db",
        "t",
        vec![
            ColumnInfo::new("a", "UInt64"),
            ColumnInfo::new("b", "String"),
            ColumnInfo::new("c", "Float64"),
        ],
        "MergeTree",
        "CREATE TABLE db.t (...) ENGINE = MergeTree",
    )
    .await;
    let b = MockEndpoint::new("b");
    b.add_table(
        "db",
        "t",
        vec![
            ColumnInfo::new("a", "UInt64"),
            ColumnInfo::new("b", "String"),
            ColumnInfo::new("d", "Float64"),
        ],
        "MergeTree",
        "CREATE TABLE db.t (...) ENGINE = MergeTree",
    )
    .await;

    let batch = RowBatch::new(
        vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
        vec![vec![json!(1), json!("x"), json!(2.0), json!(3.0)]],
    )
    .unwrap();
    let category = CategoryConfig {
        name: "t".to_string(),
        table: "db.t".to_string(),
        optimize_final: false,
    };
    staging.append("t", &batch).unwrap();

    let engine = engine_for(Arc::clone(&staging), vec![a.clone(), b.clone()], category.clone());
    let report = engine.flush_category(&category).await;
    assert!(report.deleted);

    for dest in [&a, &b] {
        let inserts = dest.inserted().await;
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].columns, vec!["a".to_string(), "b".to_string()]);
    }
}

#[tokio::test]
async fn flush_with_empty_intersection_retains_files() {
    let dir = tempdir().unwrap();
    let staging = Arc::new(StagingStore::new(dir.path()));

    let dest = MockEndpoint::new("local");
    dest.add_table(
        "db",
        "t",
        vec![ColumnInfo::new("other", "String")],
        "MergeTree",
        "CREATE TABLE db.t (...) ENGINE = MergeTree",
    )
    .await;

    let category = CategoryConfig {
        name: "t".to_string(),
        table: "db.t".to_string(),
        optimize_final: false,
    };
    staging
        .append("t", &RowBatch::new(vec!["a".to_string()], vec![vec![json!(1)]]).unwrap())
        .unwrap();

    let engine = engine_for(Arc::clone(&staging), vec![dest.clone()], category.clone());
    let report = engine.flush_category(&category).await;

    assert!(!report.deleted);
    assert!(dest.inserted().await.is_empty(), "no insert attempted");
    assert_eq!(staging.list_pending("t").unwrap().len(), 1);
}

#[tokio::test]
async fn flush_with_nothing_pending_is_a_noop() {
    let (_dir, staging, local, cloud) = flush_fixture().await;
    let engine = engine_for(staging, vec![local.clone(), cloud], trades_category());

    let report = engine.flush_category(&trades_category()).await;
    assert_eq!(report.files, 0);
    assert!(!report.deleted);
    assert!(local.inserted().await.is_empty());
}

#[tokio::test]
async fn flush_skips_corrupt_file_and_keeps_it_on_disk() {
    let (_dir, staging, local, cloud) = flush_fixture().await;
    staging.append("trades", &trade_batch(&[1, 2])).unwrap();
    let corrupt = staging.dir().join("trades_20250101_000000_000000_000000.json");
    std::fs::write(&corrupt, b"not json at all").unwrap();

    let engine = engine_for(
        Arc::clone(&staging),
        vec![local.clone(), cloud.clone()],
        trades_category(),
    );
    let report = engine.flush_category(&trades_category()).await;

    assert!(report.deleted);
    assert_eq!(report.rows, 2, "only the decodable rows flushed");
    assert!(corrupt.exists(), "corrupt file never deleted");
    assert_eq!(staging.list_pending("trades").unwrap(), vec![corrupt]);
}

#[tokio::test]
async fn flush_triggers_optimize_final_after_success() {
    let (_dir, staging, local, cloud) = flush_fixture().await;
    staging.append("trades", &trade_batch(&[1])).unwrap();

    let category = CategoryConfig {
        optimize_final: true,
        ..trades_category()
    };
    let engine = engine_for(
        Arc::clone(&staging),
        vec![local.clone(), cloud.clone()],
        category.clone(),
    );
    let report = engine.flush_category(&category).await;
    assert!(report.deleted);

    for dest in [&local, &cloud] {
        let executed = dest.executed().await;
        assert!(
            executed.contains(&"OPTIMIZE TABLE maicro_monitors.trades FINAL".to_string()),
            "missing OPTIMIZE on {:?}",
            executed
        );
    }
}

#[tokio::test]
async fn flush_blocked_by_describe_failure_retains_files() {
    let (_dir, staging, local, cloud) = flush_fixture().await;
    staging.append("trades", &trade_batch(&[1])).unwrap();
    cloud.fail_all_describes(true).await;

    let engine = engine_for(
        Arc::clone(&staging),
        vec![local.clone(), cloud.clone()],
        trades_category(),
    );
    let report = engine.flush_category(&trades_category()).await;

    assert!(!report.deleted);
    assert_eq!(staging.list_pending("trades").unwrap().len(), 1);
    assert_eq!(local.row_count("maicro_monitors", "trades").await, 0);
}

// =============================================================================
// Downsync Engine
// =============================================================================

const API_DATA_DDL: &str = "CREATE TABLE maicro_monitors.api_data (`id` UInt64, `ts` DateTime) \
     ENGINE = SharedReplacingMergeTree('/clickhouse/{uuid}', '{replica}') ORDER BY id";

fn api_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "UInt64"),
        ColumnInfo::new("ts", "DateTime"),
    ]
}

fn api_row(id: u64, ts: &str) -> HashMap<String, Value> {
    HashMap::from([
        ("id".to_string(), json!(id)),
        ("ts".to_string(), json!(ts)),
    ])
}

fn sync_config() -> DownsyncConfig {
    let mut config = DownsyncConfig::for_testing();
    config.databases = vec!["maicro_monitors".to_string()];
    config
}

#[tokio::test]
async fn bootstrap_creates_normalized_table_and_copies_all_rows() {
    let source = MockEndpoint::new("cloud");
    source
        .add_table("maicro_monitors", "api_data", api_columns(), "SharedReplacingMergeTree", API_DATA_DDL)
        .await;
    source
        .seed_rows(
            "maicro_monitors",
            "api_data",
            vec![api_row(1, "2025-06-01 00:00:01"), api_row(2, "2025-06-01 00:00:02")],
        )
        .await;

    let target = MockEndpoint::new("local");
    target.link_source(Arc::clone(&source)).await;

    let engine = DownsyncEngine::new(source.clone(), target.clone(), sync_config());
    let reports = engine.sync_database("maicro_monitors").await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].outcome,
        TableOutcome::Synced {
            bootstrapped: true,
            cursor: Some("ts".to_string()),
            rows_pulled: 0,
        }
    );
    assert!(target.has_table("maicro_monitors", "api_data").await);
    assert_eq!(target.row_count("maicro_monitors", "api_data").await, 2);

    let create = target
        .executed()
        .await
        .into_iter()
        .find(|sql| sql.starts_with("CREATE TABLE"))
        .unwrap();
    assert!(create.contains("ENGINE = ReplacingMergeTree()"));
    assert!(!create.contains("Shared"));
}

#[tokio::test]
async fn incremental_sync_advances_watermark_and_is_idempotent() {
    let source = MockEndpoint::new("cloud");
    source
        .add_table("maicro_monitors", "api_data", api_columns(), "ReplacingMergeTree", API_DATA_DDL)
        .await;
    source
        .seed_rows(
            "maicro_monitors",
            "api_data",
            vec![
                api_row(1, "2025-06-01 00:00:01"),
                api_row(2, "2025-06-01 00:00:02"),
                api_row(3, "2025-06-01 00:00:03"),
            ],
        )
        .await;

    // Target already has rows up to 00:00:01
    let target = MockEndpoint::new("local");
    target
        .add_table("maicro_monitors", "api_data", api_columns(), "ReplacingMergeTree", API_DATA_DDL)
        .await;
    target
        .seed_rows("maicro_monitors", "api_data", vec![api_row(1, "2025-06-01 00:00:01")])
        .await;
    target.link_source(Arc::clone(&source)).await;

    let engine = DownsyncEngine::new(source.clone(), target.clone(), sync_config());
    let reports = engine.sync_database("maicro_monitors").await.unwrap();
    assert_eq!(
        reports[0].outcome,
        TableOutcome::Synced {
            bootstrapped: false,
            cursor: Some("ts".to_string()),
            rows_pulled: 2,
        }
    );
    assert_eq!(target.row_count("maicro_monitors", "api_data").await, 3);

    // Immediate second run pulls nothing: the watermark already advanced
    let reports = engine.sync_database("maicro_monitors").await.unwrap();
    assert_eq!(
        reports[0].outcome,
        TableOutcome::Synced {
            bootstrapped: false,
            cursor: Some("ts".to_string()),
            rows_pulled: 0,
        }
    );
    assert_eq!(target.row_count("maicro_monitors", "api_data").await, 3);
}

#[tokio::test]
async fn empty_target_table_skips_incremental_pull() {
    let source = MockEndpoint::new("cloud");
    source
        .add_table("maicro_monitors", "api_data", api_columns(), "ReplacingMergeTree", API_DATA_DDL)
        .await;
    source
        .seed_rows("maicro_monitors", "api_data", vec![api_row(1, "2025-06-01 00:00:01")])
        .await;

    let target = MockEndpoint::new("local");
    target
        .add_table("maicro_monitors", "api_data", api_columns(), "ReplacingMergeTree", API_DATA_DDL)
        .await;
    target.link_source(Arc::clone(&source)).await;

    let engine = DownsyncEngine::new(source, target.clone(), sync_config());
    let reports = engine.sync_database("maicro_monitors").await.unwrap();

    // Nothing to anchor a watermark on; no pull happens this run
    assert_eq!(
        reports[0].outcome,
        TableOutcome::Synced {
            bootstrapped: false,
            cursor: Some("ts".to_string()),
            rows_pulled: 0,
        }
    );
    assert_eq!(target.row_count("maicro_monitors", "api_data").await, 0);
}

#[tokio::test]
async fn skip_listed_table_is_not_synced() {
    let source = MockEndpoint::new("cloud");
    source
        .add_table("maicro_monitors", "old_stuff", api_columns(), "MergeTree", "CREATE TABLE maicro_monitors.old_stuff (`id` UInt64, `ts` DateTime) ENGINE = MergeTree ORDER BY id")
        .await;

    let target = MockEndpoint::new("local");
    target.link_source(Arc::clone(&source)).await;

    let mut config = sync_config();
    config.skip_tables.push("maicro_monitors.old_stuff".to_string());

    let engine = DownsyncEngine::new(source, target.clone(), config);
    let reports = engine.sync_database("maicro_monitors").await.unwrap();

    assert_eq!(reports[0].outcome, TableOutcome::Skipped);
    assert!(!target.has_table("maicro_monitors", "old_stuff").await);
}

#[tokio::test]
async fn cursor_override_drives_the_pull_filter() {
    let columns = vec![
        ColumnInfo::new("id", "UInt64"),
        ColumnInfo::new("ts", "DateTime"),
        ColumnInfo::new("created_at", "DateTime"),
    ];
    let source = MockEndpoint::new("cloud");
    source
        .add_table("maicro_monitors", "api_data", columns.clone(), "ReplacingMergeTree", API_DATA_DDL)
        .await;

    let target = MockEndpoint::new("local");
    target
        .add_table("maicro_monitors", "api_data", columns, "ReplacingMergeTree", API_DATA_DDL)
        .await;
    let mut row = api_row(1, "2025-06-01 00:00:01");
    row.insert("created_at".to_string(), json!("2025-05-31 23:59:00"));
    target.seed_rows("maicro_monitors", "api_data", vec![row]).await;
    target.link_source(Arc::clone(&source)).await;

    let mut config = sync_config();
    config
        .cursor_overrides
        .insert("maicro_monitors.api_data".to_string(), "created_at".to_string());

    let engine = DownsyncEngine::new(source, target.clone(), config);
    let reports = engine.sync_database("maicro_monitors").await.unwrap();
    assert!(matches!(
        &reports[0].outcome,
        TableOutcome::Synced { cursor: Some(c), .. } if c == "created_at"
    ));

    let pull = target
        .executed()
        .await
        .into_iter()
        .find(|sql| sql.contains("remoteSecure("))
        .unwrap();
    assert!(pull.contains("`created_at` > '2025-05-31 23:59:00'"));
}

#[tokio::test]
async fn one_failing_table_does_not_stop_its_siblings() {
    let source = MockEndpoint::new("cloud");
    let target = MockEndpoint::new("local");
    for name in ["alpha", "beta"] {
        let ddl = format!(
            "CREATE TABLE maicro_monitors.{} (`id` UInt64, `ts` DateTime) ENGINE = MergeTree ORDER BY id",
            name
        );
        source
            .add_table("maicro_monitors", name, api_columns(), "MergeTree", &ddl)
            .await;
        target
            .add_table("maicro_monitors", name, api_columns(), "MergeTree", &ddl)
            .await;
        target
            .seed_rows("maicro_monitors", name, vec![api_row(1, "2025-06-01 00:00:01")])
            .await;
    }
    source.seed_rows("maicro_monitors", "alpha", vec![
        api_row(1, "2025-06-01 00:00:01"),
        api_row(2, "2025-06-01 00:00:02"),
    ]).await;
    source.seed_rows("maicro_monitors", "beta", vec![
        api_row(1, "2025-06-01 00:00:01"),
        api_row(2, "2025-06-01 00:00:02"),
    ]).await;
    target.link_source(Arc::clone(&source)).await;

    // Cursor resolution describes the source; break it for one table only
    source.fail_describe_for("maicro_monitors", "beta").await;

    let engine = DownsyncEngine::new(source, target.clone(), sync_config());
    let reports = engine.sync_database("maicro_monitors").await.unwrap();

    assert_eq!(reports.len(), 2);
    assert!(matches!(
        reports[0].outcome,
        TableOutcome::Synced { rows_pulled: 1, .. }
    ));
    assert!(matches!(reports[1].outcome, TableOutcome::Failed(_)));
    assert_eq!(target.row_count("maicro_monitors", "alpha").await, 2);
}

#[tokio::test]
async fn run_covers_all_configured_databases() {
    let source = MockEndpoint::new("cloud");
    let target = MockEndpoint::new("local");
    for db in ["hyperliquid", "binance"] {
        let ddl = format!(
            "CREATE TABLE {}.trades (`id` UInt64, `ts` DateTime) ENGINE = MergeTree ORDER BY id",
            db
        );
        source.add_table(db, "trades", api_columns(), "MergeTree", &ddl).await;
    }
    target.link_source(Arc::clone(&source)).await;

    let mut config = sync_config();
    config.databases = vec!["hyperliquid".to_string(), "binance".to_string()];

    let engine = DownsyncEngine::new(source, target.clone(), config);
    let reports = engine.run().await;

    assert_eq!(reports.len(), 2);
    assert!(target.has_table("hyperliquid", "trades").await);
    assert!(target.has_table("binance", "trades").await);
}
