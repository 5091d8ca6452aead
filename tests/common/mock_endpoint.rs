//! Mock Endpoint for testing.
//!
//! Records describe/insert/execute calls for assertions, holds in-memory
//! tables, and injects failures on demand. Executed SQL is interpreted
//! just enough to model the server-side behavior the engines rely on:
//! `CREATE DATABASE`, `CREATE TABLE`, and `INSERT INTO … SELECT * FROM
//! remoteSecure(…)` (with an optional watermark filter) against a linked
//! source endpoint.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use telemetry_relay::endpoint::{ColumnInfo, Endpoint, TableInfo};
use telemetry_relay::error::{RelayError, Result};
use telemetry_relay::RowBatch;
use tokio::sync::RwLock;

/// One in-memory table: schema, DDL text, and rows as column → value maps.
#[derive(Debug, Clone, Default)]
pub struct MockTable {
    pub columns: Vec<ColumnInfo>,
    pub engine: String,
    pub create: String,
    pub rows: Vec<HashMap<String, Value>>,
}

/// A recorded insert() call.
#[derive(Debug, Clone)]
pub struct RecordedInsert {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: usize,
}

/// In-memory implementation of [`Endpoint`] that records all calls.
pub struct MockEndpoint {
    name: String,
    tables: RwLock<HashMap<String, MockTable>>,
    databases: RwLock<HashSet<String>>,
    inserts: RwLock<Vec<RecordedInsert>>,
    executes: RwLock<Vec<String>>,
    /// Fail the next N insert() calls.
    fail_inserts: AtomicUsize,
    /// Tables ("db.table") whose describe() fails.
    fail_describe: RwLock<HashSet<String>>,
    /// Fail all describe() calls regardless of table.
    fail_all_describes: RwLock<bool>,
    /// Where `remoteSecure(…)` reads resolve, when this endpoint is a
    /// sync target.
    linked_source: RwLock<Option<Arc<MockEndpoint>>>,
}

fn key(database: &str, table: &str) -> String {
    format!("{}.{}", database, table)
}

impl MockEndpoint {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tables: RwLock::new(HashMap::new()),
            databases: RwLock::new(HashSet::new()),
            inserts: RwLock::new(Vec::new()),
            executes: RwLock::new(Vec::new()),
            fail_inserts: AtomicUsize::new(0),
            fail_describe: RwLock::new(HashSet::new()),
            fail_all_describes: RwLock::new(false),
            linked_source: RwLock::new(None),
        })
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Register a table with the given schema and DDL text.
    pub async fn add_table(
        &self,
        database: &str,
        table: &str,
        columns: Vec<ColumnInfo>,
        engine: &str,
        create: &str,
    ) {
        self.databases.write().await.insert(database.to_string());
        self.tables.write().await.insert(
            key(database, table),
            MockTable {
                columns,
                engine: engine.to_string(),
                create: create.to_string(),
                rows: Vec::new(),
            },
        );
    }

    /// Seed rows into a registered table.
    pub async fn seed_rows(&self, database: &str, table: &str, rows: Vec<HashMap<String, Value>>) {
        let mut tables = self.tables.write().await;
        if let Some(t) = tables.get_mut(&key(database, table)) {
            t.rows.extend(rows);
        }
    }

    /// Make the next `n` insert() calls fail.
    pub fn fail_next_inserts(&self, n: usize) {
        self.fail_inserts.store(n, Ordering::SeqCst);
    }

    /// Make describe() fail for one table.
    pub async fn fail_describe_for(&self, database: &str, table: &str) {
        self.fail_describe.write().await.insert(key(database, table));
    }

    /// Make every describe() call fail.
    pub async fn fail_all_describes(&self, fail: bool) {
        *self.fail_all_describes.write().await = fail;
    }

    /// Resolve `remoteSecure(…)` reads against the given endpoint.
    pub async fn link_source(&self, source: Arc<MockEndpoint>) {
        *self.linked_source.write().await = Some(source);
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    pub async fn inserted(&self) -> Vec<RecordedInsert> {
        self.inserts.read().await.clone()
    }

    pub async fn executed(&self) -> Vec<String> {
        self.executes.read().await.clone()
    }

    pub async fn row_count(&self, database: &str, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(&key(database, table))
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub async fn has_table(&self, database: &str, table: &str) -> bool {
        self.tables.read().await.contains_key(&key(database, table))
    }

    // =========================================================================
    // SQL interpretation for execute()
    // =========================================================================

    async fn apply_create_table(&self, sql: &str) {
        // "CREATE TABLE db.tbl (…) ENGINE = …"
        let rest = sql.trim_start_matches("CREATE TABLE").trim_start();
        let name = rest
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("");
        if let Some((db, tbl)) = name.split_once('.') {
            self.databases.write().await.insert(db.to_string());
            self.tables.write().await.insert(
                key(db, tbl),
                MockTable {
                    columns: Vec::new(),
                    engine: "MergeTree".to_string(),
                    create: sql.to_string(),
                    rows: Vec::new(),
                },
            );
        }
    }

    async fn apply_remote_insert(&self, sql: &str) -> Result<()> {
        let rest = sql.trim_start_matches("INSERT INTO").trim_start();
        let name = rest.split_whitespace().next().unwrap_or("");
        let Some((db, tbl)) = name.split_once('.') else {
            return Err(RelayError::database(&self.name, "EXECUTE", "bad insert target"));
        };

        let source = self.linked_source.read().await.clone().ok_or_else(|| {
            RelayError::database(&self.name, "EXECUTE", "no linked source for remote read")
        })?;
        let source_rows = source
            .tables
            .read()
            .await
            .get(&key(db, tbl))
            .map(|t| t.rows.clone())
            .unwrap_or_default();

        let filter = parse_watermark_filter(sql);
        let selected: Vec<HashMap<String, Value>> = source_rows
            .into_iter()
            .filter(|row| match &filter {
                Some((col, bound)) => row
                    .get(col)
                    .and_then(|v| v.as_str())
                    .map(|v| v > bound.as_str())
                    .unwrap_or(false),
                None => true,
            })
            .collect();

        let mut tables = self.tables.write().await;
        let entry = tables.entry(key(db, tbl)).or_default();
        entry.rows.extend(selected);
        Ok(())
    }
}

/// Extract the `` `col` > 'bound' `` watermark filter, if the SQL has one.
fn parse_watermark_filter(sql: &str) -> Option<(String, String)> {
    let clause = sql.split(" WHERE ").nth(1)?;
    let clause = clause.trim();
    let col = clause.strip_prefix('`')?.split('`').next()?.to_string();
    let bound = clause.split('\'').nth(1)?.to_string();
    Some((col, bound))
}

#[async_trait]
impl Endpoint for MockEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        if *self.fail_all_describes.read().await
            || self.fail_describe.read().await.contains(&key(database, table))
        {
            return Err(RelayError::database(&self.name, "DESCRIBE", "injected failure"));
        }
        Ok(self
            .tables
            .read()
            .await
            .get(&key(database, table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn insert(&self, database: &str, table: &str, batch: &RowBatch) -> Result<()> {
        let remaining = self.fail_inserts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_inserts.store(remaining - 1, Ordering::SeqCst);
            return Err(RelayError::database(&self.name, "INSERT", "injected failure"));
        }

        self.inserts.write().await.push(RecordedInsert {
            table: key(database, table),
            columns: batch.columns.clone(),
            rows: batch.len(),
        });

        let mut tables = self.tables.write().await;
        let entry = tables.entry(key(database, table)).or_default();
        for row in &batch.rows {
            let map = batch
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            entry.rows.push(map);
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.executes.write().await.push(sql.to_string());

        if let Some(db) = sql.strip_prefix("CREATE DATABASE IF NOT EXISTS ") {
            self.databases.write().await.insert(db.trim().to_string());
            return Ok(());
        }
        if sql.starts_with("CREATE TABLE") {
            self.apply_create_table(sql).await;
            return Ok(());
        }
        if sql.starts_with("INSERT INTO") && sql.contains("remoteSecure(") {
            return self.apply_remote_insert(sql).await;
        }
        // OPTIMIZE and friends: recorded, no state change
        Ok(())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>> {
        let prefix = format!("{}.", database);
        let mut out: Vec<TableInfo> = self
            .tables
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, t)| TableInfo {
                name: k[prefix.len()..].to_string(),
                engine: t.engine.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        Ok(self.tables.read().await.contains_key(&key(database, table)))
    }

    async fn ensure_database(&self, database: &str) -> Result<()> {
        self.databases.write().await.insert(database.to_string());
        Ok(())
    }

    async fn show_create_table(&self, database: &str, table: &str) -> Result<String> {
        self.tables
            .read()
            .await
            .get(&key(database, table))
            .map(|t| t.create.clone())
            .ok_or_else(|| RelayError::database(&self.name, "SHOW_CREATE", "no such table"))
    }

    async fn max_value(
        &self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        let tables = self.tables.read().await;
        let t = tables
            .get(&key(database, table))
            .ok_or_else(|| RelayError::database(&self.name, "MAX_VALUE", "no such table"))?;
        Ok(t.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(|v| v.as_str()))
            .max()
            .map(|s| s.to_string()))
    }

    async fn count_where(&self, database: &str, table: &str, predicate: &str) -> Result<u64> {
        let filter = parse_watermark_filter(&format!("x WHERE {}", predicate))
            .ok_or_else(|| RelayError::database(&self.name, "COUNT", "unsupported predicate"))?;
        let tables = self.tables.read().await;
        let t = tables
            .get(&key(database, table))
            .ok_or_else(|| RelayError::database(&self.name, "COUNT", "no such table"))?;
        let count = t
            .rows
            .iter()
            .filter(|row| {
                row.get(&filter.0)
                    .and_then(|v| v.as_str())
                    .map(|v| v > filter.1.as_str())
                    .unwrap_or(false)
            })
            .count();
        Ok(count as u64)
    }
}
