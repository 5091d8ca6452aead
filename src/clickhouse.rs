//! ClickHouse implementation of [`Endpoint`] over the HTTP interface.
//!
//! All introspection goes through `system.columns` / `system.tables`, row
//! inserts use `FORMAT JSONEachRow` with the rows in the request body, and
//! query results come back as TSV. Credentials travel in the
//! `X-ClickHouse-User` / `X-ClickHouse-Key` headers.
//!
//! Server-side remote-read copies (bootstrap and incremental sync) are
//! *executed* on the target via [`Endpoint::execute`], but the SQL they run
//! embeds a [`remote_table_expr`] pointing at the source's native endpoint:
//! the row movement happens entirely inside ClickHouse, this process never
//! streams table contents.

use crate::batch::RowBatch;
use crate::config::EndpointConfig;
use crate::endpoint::{ColumnInfo, Endpoint, TableInfo};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// An [`Endpoint`] backed by one ClickHouse server's HTTP interface.
pub struct ClickHouseEndpoint {
    config: EndpointConfig,
    client: reqwest::Client,
}

impl ClickHouseEndpoint {
    /// Build a client for the endpoint with a per-call timeout.
    ///
    /// A timed-out call surfaces as a database error and is treated
    /// identically to a failed one by both engines.
    pub fn new(config: EndpointConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// POST a statement; `body` carries inline data (JSONEachRow inserts).
    async fn post(&self, operation: &str, sql: &str, body: Option<String>) -> Result<String> {
        let mut request = self.client.post(&self.config.http_url);
        request = request
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password);

        request = match body {
            Some(data) => request.query(&[("query", sql)]).body(data),
            None => request.body(sql.to_string()),
        };

        let response = request.send().await.map_err(|e| {
            RelayError::database(&self.config.name, operation, e.to_string())
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            RelayError::database(&self.config.name, operation, e.to_string())
        })?;

        if !status.is_success() {
            return Err(RelayError::database(
                &self.config.name,
                operation,
                format!("HTTP {}: {}", status, text.trim()),
            ));
        }
        Ok(text)
    }

    async fn query_tsv(&self, operation: &str, sql: &str) -> Result<Vec<Vec<String>>> {
        let text = self.post(operation, sql, None).await?;
        Ok(text
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.split('\t').map(unescape_tsv).collect())
            .collect())
    }
}

#[async_trait]
impl Endpoint for ClickHouseEndpoint {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn describe(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!(
            "SELECT name, type FROM system.columns \
             WHERE database = '{}' AND table = '{}' \
             ORDER BY position FORMAT TSV",
            escape_string(database),
            escape_string(table)
        );
        let rows = self.query_tsv("DESCRIBE", &sql).await?;
        rows.into_iter()
            .map(|row| {
                let mut fields = row.into_iter();
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(name), Some(type_name), None) => Ok(ColumnInfo { name, type_name }),
                    _ => Err(RelayError::database(
                        &self.config.name,
                        "DESCRIBE",
                        "unexpected system.columns row shape",
                    )),
                }
            })
            .collect()
    }

    async fn insert(&self, database: &str, table: &str, batch: &RowBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let columns = batch
            .columns
            .iter()
            .map(|c| format!("`{}`", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {}.{} ({}) FORMAT JSONEachRow",
            database, table, columns
        );
        let body = jsoneachrow_body(batch);
        debug!(
            endpoint = %self.config.name,
            table = %format!("{}.{}", database, table),
            rows = batch.len(),
            "Inserting rows"
        );
        self.post("INSERT", &sql, Some(body)).await?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        self.post("EXECUTE", sql, None).await?;
        Ok(())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>> {
        let sql = format!(
            "SELECT name, engine FROM system.tables \
             WHERE database = '{}' AND engine NOT IN ('View', 'MaterializedView') \
             ORDER BY name FORMAT TSV",
            escape_string(database)
        );
        let rows = self.query_tsv("LIST_TABLES", &sql).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mut fields = row.into_iter();
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(name), Some(engine), None) => Some(TableInfo { name, engine }),
                    _ => None,
                }
            })
            .collect())
    }

    async fn table_exists(&self, database: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT count() FROM system.tables \
             WHERE database = '{}' AND name = '{}' FORMAT TSV",
            escape_string(database),
            escape_string(table)
        );
        let rows = self.query_tsv("TABLE_EXISTS", &sql).await?;
        Ok(first_scalar(&rows).map(|v| v != "0").unwrap_or(false))
    }

    async fn ensure_database(&self, database: &str) -> Result<()> {
        self.execute(&format!("CREATE DATABASE IF NOT EXISTS {}", database))
            .await
    }

    async fn show_create_table(&self, database: &str, table: &str) -> Result<String> {
        // TSVRaw keeps the statement's own newlines unescaped
        let sql = format!("SHOW CREATE TABLE {}.{} FORMAT TSVRaw", database, table);
        let text = self.post("SHOW_CREATE", &sql, None).await?;
        Ok(text.trim_end().to_string())
    }

    async fn max_value(
        &self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT toString(max(`{}`)), count() FROM {}.{} FORMAT TSV",
            column, database, table
        );
        let rows = self.query_tsv("MAX_VALUE", &sql).await?;
        let row = rows.first().ok_or_else(|| {
            RelayError::database(&self.config.name, "MAX_VALUE", "empty aggregate result")
        })?;
        if row.len() != 2 {
            return Err(RelayError::database(
                &self.config.name,
                "MAX_VALUE",
                format!("unexpected aggregate row: {:?}", row),
            ));
        }
        if row[1] == "0" {
            return Ok(None);
        }
        Ok(Some(row[0].clone()))
    }

    async fn count_where(&self, database: &str, table: &str, predicate: &str) -> Result<u64> {
        let sql = format!(
            "SELECT count() FROM {}.{} WHERE {} FORMAT TSV",
            database, table, predicate
        );
        let rows = self.query_tsv("COUNT", &sql).await?;
        first_scalar(&rows)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                RelayError::database(&self.config.name, "COUNT", "missing count() result")
            })
    }
}

/// Render the server-side remote-read expression for a source endpoint.
///
/// The returned expression is evaluated *by the target server*, which
/// dials the source's native protocol port directly. Falls back to the
/// HTTP URL's host when no native host is configured.
pub fn remote_table_expr(source: &EndpointConfig, database: &str, table: &str) -> Result<String> {
    let host = match &source.native_host {
        Some(host) => host.clone(),
        None => reqwest::Url::parse(&source.http_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .ok_or_else(|| {
                RelayError::Config(format!(
                    "endpoint '{}' has no native_host and an unparseable http_url",
                    source.name
                ))
            })?,
    };
    Ok(format!(
        "remoteSecure('{}:{}', {}, {}, '{}', '{}')",
        host,
        source.native_port,
        database,
        table,
        escape_string(&source.user),
        escape_string(&source.password)
    ))
}

/// Escape a value for use inside a single-quoted SQL string literal.
pub fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Serialize a batch as JSONEachRow: one JSON object per line.
fn jsoneachrow_body(batch: &RowBatch) -> String {
    let mut body = String::new();
    for row in &batch.rows {
        let object: serde_json::Map<String, serde_json::Value> = batch
            .columns
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect();
        body.push_str(&serde_json::Value::Object(object).to_string());
        body.push('\n');
    }
    body
}

/// Undo ClickHouse TSV field escaping.
fn unescape_tsv(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn first_scalar(rows: &[Vec<String>]) -> Option<String> {
    rows.first().and_then(|row| row.first()).cloned()
}
