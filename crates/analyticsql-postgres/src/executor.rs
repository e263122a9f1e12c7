//! Postgres execution engine.
//!
//! Runs a validated statement on one tenant's pool with a server-side
//! statement timeout, truncates to the row cap, and normalizes every column
//! to a transport-safe JSON value: timestamps to ISO-8601 strings, NUMERIC
//! to floats, BYTEA to truncated hex. Values that cannot be decoded degrade
//! to null rather than failing the whole result.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use tracing::{debug, error};

use analyticsql::{ExecutionResult, PipelineError, QueryExecutor, Result};

/// Hex dumps of binary columns are capped at this many characters.
const BYTEA_HEX_PREVIEW: usize = 50;

/// Query code Postgres reports when `statement_timeout` cancels a statement.
const QUERY_CANCELED: &str = "57014";

/// Executes SQL on a specific pool under a statement timeout.
pub struct PgExecutor {
    pool: Arc<PgPool>,
    timeout_secs: u64,
}

impl PgExecutor {
    pub fn new(pool: Arc<PgPool>, timeout_secs: u64) -> Self {
        Self { pool, timeout_secs }
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn execute(&self, sql: &str, row_limit: usize) -> Result<ExecutionResult> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            error!(error = %e, "failed to acquire tenant connection");
            PipelineError::Connection(format!("connection acquisition failed: {e}"))
        })?;

        // Server-side guard; applies to this session only.
        let timeout_ms = self.timeout_secs.saturating_mul(1000);
        sqlx::query(&format!("SET statement_timeout = {timeout_ms}"))
            .execute(&mut *conn)
            .await
            .map_err(|e| PipelineError::Connection(format!("failed to set timeout: {e}")))?;

        let started = Instant::now();
        let mut raw_rows = sqlx::query(sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error(e, self.timeout_secs))?;
        let execution_time = started.elapsed().as_secs_f64();

        let total_rows = raw_rows.len();
        raw_rows.truncate(row_limit);

        let columns: Vec<String> = raw_rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows: Vec<JsonValue> = raw_rows.iter().map(row_to_json).collect();

        debug!(
            rows = rows.len(),
            total_rows,
            elapsed_secs = execution_time,
            "statement executed"
        );
        Ok(ExecutionResult {
            columns,
            row_count: rows.len(),
            total_rows,
            rows,
            execution_time,
        })
    }
}

/// Classify a driver error for the repair loop: statement-timeout
/// cancellations become `Timeout`, transport problems become `Connection`,
/// everything the database itself rejected becomes `Execution`.
fn map_sqlx_error(err: sqlx::Error, timeout_secs: u64) -> PipelineError {
    match &err {
        sqlx::Error::Database(db) => {
            if db.code().as_deref() == Some(QUERY_CANCELED) {
                PipelineError::Timeout(format!(
                    "statement exceeded the {timeout_secs}s timeout"
                ))
            } else {
                PipelineError::Execution(db.message().to_string())
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_) => PipelineError::Connection(err.to_string()),
        _ => PipelineError::Execution(err.to_string()),
    }
}

/// Decode one row into a JSON object keyed by column name.
fn row_to_json(row: &PgRow) -> JsonValue {
    let mut object = serde_json::Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        object.insert(col.name().to_string(), decode_column(row, i, col.type_info().name()));
    }
    JsonValue::Object(object)
}

/// Normalize a single column by its Postgres type name. Undecodable values
/// degrade to null.
fn decode_column(row: &PgRow, i: usize, type_name: &str) -> JsonValue {
    match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::String),
        "INT2" => row
            .try_get::<Option<i16>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::Number(v.into())),
        "INT4" | "SERIAL" => row
            .try_get::<Option<i32>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::Number(v.into())),
        "INT8" | "BIGSERIAL" => row
            .try_get::<Option<i64>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::Number(v.into())),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(i)
            .ok()
            .flatten()
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(JsonValue::Null, JsonValue::Number),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(i)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number),
        // Arbitrary-precision numerics become floats for transport.
        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(i)
            .ok()
            .flatten()
            .and_then(|d| d.to_f64())
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number),
        "BOOL" => row
            .try_get::<Option<bool>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::Bool),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| {
                JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, |v| JsonValue::String(hex_preview(&v))),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(i)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null),
        _ => row
            .try_get::<Option<String>, _>(i)
            .ok()
            .flatten()
            .map_or(JsonValue::Null, JsonValue::String),
    }
}

/// Hex-encode binary data, truncated with an ellipsis past the preview cap.
fn hex_preview(bytes: &[u8]) -> String {
    let full = hex::encode(bytes);
    if full.len() > BYTEA_HEX_PREVIEW {
        format!("{}...", &full[..BYTEA_HEX_PREVIEW])
    } else {
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_preview_short_value() {
        assert_eq!(hex_preview(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }

    #[test]
    fn test_hex_preview_truncates() {
        let long = vec![0xab_u8; 64];
        let preview = hex_preview(&long);
        assert_eq!(preview.len(), BYTEA_HEX_PREVIEW + 3);
        assert!(preview.ends_with("..."));
        assert!(preview.starts_with("abab"));
    }

    #[test]
    fn test_map_timeout_code() {
        // Non-database variants map by transport class.
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut, 30);
        assert!(matches!(err, PipelineError::Connection(_)));

        let err = map_sqlx_error(sqlx::Error::RowNotFound, 30);
        assert!(matches!(err, PipelineError::Execution(_)));
    }
}
