//! Append-only persistence of retrieval results.
//!
//! One `lease_queries` row per retrieval. Successful retrievals also get a
//! `lease_data` row (extracted rows plus percentage change) and a
//! `lease_statistics` row.

use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use leasedrop_core::{
    Diagnostic, FailureReport, QueryInfo, QueryResult, QueryStatus, ResultRow, Statistics, Trend,
};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// Record a finished retrieval and return its id.
///
/// All three tables are written in one transaction.
///
/// # Errors
/// Returns `DatabaseError` if serialization or any insert fails.
pub async fn insert_result(pool: &Pool<Sqlite>, result: &QueryResult) -> Result<i64> {
    let info = &result.query;
    let error_json = result.error.as_ref().map(serde_json::to_string).transpose()?;
    let trend_json = result.trend.as_ref().map(serde_json::to_string).transpose()?;
    let diagnostics_json = serde_json::to_string(&result.diagnostics)?;

    let mut tx = pool.begin().await?;

    let query_id = sqlx::query(
        "INSERT INTO lease_queries (timestamp, identifier_type, identifier_value, beg_period,
                                    end_period, status, error_message, error_json, attempts,
                                    production_column, date_column, trend_json, diagnostics_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(info.timestamp.to_rfc3339())
    .bind(&info.identifier_type)
    .bind(&info.identifier_value)
    .bind(&info.beg_period)
    .bind(&info.end_period)
    .bind(result.status.as_str())
    .bind(result.error.as_ref().map(|e| e.message.as_str()))
    .bind(error_json)
    .bind(i64::from(result.attempts))
    .bind(result.production_column.as_deref())
    .bind(result.date_column.as_deref())
    .bind(trend_json)
    .bind(diagnostics_json)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    if result.status == QueryStatus::Success {
        sqlx::query(
            "INSERT INTO lease_data (query_id, data_json, pct_change, pct_change_note)
             VALUES (?, ?, ?, ?)",
        )
        .bind(query_id)
        .bind(serde_json::to_string(&result.rows)?)
        .bind(result.percentage_change)
        .bind(result.percentage_change_note.as_deref())
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO lease_statistics (query_id, statistics_json) VALUES (?, ?)")
            .bind(query_id)
            .bind(serde_json::to_string(&result.statistics)?)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    tracing::debug!(query_id, status = %result.status, "lease query stored");
    Ok(query_id)
}

/// Summaries of every stored retrieval, newest first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn list_queries(pool: &Pool<Sqlite>) -> Result<Vec<QueryInfo>> {
    let rows = sqlx::query(
        "SELECT id, timestamp, identifier_type, identifier_value, beg_period, end_period, status
         FROM lease_queries
         ORDER BY timestamp DESC, id DESC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_query_info).collect()
}

/// Everything stored for one retrieval.
///
/// # Errors
/// Returns `DatabaseError` if a query fails or a stored value cannot be decoded.
pub async fn get_query_detail(pool: &Pool<Sqlite>, id: i64) -> Result<Option<QueryResult>> {
    let Some(row) = sqlx::query(
        "SELECT id, timestamp, identifier_type, identifier_value, beg_period, end_period, status,
                error_json, attempts, production_column, date_column, trend_json, diagnostics_json
         FROM lease_queries
         WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let query = parse_query_info(&row)?;
    let error: Option<FailureReport> = decode_optional(row.try_get("error_json")?)?;
    let trend: Option<Trend> = decode_optional(row.try_get("trend_json")?)?;
    let diagnostics: Vec<Diagnostic> = decode(&row.try_get::<String, _>("diagnostics_json")?)?;
    let attempts = u32::try_from(row.try_get::<i64, _>("attempts")?)
        .map_err(|e| DatabaseError::Decode(format!("attempts out of range: {e}")))?;

    let data = sqlx::query(
        "SELECT data_json, pct_change, pct_change_note FROM lease_data WHERE query_id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    let (rows, percentage_change, percentage_change_note) = match data {
        Some(data) => (
            decode::<Vec<ResultRow>>(&data.try_get::<String, _>("data_json")?)?,
            data.try_get::<Option<f64>, _>("pct_change")?,
            data.try_get::<Option<String>, _>("pct_change_note")?,
        ),
        None => (Vec::new(), None, None),
    };

    let statistics = sqlx::query_scalar::<_, String>(
        "SELECT statistics_json FROM lease_statistics WHERE query_id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .map(|json| decode::<Statistics>(&json))
    .transpose()?
    .unwrap_or_default();

    Ok(Some(QueryResult {
        status: query.status,
        query,
        production_column: row.try_get("production_column")?,
        date_column: row.try_get("date_column")?,
        rows,
        statistics,
        percentage_change,
        percentage_change_note,
        trend,
        diagnostics,
        error,
        attempts,
    }))
}

fn parse_query_info(row: &SqliteRow) -> Result<QueryInfo> {
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| DatabaseError::Decode(format!("invalid timestamp '{timestamp}': {e}")))?
        .with_timezone(&Utc);
    let status: String = row.try_get("status")?;
    let status: QueryStatus = status
        .parse()
        .map_err(|_| DatabaseError::Decode(format!("invalid status '{status}'")))?;

    Ok(QueryInfo {
        id: Some(row.try_get("id")?),
        timestamp,
        identifier_type: row.try_get("identifier_type")?,
        identifier_value: row.try_get("identifier_value")?,
        beg_period: row.try_get("beg_period")?,
        end_period: row.try_get("end_period")?,
        status,
    })
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| DatabaseError::Decode(e.to_string()))
}

fn decode_optional<T: DeserializeOwned>(json: Option<String>) -> Result<Option<T>> {
    json.as_deref().map(decode).transpose()
}
