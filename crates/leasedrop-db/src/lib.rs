//! Leasedrop Database Layer
//!
//! Provides the `SQLite` history store for retrieval results. Uses `SQLx`
//! with embedded migrations.
//!
//! # Tables
//!
//! - `lease_queries` - one row per retrieval, any outcome
//! - `lease_data` - extracted rows and percentage change of successful runs
//! - `lease_statistics` - summary statistics of successful runs
//!
//! # Example
//!
//! ```ignore
//! use leasedrop_db::Database;
//!
//! let db = Database::new("leasedrop.db").await?;
//! db.run_migrations().await?;
//! let recent = db.list_queries().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
pub mod error;
pub mod migrations;
pub mod queries;

// Re-export commonly used types
pub use connection::DbPool;
pub use error::{DatabaseError, Result};

use async_trait::async_trait;
use leasedrop_core::{HistoryStore, QueryInfo, QueryResult};
use std::path::Path;

/// High-level database interface with migrations.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open the database at `path` (or `:memory:`).
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = DbPool::new(path).await?;
        Ok(Self { pool })
    }

    /// Open the database and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Record one finished retrieval.
    pub async fn insert_result(&self, result: &QueryResult) -> Result<i64> {
        queries::insert_result(self.pool.pool(), result).await
    }

    /// All stored retrievals, newest first.
    pub async fn list_queries(&self) -> Result<Vec<QueryInfo>> {
        queries::list_queries(self.pool.pool()).await
    }

    /// Full detail of one stored retrieval.
    pub async fn get_query_detail(&self, id: i64) -> Result<Option<QueryResult>> {
        queries::get_query_detail(self.pool.pool(), id).await
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryStore for Database {
    async fn append(&self, result: &QueryResult) -> leasedrop_core::Result<i64> {
        Ok(self.insert_result(result).await?)
    }

    async fn list_queries(&self) -> leasedrop_core::Result<Vec<QueryInfo>> {
        Ok(Database::list_queries(self).await?)
    }

    async fn get_query_detail(&self, id: i64) -> leasedrop_core::Result<Option<QueryResult>> {
        Ok(Database::get_query_detail(self, id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use leasedrop_core::{
        Diagnostic, ErrorKind, FailureReport, IdentifierType, PageState, QueryStatus,
        ResultRow, RetrievalRequest, Statistics, Trend, TrendDirection,
    };
    use std::path::PathBuf;

    async fn create_test_database() -> Database {
        Database::open(":memory:").await.expect("open database")
    }

    fn info(status: QueryStatus, minutes_ago: i64) -> QueryInfo {
        let request = RetrievalRequest::new(IdentifierType::LeaseNumber, "011457", "1601", "2001");
        let mut info = QueryInfo::from_request(&request, status);
        info.timestamp = Utc::now() - Duration::minutes(minutes_ago);
        info
    }

    fn success(minutes_ago: i64) -> QueryResult {
        let column = "Gross Barrels";
        QueryResult {
            query: info(QueryStatus::Success, minutes_ago),
            status: QueryStatus::Success,
            production_column: Some(column.to_string()),
            date_column: Some("Period".to_string()),
            rows: vec![
                ResultRow::new("2001", column, 1000.0),
                ResultRow::new("2002", column, 1500.0),
            ],
            statistics: Statistics {
                count: 2,
                mean: Some(1250.0),
                median: Some(1250.0),
                min: Some(1000.0),
                max: Some(1500.0),
                stddev: Some(353.553_390_593_273_8),
            },
            percentage_change: Some(50.0),
            percentage_change_note: None,
            trend: Some(Trend {
                direction: TrendDirection::Increasing,
                strength: 1.0,
                slope: 500.0,
                intercept: 1000.0,
                r_value: 1.0,
            }),
            diagnostics: Vec::new(),
            error: None,
            attempts: 1,
        }
    }

    fn failure(minutes_ago: i64) -> QueryResult {
        QueryResult::unsuccessful(
            info(QueryStatus::Pending, minutes_ago),
            QueryStatus::Failed,
            FailureReport::new(
                ErrorKind::ChallengeBlocked,
                "results checkpoint still blocked",
                Some(PageState::ChallengeDetected),
            ),
            vec![Diagnostic {
                captured_at: Utc::now(),
                attempt: 3,
                state: PageState::ChallengeDetected,
                reason: "ChallengeBlockedError".to_string(),
                screenshot_path: None,
                context_path: PathBuf::from("/var/lib/leasedrop/diagnostics/a3.txt"),
            }],
            3,
        )
    }

    #[tokio::test]
    async fn test_success_round_trip() {
        let db = create_test_database().await;
        let stored = success(0);

        let id = db.insert_result(&stored).await.expect("insert");
        let loaded = db.get_query_detail(id).await.expect("detail").expect("present");

        assert_eq!(loaded.query.id, Some(id));
        assert_eq!(loaded.status, QueryStatus::Success);
        assert_eq!(loaded.rows, stored.rows);
        assert_eq!(loaded.statistics, stored.statistics);
        assert_eq!(loaded.percentage_change, Some(50.0));
        assert_eq!(loaded.trend, stored.trend);
        assert_eq!(loaded.production_column.as_deref(), Some("Gross Barrels"));
    }

    #[tokio::test]
    async fn test_failure_keeps_error_and_diagnostics() {
        let db = create_test_database().await;
        let id = db.insert_result(&failure(0)).await.expect("insert");

        let loaded = db.get_query_detail(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, QueryStatus::Failed);
        assert_eq!(loaded.attempts, 3);
        let error = loaded.error.expect("error stored");
        assert_eq!(error.kind, Some(ErrorKind::ChallengeBlocked));
        assert_eq!(loaded.diagnostics.len(), 1);
        assert!(loaded.rows.is_empty());
        assert_eq!(loaded.statistics.count, 0);

        let message: Option<String> =
            sqlx::query_scalar("SELECT error_message FROM lease_queries WHERE id = ?")
                .bind(id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(message.as_deref(), Some("results checkpoint still blocked"));
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let db = create_test_database().await;
        let older = db.insert_result(&success(30)).await.unwrap();
        let newer = db.insert_result(&failure(5)).await.unwrap();
        let oldest = db.insert_result(&success(60)).await.unwrap();

        let ids: Vec<Option<i64>> = db
            .list_queries()
            .await
            .unwrap()
            .iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(ids, vec![Some(newer), Some(older), Some(oldest)]);
    }

    #[tokio::test]
    async fn test_missing_detail_is_none() {
        let db = create_test_database().await;
        assert!(db.get_query_detail(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_appends() {
        let db = create_test_database().await;
        let store: std::sync::Arc<dyn HistoryStore> = std::sync::Arc::new(db.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.append(&success(i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().expect("append");
        }

        assert_eq!(store.list_queries().await.unwrap().len(), 8);
    }
}
