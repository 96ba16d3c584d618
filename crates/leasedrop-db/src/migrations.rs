//! Embedded schema migrations for the history tables.

use crate::error::{DatabaseError, Result};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

/// Migrations compiled in from `migrations/`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration. Safe to call on every start.
///
/// # Errors
/// Returns `DatabaseError::Migration` if any migration fails to execute.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    tracing::debug!("Applying {} embedded migrations", MIGRATOR.iter().count());

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration execution failed: {e}")))?;

    tracing::info!("History schema up to date");
    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
///
/// # Errors
/// Returns `DatabaseError` if the migrations table cannot be queried.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let tracked = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok(0);
    }

    let version = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1",
    )
    .fetch_one(pool)
    .await?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DbPool;

    #[tokio::test]
    async fn test_run_migrations_creates_history_tables() {
        let pool = DbPool::new(":memory:").await.expect("create pool");

        assert_eq!(get_schema_version(pool.pool()).await.unwrap(), 0);
        run_migrations(pool.pool()).await.expect("run migrations");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name"
        )
        .fetch_all(pool.pool())
        .await
        .expect("query tables");

        assert_eq!(
            tables,
            vec!["lease_data", "lease_queries", "lease_statistics"]
        );
        assert_eq!(get_schema_version(pool.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = DbPool::new(":memory:").await.expect("create pool");

        run_migrations(pool.pool()).await.expect("first run");
        run_migrations(pool.pool())
            .await
            .expect("second run should be idempotent");

        assert_eq!(get_schema_version(pool.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_constraint() {
        let pool = DbPool::new(":memory:").await.expect("create pool");
        run_migrations(pool.pool()).await.expect("run migrations");

        let result = sqlx::query(
            "INSERT INTO lease_queries (timestamp, identifier_type, identifier_value, beg_period, end_period, status)
             VALUES ('2026-01-01T00:00:00Z', 'Lease Number', '011457', '1601', '2001', 'bogus')",
        )
        .execute(pool.pool())
        .await;
        assert!(result.is_err());
    }
}
