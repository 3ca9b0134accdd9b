use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use dsc_types::{DiscoveryError, Result};

/// Async SQLite database connection manager.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from file path.
    pub async fn new(path: &Path, max_connections: u32) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_millis(5000))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| DiscoveryError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a new in-memory database (for testing).
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| DiscoveryError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Initialize all database tables and indexes.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT REFERENCES runs(id) ON DELETE SET NULL,
                owner_id TEXT,
                parameters TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'PENDING',
                result TEXT NOT NULL DEFAULT '{}',
                files TEXT NOT NULL DEFAULT '[]',
                errors TEXT NOT NULL DEFAULT '[]',
                started_at TEXT,
                failed_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DiscoveryError::Database(format!("Create runs table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_owner ON runs(owner_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| DiscoveryError::Database(format!("Create runs owner index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_parent ON runs(parent_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| DiscoveryError::Database(format!("Create runs parent index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)")
            .execute(&self.pool)
            .await
            .map_err(|e| DiscoveryError::Database(format!("Create runs status index: {e}")))?;

        info!("Database schema initialized (1 table, 3 indexes)");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn database_initialize() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM runs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db.initialize().await.unwrap();
    }
}
