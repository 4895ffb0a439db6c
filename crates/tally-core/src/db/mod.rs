//! Database module - SQLx with SQLite

use crate::error::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::PathBuf;

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Create a new database connection with default path
    pub async fn new() -> Result<Self> {
        let db_path = get_db_path()?;
        Self::open(db_path).await
    }

    /// Create a new database connection with a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        log::info!("Connecting to database: {}", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("Running database migrations...");

        // One row per tracked scope
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_ledgers (
                scope TEXT PRIMARY KEY,
                period TEXT NOT NULL,
                consumed_total INTEGER NOT NULL DEFAULT 0 CHECK (consumed_total >= 0),
                last_event_cursor TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Applied consumption deltas
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_consumption (
                id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                period TEXT NOT NULL,
                delta INTEGER NOT NULL CHECK (delta > 0),
                event_cursor TEXT,
                consumed_total_after INTEGER NOT NULL,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_credit_consumption_scope_period
            ON credit_consumption(scope, period, applied_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Per-scope allotment and display settings
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_settings (
                scope TEXT PRIMARY KEY,
                allotment INTEGER NOT NULL,
                warning_threshold REAL NOT NULL,
                critical_threshold REAL NOT NULL,
                granularity TEXT NOT NULL DEFAULT 'monthly',
                utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
                cost_per_credit_usd REAL NOT NULL,
                persistence_timeout_ms INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        log::info!("Database migrations completed");
        Ok(())
    }
}

/// Get database file path
/// Priority: TALLY_DB_PATH env var > default app data directory
pub fn get_db_path() -> Result<PathBuf> {
    // Check for environment variable override
    if let Ok(path) = std::env::var("TALLY_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    // Default: use app data directory
    let dirs = directories::ProjectDirs::from("com", "tally", "Tally")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;

    Ok(dirs.data_dir().join("tally.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to ensure env var tests don't run in parallel
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_get_db_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::remove_var("TALLY_DB_PATH");
        let path = get_db_path().unwrap();
        assert!(path.to_string_lossy().contains("tally.db"));
    }

    #[test]
    fn test_get_db_path_env_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let test_path = "/tmp/test_tally.db";
        std::env::set_var("TALLY_DB_PATH", test_path);
        let path = get_db_path().unwrap();
        assert_eq!(path.to_string_lossy(), test_path);
        std::env::remove_var("TALLY_DB_PATH");
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("tally.db");

        let db = Database::open(path.clone()).await.unwrap();
        db.pool.close().await;
        let db = Database::open(path).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'credit_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["credit_consumption", "credit_ledgers", "credit_settings"]);
    }
}
