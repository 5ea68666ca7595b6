pub mod artifact_store;
pub mod cron_store;
pub mod event_store;
pub mod run_store;
pub mod worker_store;

pub use artifact_store::SqliteArtifactStore;
pub use cron_store::SqliteCronStore;
pub use event_store::SqliteEventStore;
pub use run_store::SqliteRunStore;
pub use worker_store::SqliteWorkerStore;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Open (creating if missing) the database at `path` in WAL mode.
    pub async fn open(path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .with_context(|| format!("invalid database path: {path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database at {path}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create the schema. Idempotent; runs at every startup.
    pub async fn migrate(&self) -> Result<()> {
        let pool = &self.pool;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                task_version TEXT NOT NULL,
                schema_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                params TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                started_at DATETIME,
                finished_at DATETIME,
                deadline_at DATETIME,
                exit_code INTEGER,
                error TEXT,
                cancel_requested INTEGER NOT NULL DEFAULT 0,
                lease_owner TEXT,
                lease_expires_at DATETIME,
                pgid INTEGER,
                cron_id TEXT
            )
            "#,
        )
        .execute(pool)
        .await
        .context("failed to create runs table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_events (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                ts DATETIME NOT NULL,
                event_type TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            )
            "#,
        )
        .execute(pool)
        .await
        .context("failed to create run_events table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                artifact_id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                file_id TEXT NOT NULL,
                title TEXT NOT NULL,
                kind TEXT NOT NULL,
                mime TEXT NOT NULL,
                path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .context("failed to create artifacts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workers (
                worker_id TEXT PRIMARY KEY,
                hostname TEXT NOT NULL,
                pid INTEGER NOT NULL,
                status TEXT NOT NULL,
                run_id TEXT,
                last_heartbeat DATETIME NOT NULL,
                registered_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .context("failed to create workers table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cron_entries (
                cron_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                name TEXT NOT NULL,
                cron_expression TEXT NOT NULL,
                params TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                next_run_at DATETIME NOT NULL,
                last_run_at DATETIME,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .context("failed to create cron_entries table")?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_runs_status_created ON runs(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_runs_task_created ON runs(task_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_runs_lease_expires ON runs(lease_expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_artifacts_run ON artifacts(run_id)",
            "CREATE INDEX IF NOT EXISTS idx_cron_next_run ON cron_entries(next_run_at)",
        ] {
            sqlx::query(index)
                .execute(pool)
                .await
                .context("failed to create index")?;
        }

        info!("database schema ready");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    let manager = DatabaseManager { pool: pool.clone() };
    manager.migrate().await.unwrap();
    pool
}
