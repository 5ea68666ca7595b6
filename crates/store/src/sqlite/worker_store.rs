use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use taskhub_domain::{WorkerInfo, WorkerRepository, WorkerStatus};
use taskhub_errors::{TaskHubError, TaskHubResult};

pub struct SqliteWorkerStore {
    pool: SqlitePool,
}

impl SqliteWorkerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_worker(row: &sqlx::sqlite::SqliteRow) -> TaskHubResult<WorkerInfo> {
        Ok(WorkerInfo {
            worker_id: row.try_get("worker_id")?,
            hostname: row.try_get("hostname")?,
            pid: row.try_get("pid")?,
            status: row.try_get("status")?,
            run_id: row.try_get("run_id")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
        })
    }
}

#[async_trait]
impl WorkerRepository for SqliteWorkerStore {
    async fn upsert_worker(&self, worker: &WorkerInfo) -> TaskHubResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (worker_id, hostname, pid, status, run_id,
                                 last_heartbeat, registered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(worker_id) DO UPDATE SET
                status = excluded.status,
                run_id = excluded.run_id,
                last_heartbeat = excluded.last_heartbeat
            "#,
        )
        .bind(&worker.worker_id)
        .bind(&worker.hostname)
        .bind(worker.pid)
        .bind(worker.status)
        .bind(&worker.run_id)
        .bind(worker.last_heartbeat)
        .bind(worker.registered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn worker_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        run_id: Option<&str>,
    ) -> TaskHubResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workers SET status = $1, run_id = $2, last_heartbeat = $3
            WHERE worker_id = $4
            "#,
        )
        .bind(status)
        .bind(run_id)
        .bind(Utc::now())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_workers(&self) -> TaskHubResult<Vec<WorkerInfo>> {
        let rows = sqlx::query("SELECT * FROM workers ORDER BY registered_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_worker).collect()
    }

    async fn prune_workers(&self, older_than: DateTime<Utc>) -> TaskHubResult<u64> {
        let result = sqlx::query("DELETE FROM workers WHERE last_heartbeat < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
