use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use taskhub_domain::{CronEntry, CronRepository};
use taskhub_errors::{TaskHubError, TaskHubResult};

pub struct SqliteCronStore {
    pool: SqlitePool,
}

impl SqliteCronStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> TaskHubResult<CronEntry> {
        let params_raw: String = row.try_get("params")?;
        let is_enabled: i64 = row.try_get("is_enabled")?;
        Ok(CronEntry {
            cron_id: row.try_get("cron_id")?,
            task_id: row.try_get("task_id")?,
            name: row.try_get("name")?,
            cron_expression: row.try_get("cron_expression")?,
            params: serde_json::from_str(&params_raw)?,
            is_enabled: is_enabled != 0,
            next_run_at: row.try_get("next_run_at")?,
            last_run_at: row.try_get("last_run_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl CronRepository for SqliteCronStore {
    async fn create_cron(&self, entry: &CronEntry) -> TaskHubResult<CronEntry> {
        sqlx::query(
            r#"
            INSERT INTO cron_entries (cron_id, task_id, name, cron_expression, params,
                                      is_enabled, next_run_at, last_run_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&entry.cron_id)
        .bind(&entry.task_id)
        .bind(&entry.name)
        .bind(&entry.cron_expression)
        .bind(serde_json::to_string(&entry.params)?)
        .bind(entry.is_enabled as i64)
        .bind(entry.next_run_at)
        .bind(entry.last_run_at)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(entry.clone())
    }

    async fn delete_cron(&self, cron_id: &str) -> TaskHubResult<bool> {
        let result = sqlx::query("DELETE FROM cron_entries WHERE cron_id = $1")
            .bind(cron_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_cron(&self, cron_id: &str) -> TaskHubResult<Option<CronEntry>> {
        let row = sqlx::query("SELECT * FROM cron_entries WHERE cron_id = $1")
            .bind(cron_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_entry(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_cron(&self) -> TaskHubResult<Vec<CronEntry>> {
        let rows = sqlx::query("SELECT * FROM cron_entries ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn poll_due_cron(&self, now: DateTime<Utc>) -> TaskHubResult<Vec<CronEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM cron_entries
            WHERE is_enabled = 1 AND next_run_at <= $1
            ORDER BY next_run_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn advance_cron(
        &self,
        cron_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> TaskHubResult<()> {
        let result = sqlx::query(
            "UPDATE cron_entries SET last_run_at = $1, next_run_at = $2 WHERE cron_id = $3",
        )
        .bind(last_run_at)
        .bind(next_run_at)
        .bind(cron_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::CronNotFound {
                cron_id: cron_id.to_string(),
            });
        }
        Ok(())
    }
}
