use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument, warn};

use taskhub_domain::{
    ExpiredLease, RegistrySnapshot, Run, RunFilter, RunRepository, RunStatus,
};
use taskhub_errors::{TaskHubError, TaskHubResult};

/// How many QUEUED candidates one claim transaction inspects before giving
/// up. Runs skipped for concurrency stay queued and are revisited next poll.
const CLAIM_SCAN_LIMIT: i64 = 50;

pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> TaskHubResult<Run> {
        let params_raw: String = row.try_get("params")?;
        let cancel_requested: i64 = row.try_get("cancel_requested")?;
        Ok(Run {
            run_id: row.try_get("run_id")?,
            task_id: row.try_get("task_id")?,
            task_version: row.try_get("task_version")?,
            schema_hash: row.try_get("schema_hash")?,
            status: row.try_get("status")?,
            params: serde_json::from_str(&params_raw)?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            deadline_at: row.try_get("deadline_at")?,
            exit_code: row.try_get("exit_code")?,
            error: row.try_get("error")?,
            cancel_requested: cancel_requested != 0,
            lease_owner: row.try_get("lease_owner")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            pgid: row.try_get("pgid")?,
            cron_id: row.try_get("cron_id")?,
        })
    }

    async fn fetch_run(&self, run_id: &str) -> TaskHubResult<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_run(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RunRepository for SqliteRunStore {
    #[instrument(skip(self, params, snapshot))]
    async fn enqueue_run(
        &self,
        task_id: &str,
        params: serde_json::Value,
        snapshot: &RegistrySnapshot,
        cron_id: Option<&str>,
    ) -> TaskHubResult<Run> {
        let descriptor = snapshot
            .get(task_id)
            .ok_or_else(|| TaskHubError::unknown_task(task_id))?;
        if !descriptor.is_enabled {
            return Err(TaskHubError::task_disabled(task_id));
        }

        let run = Run::new(
            task_id,
            &descriptor.version,
            &descriptor.schema_hash,
            params,
            cron_id.map(String::from),
        );

        sqlx::query(
            r#"
            INSERT INTO runs (run_id, task_id, task_version, schema_hash, status, params,
                              created_at, cancel_requested, cron_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.task_id)
        .bind(&run.task_version)
        .bind(&run.schema_hash)
        .bind(run.status)
        .bind(serde_json::to_string(&run.params)?)
        .bind(run.created_at)
        .bind(&run.cron_id)
        .execute(&self.pool)
        .await?;

        debug!(run_id = %run.run_id, task_id, "run enqueued");
        Ok(run)
    }

    #[instrument(skip(self, snapshot))]
    async fn claim_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        snapshot: &RegistrySnapshot,
    ) -> TaskHubResult<Option<Run>> {
        let now = Utc::now();
        let lease_expires = now
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| TaskHubError::Internal(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let candidates = sqlx::query(
            r#"
            SELECT * FROM runs WHERE status = 'QUEUED'
            ORDER BY created_at ASC, run_id ASC
            LIMIT $1
            "#,
        )
        .bind(CLAIM_SCAN_LIMIT)
        .fetch_all(&mut *tx)
        .await?;

        for row in &candidates {
            let mut run = Self::row_to_run(row)?;

            let Some(descriptor) = snapshot.get(&run.task_id) else {
                // Task disappeared from the registry since enqueue; leave the
                // run queued so a registry that regains the task can serve it.
                continue;
            };
            if !descriptor.is_enabled {
                continue;
            }

            if let Some(limit) = descriptor.concurrency_limit {
                let running: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM runs WHERE task_id = $1 AND status = 'RUNNING'",
                )
                .bind(&run.task_id)
                .fetch_one(&mut *tx)
                .await?;
                if running >= limit {
                    continue;
                }
            }

            let deadline = descriptor
                .timeout_seconds
                .map(|secs| now + chrono::Duration::seconds(secs));

            let updated = sqlx::query(
                r#"
                UPDATE runs
                SET status = 'RUNNING', started_at = $1, lease_owner = $2,
                    lease_expires_at = $3, deadline_at = $4
                WHERE run_id = $5 AND status = 'QUEUED'
                "#,
            )
            .bind(now)
            .bind(worker_id)
            .bind(lease_expires)
            .bind(deadline)
            .bind(&run.run_id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() != 1 {
                // Should not happen while we hold the writer; skip defensively.
                warn!(run_id = %run.run_id, "claim update matched no row");
                continue;
            }

            tx.commit().await?;

            run.status = RunStatus::Running;
            run.started_at = Some(now);
            run.lease_owner = Some(worker_id.to_string());
            run.lease_expires_at = Some(lease_expires);
            run.deadline_at = deadline;
            debug!(run_id = %run.run_id, worker_id, "run claimed");
            return Ok(Some(run));
        }

        tx.rollback().await?;
        Ok(None)
    }

    async fn renew_lease(
        &self,
        run_id: &str,
        worker_id: &str,
        lease_duration: Duration,
    ) -> TaskHubResult<()> {
        let new_expiry = Utc::now()
            + chrono::Duration::from_std(lease_duration)
                .map_err(|e| TaskHubError::Internal(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE runs SET lease_expires_at = $1
            WHERE run_id = $2 AND lease_owner = $3 AND status = 'RUNNING'
            "#,
        )
        .bind(new_expiry)
        .bind(run_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::lost_lease(run_id));
        }
        Ok(())
    }

    async fn set_pgid(&self, run_id: &str, worker_id: &str, pgid: i32) -> TaskHubResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE runs SET pgid = $1
            WHERE run_id = $2 AND lease_owner = $3 AND status = 'RUNNING'
            "#,
        )
        .bind(pgid)
        .bind(run_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::lost_lease(run_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn finish_run(
        &self,
        run_id: &str,
        worker_id: &str,
        status: RunStatus,
        exit_code: Option<i32>,
        error: Option<&str>,
    ) -> TaskHubResult<Run> {
        if !status.is_terminal() {
            return Err(TaskHubError::Internal(format!(
                "finish_run called with non-terminal status {}",
                status.as_str()
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = $1, finished_at = $2, exit_code = $3, error = $4,
                lease_owner = NULL, lease_expires_at = NULL, pgid = NULL
            WHERE run_id = $5 AND lease_owner = $6 AND status = 'RUNNING'
            "#,
        )
        .bind(status)
        .bind(Utc::now())
        .bind(exit_code)
        .bind(error)
        .bind(run_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TaskHubError::lost_lease(run_id));
        }

        self.fetch_run(run_id)
            .await?
            .ok_or_else(|| TaskHubError::run_not_found(run_id))
    }

    #[instrument(skip(self))]
    async fn request_cancel(&self, run_id: &str) -> TaskHubResult<Run> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?;
        let run = match row {
            Some(row) => Self::row_to_run(&row)?,
            None => return Err(TaskHubError::run_not_found(run_id)),
        };

        match run.status {
            RunStatus::Queued => {
                sqlx::query(
                    r#"
                    UPDATE runs
                    SET status = 'CANCELED', cancel_requested = 1, finished_at = $1,
                        error = 'canceled'
                    WHERE run_id = $2 AND status = 'QUEUED'
                    "#,
                )
                .bind(Utc::now())
                .bind(run_id)
                .execute(&mut *tx)
                .await?;
            }
            RunStatus::Running => {
                sqlx::query("UPDATE runs SET cancel_requested = 1 WHERE run_id = $1")
                    .bind(run_id)
                    .execute(&mut *tx)
                    .await?;
            }
            // Terminal: cancel is idempotent, nothing to do.
            _ => {}
        }

        tx.commit().await?;

        self.fetch_run(run_id)
            .await?
            .ok_or_else(|| TaskHubError::run_not_found(run_id))
    }

    async fn reap_expired(&self, now: DateTime<Utc>) -> TaskHubResult<Vec<ExpiredLease>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, pgid, lease_owner FROM runs
            WHERE status = 'RUNNING' AND lease_expires_at < $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ExpiredLease {
                    run_id: row.try_get("run_id")?,
                    pgid: row.try_get("pgid")?,
                    lease_owner: row.try_get("lease_owner")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn abandon_run(&self, run_id: &str, reason: &str) -> TaskHubResult<bool> {
        // Expiry re-checked at transaction time: a lease renewed between the
        // reap scan and this call stays untouched.
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'FAILED', error = $1, finished_at = $2,
                lease_owner = NULL, lease_expires_at = NULL, pgid = NULL
            WHERE run_id = $3 AND status = 'RUNNING' AND lease_expires_at < $2
            "#,
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_run(&self, run_id: &str) -> TaskHubResult<Option<Run>> {
        self.fetch_run(run_id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> TaskHubResult<Vec<Run>> {
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);

        let rows = match (&filter.task_id, filter.status) {
            (Some(task_id), Some(status)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM runs WHERE task_id = $1 AND status = $2
                    ORDER BY created_at DESC LIMIT $3
                    "#,
                )
                .bind(task_id)
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(task_id), None) => {
                sqlx::query(
                    "SELECT * FROM runs WHERE task_id = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(task_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(status)) => {
                sqlx::query(
                    "SELECT * FROM runs WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(status)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query("SELECT * FROM runs ORDER BY created_at DESC LIMIT $1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::row_to_run).collect()
    }

    async fn running_count(&self, task_id: &str) -> TaskHubResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM runs WHERE task_id = $1 AND status = 'RUNNING'",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::test_pool;
    use serde_json::json;
    use taskhub_domain::TaskDescriptor;

    fn snapshot_with(task_id: &str, limit: Option<i64>) -> RegistrySnapshot {
        RegistrySnapshot::new(vec![TaskDescriptor {
            task_id: task_id.to_string(),
            version: "1.0.0".into(),
            schema_hash: "hash".into(),
            is_enabled: true,
            concurrency_limit: limit,
            timeout_seconds: None,
        }])
    }

    fn disabled_snapshot(task_id: &str) -> RegistrySnapshot {
        RegistrySnapshot::new(vec![TaskDescriptor {
            task_id: task_id.to_string(),
            version: "1.0.0".into(),
            schema_hash: "hash".into(),
            is_enabled: false,
            concurrency_limit: None,
            timeout_seconds: None,
        }])
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn enqueue_rejects_unknown_and_disabled_tasks() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);

        let err = store
            .enqueue_run("nope", json!({}), &snapshot, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskHubError::UnknownTask { .. }));

        let err = store
            .enqueue_run("demo", json!({}), &disabled_snapshot("demo"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskHubError::TaskDisabled { .. }));
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);

        let first = store
            .enqueue_run("demo", json!({"n": 1}), &snapshot, None)
            .await
            .unwrap();
        let _second = store
            .enqueue_run("demo", json!({"n": 2}), &snapshot, None)
            .await
            .unwrap();

        let claimed = store
            .claim_next("w-1", LEASE, &snapshot)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.run_id, first.run_id);
        assert_eq!(claimed.status, RunStatus::Running);
        assert_eq!(claimed.lease_owner.as_deref(), Some("w-1"));
        assert!(claimed.started_at.is_some());

        // The same run is never handed out twice.
        let next = store
            .claim_next("w-2", LEASE, &snapshot)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(next.run_id, claimed.run_id);

        assert!(store.claim_next("w-3", LEASE, &snapshot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn racing_claims_hand_out_distinct_runs() {
        let pool = test_pool().await;
        let store = std::sync::Arc::new(SqliteRunStore::new(pool));
        let snapshot = snapshot_with("demo", None);

        for i in 0..4 {
            store
                .enqueue_run("demo", json!({ "n": i }), &snapshot, None)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for w in 0..4 {
            let store = std::sync::Arc::clone(&store);
            let snapshot = snapshot.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_next(&format!("w-{w}"), LEASE, &snapshot)
                    .await
                    .unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            if let Some(run) = handle.await.unwrap() {
                assert!(seen.insert(run.run_id), "run claimed twice");
            }
        }
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn concurrency_limit_caps_running_runs() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", Some(2));

        for _ in 0..5 {
            store
                .enqueue_run("demo", json!({}), &snapshot, None)
                .await
                .unwrap();
        }

        assert!(store.claim_next("w-1", LEASE, &snapshot).await.unwrap().is_some());
        assert!(store.claim_next("w-2", LEASE, &snapshot).await.unwrap().is_some());
        // Third claim is refused even though three runs remain queued.
        assert!(store.claim_next("w-3", LEASE, &snapshot).await.unwrap().is_none());
        assert_eq!(store.running_count("demo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn disabled_tasks_are_not_claimable() {
        let store = SqliteRunStore::new(test_pool().await);
        let enabled = snapshot_with("demo", None);
        store
            .enqueue_run("demo", json!({}), &enabled, None)
            .await
            .unwrap();

        let disabled = disabled_snapshot("demo");
        assert!(store.claim_next("w-1", LEASE, &disabled).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lease_renewal_and_honesty() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);
        store
            .enqueue_run("demo", json!({}), &snapshot, None)
            .await
            .unwrap();
        let run = store
            .claim_next("w-1", LEASE, &snapshot)
            .await
            .unwrap()
            .unwrap();

        store.renew_lease(&run.run_id, "w-1", LEASE).await.unwrap();

        // Wrong owner never renews, finishes or records a pgid.
        assert!(matches!(
            store.renew_lease(&run.run_id, "w-2", LEASE).await,
            Err(TaskHubError::LostLease { .. })
        ));
        assert!(matches!(
            store.set_pgid(&run.run_id, "w-2", 123).await,
            Err(TaskHubError::LostLease { .. })
        ));
        assert!(matches!(
            store
                .finish_run(&run.run_id, "w-2", RunStatus::Succeeded, Some(0), None)
                .await,
            Err(TaskHubError::LostLease { .. })
        ));

        store.set_pgid(&run.run_id, "w-1", 4242).await.unwrap();
        let finished = store
            .finish_run(&run.run_id, "w-1", RunStatus::Succeeded, Some(0), None)
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.exit_code, Some(0));
        assert!(finished.lease_owner.is_none());
        assert!(finished.lease_expires_at.is_none());
        assert!(finished.pgid.is_none());
        assert!(finished.finished_at.is_some());

        // finish_run on a terminal run fails: status is no longer RUNNING.
        assert!(matches!(
            store
                .finish_run(&run.run_id, "w-1", RunStatus::Failed, Some(1), None)
                .await,
            Err(TaskHubError::LostLease { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_queued_goes_straight_to_canceled() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);
        let run = store
            .enqueue_run("demo", json!({}), &snapshot, None)
            .await
            .unwrap();

        let canceled = store.request_cancel(&run.run_id).await.unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
        assert!(canceled.cancel_requested);
        assert!(canceled.finished_at.is_some());

        // Idempotent on a terminal run.
        let again = store.request_cancel(&run.run_id).await.unwrap();
        assert_eq!(again.status, RunStatus::Canceled);

        // A canceled run is no longer claimable.
        assert!(store.claim_next("w-1", LEASE, &snapshot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_running_only_sets_flag() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);
        store
            .enqueue_run("demo", json!({}), &snapshot, None)
            .await
            .unwrap();
        let run = store
            .claim_next("w-1", LEASE, &snapshot)
            .await
            .unwrap()
            .unwrap();

        let flagged = store.request_cancel(&run.run_id).await.unwrap();
        assert_eq!(flagged.status, RunStatus::Running);
        assert!(flagged.cancel_requested);
        assert_eq!(flagged.lease_owner.as_deref(), Some("w-1"));
    }

    #[tokio::test]
    async fn reaper_only_sees_expired_leases() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);
        store
            .enqueue_run("demo", json!({}), &snapshot, None)
            .await
            .unwrap();
        let run = store
            .claim_next("w-1", Duration::from_millis(500), &snapshot)
            .await
            .unwrap()
            .unwrap();
        store.set_pgid(&run.run_id, "w-1", 999).await.unwrap();

        // Lease still valid: nothing to reap, abandon is refused.
        assert!(store.reap_expired(Utc::now()).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(700)).await;

        let expired = store.reap_expired(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].run_id, run.run_id);
        assert_eq!(expired[0].pgid, Some(999));
        assert_eq!(expired[0].lease_owner.as_deref(), Some("w-1"));

        assert!(store
            .abandon_run(&run.run_id, "lease_expired by reaper, original_owner=w-1")
            .await
            .unwrap());

        let failed = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(failed.error.as_deref().unwrap().contains("lease_expired"));
        assert!(failed.lease_owner.is_none());
        assert!(failed.pgid.is_none());

        // Second abandon is a no-op.
        assert!(!store.abandon_run(&run.run_id, "again").await.unwrap());
    }

    #[tokio::test]
    async fn abandon_refuses_valid_lease() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = snapshot_with("demo", None);
        store
            .enqueue_run("demo", json!({}), &snapshot, None)
            .await
            .unwrap();
        let run = store
            .claim_next("w-1", LEASE, &snapshot)
            .await
            .unwrap()
            .unwrap();

        assert!(!store.abandon_run(&run.run_id, "nope").await.unwrap());
        let still = store.get_run(&run.run_id).await.unwrap().unwrap();
        assert_eq!(still.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn list_runs_filters_by_task_and_status() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = RegistrySnapshot::new(vec![
            TaskDescriptor {
                task_id: "a".into(),
                version: "1.0.0".into(),
                schema_hash: "h".into(),
                is_enabled: true,
                concurrency_limit: None,
                timeout_seconds: None,
            },
            TaskDescriptor {
                task_id: "b".into(),
                version: "1.0.0".into(),
                schema_hash: "h".into(),
                is_enabled: true,
                concurrency_limit: None,
                timeout_seconds: None,
            },
        ]);

        store.enqueue_run("a", json!({}), &snapshot, None).await.unwrap();
        store.enqueue_run("b", json!({}), &snapshot, None).await.unwrap();
        store.enqueue_run("b", json!({}), &snapshot, None).await.unwrap();

        let all = store.list_runs(&RunFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let only_b = store
            .list_runs(&RunFilter {
                task_id: Some("b".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_b.len(), 2);

        let queued = store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Queued),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(queued.len(), 3);
    }

    #[tokio::test]
    async fn claim_records_deadline_from_task_timeout() {
        let store = SqliteRunStore::new(test_pool().await);
        let snapshot = RegistrySnapshot::new(vec![TaskDescriptor {
            task_id: "timed".into(),
            version: "1.0.0".into(),
            schema_hash: "h".into(),
            is_enabled: true,
            concurrency_limit: None,
            timeout_seconds: Some(120),
        }]);
        store
            .enqueue_run("timed", json!({}), &snapshot, None)
            .await
            .unwrap();

        let run = store
            .claim_next("w-1", LEASE, &snapshot)
            .await
            .unwrap()
            .unwrap();
        let deadline = run.deadline_at.unwrap();
        let delta = (deadline - run.started_at.unwrap()).num_seconds();
        assert_eq!(delta, 120);
    }
}
