//! Repository abstractions over the shared store.
//!
//! Each method is a single transaction from the caller's point of view; the
//! store below serializes writers, so these are the only concurrency
//! primitives the components need.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    Artifact, CronEntry, EventPage, ExpiredLease, RegistrySnapshot, Run, RunFilter, RunStatus,
    WorkerInfo, WorkerStatus,
};
use taskhub_errors::TaskHubResult;

/// Queue and lifecycle operations on runs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Insert a QUEUED run for `task_id`. Fails with `UnknownTask` /
    /// `TaskDisabled` against the supplied registry snapshot.
    async fn enqueue_run(
        &self,
        task_id: &str,
        params: serde_json::Value,
        snapshot: &RegistrySnapshot,
        cron_id: Option<&str>,
    ) -> TaskHubResult<Run>;

    /// Atomically claim the oldest QUEUED run whose task is enabled and
    /// below its concurrency limit. Returns `None` when nothing is claimable.
    async fn claim_next(
        &self,
        worker_id: &str,
        lease_duration: Duration,
        snapshot: &RegistrySnapshot,
    ) -> TaskHubResult<Option<Run>>;

    /// Extend the lease iff `worker_id` still owns the RUNNING run;
    /// `LostLease` otherwise, after which the worker must abandon the run.
    async fn renew_lease(
        &self,
        run_id: &str,
        worker_id: &str,
        lease_duration: Duration,
    ) -> TaskHubResult<()>;

    /// Record the child's process-group id. Validates lease ownership.
    async fn set_pgid(&self, run_id: &str, worker_id: &str, pgid: i32) -> TaskHubResult<()>;

    /// Move RUNNING → terminal, clearing the lease. Validates ownership.
    async fn finish_run(
        &self,
        run_id: &str,
        worker_id: &str,
        status: RunStatus,
        exit_code: Option<i32>,
        error: Option<&str>,
    ) -> TaskHubResult<Run>;

    /// Flag a run for cancellation. QUEUED runs go straight to CANCELED;
    /// RUNNING runs keep their status and the owning worker escalates.
    async fn request_cancel(&self, run_id: &str) -> TaskHubResult<Run>;

    /// All RUNNING runs whose lease expired before `now`. Does not mutate.
    async fn reap_expired(&self, now: DateTime<Utc>) -> TaskHubResult<Vec<ExpiredLease>>;

    /// Reaper-side transition to FAILED for a run whose lease expired.
    /// Returns false when the run was renewed or finished in the meantime;
    /// a still-valid lease is never overridden.
    async fn abandon_run(&self, run_id: &str, reason: &str) -> TaskHubResult<bool>;

    async fn get_run(&self, run_id: &str) -> TaskHubResult<Option<Run>>;

    async fn list_runs(&self, filter: &RunFilter) -> TaskHubResult<Vec<Run>>;

    /// Number of RUNNING runs for a task, for API reporting.
    async fn running_count(&self, task_id: &str) -> TaskHubResult<i64>;
}

/// Append-only, per-run totally ordered event log.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append one event; returns the assigned per-run sequence number.
    async fn append_event(
        &self,
        run_id: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> TaskHubResult<i64>;

    /// Contiguous events with `seq > after_seq`, up to `limit`.
    async fn list_events(
        &self,
        run_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> TaskHubResult<EventPage>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn insert_artifact(&self, artifact: &Artifact) -> TaskHubResult<Artifact>;
    async fn list_artifacts(&self, run_id: &str) -> TaskHubResult<Vec<Artifact>>;
    async fn get_artifact_by_file_id(
        &self,
        run_id: &str,
        file_id: &str,
    ) -> TaskHubResult<Option<Artifact>>;
}

/// Worker registry soft state.
#[async_trait]
pub trait WorkerRepository: Send + Sync {
    async fn upsert_worker(&self, worker: &WorkerInfo) -> TaskHubResult<()>;

    /// Refresh `last_heartbeat` and the IDLE/BUSY status of a worker.
    async fn worker_heartbeat(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        run_id: Option<&str>,
    ) -> TaskHubResult<()>;

    async fn list_workers(&self) -> TaskHubResult<Vec<WorkerInfo>>;

    /// Drop rows whose heartbeat predates `older_than`. Returns the count.
    async fn prune_workers(&self, older_than: DateTime<Utc>) -> TaskHubResult<u64>;
}

#[async_trait]
pub trait CronRepository: Send + Sync {
    async fn create_cron(&self, entry: &CronEntry) -> TaskHubResult<CronEntry>;
    async fn delete_cron(&self, cron_id: &str) -> TaskHubResult<bool>;
    async fn get_cron(&self, cron_id: &str) -> TaskHubResult<Option<CronEntry>>;
    async fn list_cron(&self) -> TaskHubResult<Vec<CronEntry>>;

    /// Enabled entries with `next_run_at <= now`.
    async fn poll_due_cron(&self, now: DateTime<Utc>) -> TaskHubResult<Vec<CronEntry>>;

    /// Record a fire and move the entry to its next occurrence.
    async fn advance_cron(
        &self,
        cron_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> TaskHubResult<()>;
}
