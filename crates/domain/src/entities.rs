//! Domain entities.
//!
//! These are the persistent business objects shared by every component. They
//! carry no behavior beyond state helpers; all mutation goes through the
//! repository traits in [`crate::repositories`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a run.
///
/// The transition graph is acyclic: QUEUED → RUNNING → {SUCCEEDED, FAILED,
/// CANCELED}, plus the direct QUEUED → CANCELED edge for cancels that land
/// before a worker claims the run. Terminal states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCEEDED")]
    Succeeded,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Succeeded => "SUCCEEDED",
            RunStatus::Failed => "FAILED",
            RunStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled
        )
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCEEDED" => Ok(RunStatus::Succeeded),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELED" => Ok(RunStatus::Canceled),
            other => Err(format!("invalid run status: {other}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for RunStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RunStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RunStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// One execution attempt of a task with concrete parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub task_id: String,
    pub task_version: String,
    pub schema_hash: String,
    pub status: RunStatus,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub pgid: Option<i32>,
    pub cron_id: Option<String>,
}

impl Run {
    /// Build a fresh QUEUED run. The id is assigned here and never changes.
    pub fn new(
        task_id: &str,
        task_version: &str,
        schema_hash: &str,
        params: serde_json::Value,
        cron_id: Option<String>,
    ) -> Self {
        Self {
            run_id: format!("r-{}", Uuid::new_v4().simple()),
            task_id: task_id.to_string(),
            task_version: task_version.to_string(),
            schema_hash: schema_hash.to_string(),
            status: RunStatus::Queued,
            params,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            deadline_at: None,
            exit_code: None,
            error: None,
            cancel_requested: false,
            lease_owner: None,
            lease_expires_at: None,
            pgid: None,
            cron_id,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(started), Some(finished)) => Some((finished - started).num_milliseconds()),
            _ => None,
        }
    }
}

/// A structured event appended to a run's totally ordered log.
///
/// `seq` starts at 1 and is gapless per run; event rows are never deleted
/// while the run row exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub seq: i64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

/// A cursor page of events, ordered by `seq`.
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub items: Vec<RunEvent>,
    pub next_cursor: i64,
}

/// A file produced by a run, referenced from its event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub run_id: String,
    pub file_id: String,
    pub title: String,
    pub kind: String,
    pub mime: String,
    /// Relative to the run directory `data/runs/<run_id>/`.
    pub path: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(
        run_id: &str,
        file_id: &str,
        title: &str,
        kind: &str,
        mime: &str,
        path: &str,
        size_bytes: i64,
    ) -> Self {
        Self {
            artifact_id: format!("a-{}", Uuid::new_v4().simple()),
            run_id: run_id.to_string(),
            file_id: file_id.to_string(),
            title: title.to_string(),
            kind: kind.to_string(),
            mime: mime.to_string(),
            path: path.to_string(),
            size_bytes,
            created_at: Utc::now(),
        }
    }
}

/// Worker liveness state, as reported by the worker itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "BUSY")]
    Busy,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Busy => "BUSY",
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for WorkerStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for WorkerStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "IDLE" => Ok(WorkerStatus::Idle),
            "BUSY" => Ok(WorkerStatus::Busy),
            other => Err(format!("invalid worker status: {other}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for WorkerStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// A worker registry row. Soft state: purely informational for the API,
/// pruned by the reaper when heartbeats go stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub hostname: String,
    pub pid: i32,
    pub status: WorkerStatus,
    pub run_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl WorkerInfo {
    pub fn new(hostname: &str, pid: i32) -> Self {
        let now = Utc::now();
        let rand = Uuid::new_v4().simple().to_string();
        Self {
            worker_id: format!("w-{hostname}-{pid}-{}", &rand[..8]),
            hostname: hostname.to_string(),
            pid,
            status: WorkerStatus::Idle,
            run_id: None,
            last_heartbeat: now,
            registered_at: now,
        }
    }
}

/// A stored schedule that materializes runs over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronEntry {
    pub cron_id: String,
    pub task_id: String,
    pub name: String,
    pub cron_expression: String,
    pub params: serde_json::Value,
    pub is_enabled: bool,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CronEntry {
    pub fn new(
        task_id: &str,
        name: &str,
        cron_expression: &str,
        params: serde_json::Value,
        next_run_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cron_id: format!("c-{}", Uuid::new_v4().simple()),
            task_id: task_id.to_string(),
            name: name.to_string(),
            cron_expression: cron_expression.to_string(),
            params,
            is_enabled: true,
            next_run_at,
            last_run_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Query filter for run listings.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub task_id: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<i64>,
}

/// What a claimer needs to know about one registered task.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub task_id: String,
    pub version: String,
    pub schema_hash: String,
    pub is_enabled: bool,
    /// `None` means unbounded.
    pub concurrency_limit: Option<i64>,
    pub timeout_seconds: Option<i64>,
}

/// Immutable view of the task registry, passed into store operations so the
/// store never depends on task code.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    tasks: HashMap<String, TaskDescriptor>,
}

impl RegistrySnapshot {
    pub fn new(tasks: Vec<TaskDescriptor>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.task_id.clone(), t)).collect(),
        }
    }

    pub fn get(&self, task_id: &str) -> Option<&TaskDescriptor> {
        self.tasks.get(task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// One expired lease surfaced by `reap_expired`: everything the reaper needs
/// to clean up without re-reading the run row.
#[derive(Debug, Clone)]
pub struct ExpiredLease {
    pub run_id: String,
    pub pgid: Option<i32>,
    pub lease_owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_prefixed() {
        let a = Run::new("t", "1.0.0", "h", serde_json::json!({}), None);
        let b = Run::new("t", "1.0.0", "h", serde_json::json!({}), None);
        assert!(a.run_id.starts_with("r-"));
        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.status, RunStatus::Queued);
        assert!(!a.cancel_requested);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<RunStatus>().is_err());
    }

    #[test]
    fn duration_requires_both_timestamps() {
        let mut run = Run::new("t", "1.0.0", "h", serde_json::json!({}), None);
        assert_eq!(run.duration_ms(), None);
        run.started_at = Some(Utc::now());
        run.finished_at = Some(run.started_at.unwrap() + chrono::Duration::milliseconds(1500));
        assert_eq!(run.duration_ms(), Some(1500));
    }

    #[test]
    fn snapshot_lookup() {
        let snapshot = RegistrySnapshot::new(vec![TaskDescriptor {
            task_id: "demo".into(),
            version: "1.0.0".into(),
            schema_hash: "abc".into(),
            is_enabled: true,
            concurrency_limit: Some(2),
            timeout_seconds: None,
        }]);
        assert!(snapshot.get("demo").is_some());
        assert!(snapshot.get("missing").is_none());
        assert_eq!(snapshot.len(), 1);
    }
}
