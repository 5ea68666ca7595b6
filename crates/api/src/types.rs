//! Request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use taskhub_domain::{Artifact, CronEntry, Run, RunStatus, WorkerInfo};

#[derive(Debug, Serialize)]
pub struct TaskRead {
    pub task_id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub version: String,
    pub is_enabled: bool,
    pub concurrency_limit: Option<i64>,
    pub timeout_seconds: Option<i64>,
    pub params_schema: Value,
    /// RUNNING runs of this task right now.
    pub concurrency_current: i64,
}

#[derive(Debug, Deserialize)]
pub struct RunCreate {
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct RunCreated {
    pub run_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunRead {
    pub run_id: String,
    pub task_id: String,
    pub task_version: String,
    pub status: RunStatus,
    pub params: Value,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub lease_owner: Option<String>,
    pub cron_id: Option<String>,
    pub duration: Option<String>,
}

impl From<Run> for RunRead {
    fn from(run: Run) -> Self {
        let duration = run.duration_ms().map(format_duration);
        Self {
            run_id: run.run_id,
            task_id: run.task_id,
            task_version: run.task_version,
            status: run.status,
            params: run.params,
            created_at: run.created_at,
            started_at: run.started_at,
            finished_at: run.finished_at,
            exit_code: run.exit_code,
            error: run.error,
            cancel_requested: run.cancel_requested,
            lease_owner: run.lease_owner,
            cron_id: run.cron_id,
            duration,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub cursor: i64,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactsRead {
    pub run_id: String,
    pub items: Vec<Artifact>,
}

#[derive(Debug, Serialize)]
pub struct WorkersRead {
    pub items: Vec<WorkerInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CronCreate {
    pub task_id: String,
    pub name: String,
    pub cron_expression: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct CronRead {
    pub items: Vec<CronEntry>,
}

fn format_duration(ms: i64) -> String {
    let secs = ms as f64 / 1000.0;
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        format!("{}m {:.0}s", (secs / 60.0) as i64, secs % 60.0)
    } else {
        format!("{}h {}m", (secs / 3600.0) as i64, ((secs % 3600.0) / 60.0) as i64)
    }
}
