use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskHubError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database operation failed: {0}")]
    DatabaseOperation(String),
    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: String },
    #[error("task is disabled: {task_id}")]
    TaskDisabled { task_id: String },
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },
    #[error("worker not found: {worker_id}")]
    WorkerNotFound { worker_id: String },
    #[error("cron entry not found: {cron_id}")]
    CronNotFound { cron_id: String },
    #[error("invalid cron expression: {expr} - {message}")]
    InvalidCron { expr: String, message: String },
    #[error("invalid run parameters: {0}")]
    InvalidParams(String),
    #[error("lease lost for run {run_id}")]
    LostLease { run_id: String },
    #[error("run {run_id} is not in state {expected}")]
    InvalidRunState { run_id: String, expected: String },
    #[error("failed to build command: {0}")]
    BuildCommand(String),
    #[error("failed to spawn child process: {0}")]
    Spawn(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type TaskHubResult<T> = Result<T, TaskHubError>;

impl TaskHubError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn unknown_task<S: Into<String>>(task_id: S) -> Self {
        Self::UnknownTask {
            task_id: task_id.into(),
        }
    }
    pub fn task_disabled<S: Into<String>>(task_id: S) -> Self {
        Self::TaskDisabled {
            task_id: task_id.into(),
        }
    }
    pub fn run_not_found<S: Into<String>>(run_id: S) -> Self {
        Self::RunNotFound {
            run_id: run_id.into(),
        }
    }
    pub fn lost_lease<S: Into<String>>(run_id: S) -> Self {
        Self::LostLease {
            run_id: run_id.into(),
        }
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParams(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Errors that must stop the owning component rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TaskHubError::Internal(_) | TaskHubError::Configuration(_)
        )
    }

    /// Errors worth retrying after a backoff (transient store trouble).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskHubError::Database(_) | TaskHubError::DatabaseOperation(_)
        )
    }
}

impl From<serde_json::Error> for TaskHubError {
    fn from(err: serde_json::Error) -> Self {
        TaskHubError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for TaskHubError {
    fn from(err: anyhow::Error) -> Self {
        TaskHubError::Internal(err.to_string())
    }
}
