use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use taskhub_domain::{
    ArtifactRepository, CronRepository, EventRepository, RunRepository, WorkerRepository,
};
use taskhub_registry::Registry;

use crate::handlers::{
    cron::{create_cron, delete_cron, list_cron, trigger_cron},
    files::download_file,
    health::health_check,
    runs::{cancel_run, get_run, list_artifacts, list_events, list_runs},
    tasks::{create_run, list_tasks},
    workers::list_workers,
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub run_repo: Arc<dyn RunRepository>,
    pub event_repo: Arc<dyn EventRepository>,
    pub artifact_repo: Arc<dyn ArtifactRepository>,
    pub worker_repo: Arc<dyn WorkerRepository>,
    pub cron_repo: Arc<dyn CronRepository>,
    /// Root of the on-disk state (`<data_dir>/runs/<run_id>/…`).
    pub data_dir: PathBuf,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/tasks", get(list_tasks))
        .route("/api/tasks/{task_id}/runs", post(create_run))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/cancel", post(cancel_run))
        .route("/api/runs/{id}/events", get(list_events))
        .route("/api/runs/{id}/artifacts", get(list_artifacts))
        .route("/api/runs/{id}/files/{file_id}", get(download_file))
        .route("/api/workers", get(list_workers))
        .route("/api/cron", get(list_cron).post(create_cron))
        .route("/api/cron/{id}", delete(delete_cron))
        .route("/api/cron/{id}/trigger", post(trigger_cron))
        .with_state(state)
}
