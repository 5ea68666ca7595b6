use axum::extract::{Path, State};
use axum::Json;

use taskhub_registry::params;

use crate::error::ApiResult;
use crate::routes::AppState;
use crate::types::{RunCreate, RunCreated, TaskRead};

pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<Vec<TaskRead>>> {
    let mut items = Vec::with_capacity(state.registry.len());
    for spec in state.registry.all() {
        let concurrency_current = state.run_repo.running_count(&spec.task_id).await?;
        items.push(TaskRead {
            task_id: spec.task_id.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            tags: spec.tags.clone(),
            version: spec.version.clone(),
            is_enabled: spec.is_enabled,
            concurrency_limit: spec.concurrency_limit,
            timeout_seconds: spec.timeout_seconds,
            params_schema: spec.params_schema.clone(),
            concurrency_current,
        });
    }
    items.sort_by(|a, b| a.task_id.cmp(&b.task_id));
    Ok(Json(items))
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<RunCreate>,
) -> ApiResult<Json<RunCreated>> {
    // Parameters are checked against the task's schema before anything is
    // persisted, so a bad request never leaves a row behind.
    if let Some(spec) = state.registry.get(&task_id) {
        params::validate(&body.params, &spec.params_schema)?;
    }

    let snapshot = state.registry.snapshot();
    let run = state
        .run_repo
        .enqueue_run(&task_id, body.params, &snapshot, None)
        .await?;

    Ok(Json(RunCreated { run_id: run.run_id }))
}
