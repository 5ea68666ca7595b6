use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use taskhub_dispatcher::CronSchedule;
use taskhub_domain::CronEntry;
use taskhub_errors::TaskHubError;

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::types::{CronCreate, CronRead, RunCreated};

pub async fn list_cron(State(state): State<AppState>) -> ApiResult<Json<CronRead>> {
    let items = state.cron_repo.list_cron().await?;
    Ok(Json(CronRead { items }))
}

pub async fn create_cron(
    State(state): State<AppState>,
    Json(body): Json<CronCreate>,
) -> ApiResult<Json<CronEntry>> {
    if state.registry.get(&body.task_id).is_none() {
        return Err(TaskHubError::unknown_task(&body.task_id).into());
    }

    let schedule = CronSchedule::parse(&body.cron_expression)?;
    let next_run_at = schedule
        .next_after(Utc::now())
        .ok_or_else(|| ApiError::BadRequest("cron expression never fires".to_string()))?;

    let params = if body.params.is_null() {
        json!({})
    } else {
        body.params
    };
    let entry = CronEntry::new(
        &body.task_id,
        &body.name,
        &body.cron_expression,
        params,
        next_run_at,
    );
    let created = state.cron_repo.create_cron(&entry).await?;
    Ok(Json(created))
}

pub async fn delete_cron(
    State(state): State<AppState>,
    Path(cron_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.cron_repo.delete_cron(&cron_id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({"deleted": cron_id})))
}

/// Enqueue a one-off run with the entry's stored params. The schedule's
/// cadence (`next_run_at`) is left untouched.
pub async fn trigger_cron(
    State(state): State<AppState>,
    Path(cron_id): Path<String>,
) -> ApiResult<Json<RunCreated>> {
    let entry = state
        .cron_repo
        .get_cron(&cron_id)
        .await?
        .ok_or_else(|| TaskHubError::CronNotFound {
            cron_id: cron_id.clone(),
        })?;

    let snapshot = state.registry.snapshot();
    let run = state
        .run_repo
        .enqueue_run(&entry.task_id, entry.params, &snapshot, Some(&entry.cron_id))
        .await?;

    Ok(Json(RunCreated { run_id: run.run_id }))
}
