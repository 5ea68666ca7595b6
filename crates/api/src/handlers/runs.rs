use axum::extract::{Path, Query, State};
use axum::Json;

use taskhub_domain::{EventPage, RunFilter};
use taskhub_errors::TaskHubError;

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;
use crate::types::{ArtifactsRead, EventsQuery, RunRead, RunsQuery};

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<RunRead>>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse()
                .map_err(|e: String| ApiError::BadRequest(e))?,
        ),
        None => None,
    };
    let filter = RunFilter {
        task_id: query.task_id,
        status,
        limit: query.limit,
    };
    let runs = state.run_repo.list_runs(&filter).await?;
    Ok(Json(runs.into_iter().map(RunRead::from).collect()))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunRead>> {
    let run = state
        .run_repo
        .get_run(&run_id)
        .await?
        .ok_or_else(|| TaskHubError::run_not_found(&run_id))?;
    Ok(Json(RunRead::from(run)))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunRead>> {
    let run = state.run_repo.request_cancel(&run_id).await?;
    Ok(Json(RunRead::from(run)))
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<EventPage>> {
    let limit = query.limit.unwrap_or(100);
    let page = state
        .event_repo
        .list_events(&run_id, query.cursor, limit)
        .await?;
    Ok(Json(page))
}

pub async fn list_artifacts(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ArtifactsRead>> {
    let items = state.artifact_repo.list_artifacts(&run_id).await?;
    Ok(Json(ArtifactsRead { run_id, items }))
}
