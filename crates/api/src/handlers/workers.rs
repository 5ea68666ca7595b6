use axum::extract::State;
use axum::Json;

use crate::error::ApiResult;
use crate::routes::AppState;
use crate::types::WorkersRead;

pub async fn list_workers(State(state): State<AppState>) -> ApiResult<Json<WorkersRead>> {
    let items = state.worker_repo.list_workers().await?;
    Ok(Json(WorkersRead { items }))
}
