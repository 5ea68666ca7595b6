use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

/// Stream an artifact file from the run directory.
pub async fn download_file(
    State(state): State<AppState>,
    Path((run_id, file_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let artifact = state
        .artifact_repo
        .get_artifact_by_file_id(&run_id, &file_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // Artifact paths were sanitized at ingest time and are relative to the
    // run directory.
    let path = state
        .data_dir
        .join("runs")
        .join(&run_id)
        .join(&artifact.path);

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;
    let stream = ReaderStream::new(file);

    Response::builder()
        .header(header::CONTENT_TYPE, artifact.mime.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", artifact.file_id),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
