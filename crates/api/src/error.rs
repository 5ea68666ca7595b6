use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use taskhub_errors::TaskHubError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Core(#[from] TaskHubError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Core(TaskHubError::UnknownTask { .. })
            | ApiError::Core(TaskHubError::RunNotFound { .. })
            | ApiError::Core(TaskHubError::WorkerNotFound { .. })
            | ApiError::Core(TaskHubError::CronNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Core(TaskHubError::TaskDisabled { .. }) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ApiError::Core(TaskHubError::InvalidParams(_))
            | ApiError::Core(TaskHubError::InvalidCron { .. })
            | ApiError::Core(TaskHubError::Serialization(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Core(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
