//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::files::FilesError;

/// Handler-level failures, rendered as `{"status":"failed", ...}` JSON.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unknown stream_id")]
    UnknownStream(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<FilesError> for ApiError {
    fn from(e: FilesError) -> Self {
        match e {
            FilesError::UnsafeName(_) => ApiError::BadRequest(e.to_string()),
            FilesError::NotFound(_) => ApiError::NotFound(e.to_string()),
            FilesError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownStream(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        tracing::warn!(status = %status, "control API error: {}", self);

        (
            status,
            Json(json!({
                "status": "failed",
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
