use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors returned by the HTTP endpoints.
#[derive(Debug, Error)]
pub enum AppError {
    /// The server lacks the configuration needed to serve the request
    #[error("Server misconfigured: {0}")]
    Misconfigured(String),

    /// The upstream endpoint answered with a non-success status
    #[error("Upstream error ({status}): {body}")]
    Upstream { status: StatusCode, body: String },

    /// The upstream endpoint could not be reached
    #[error("Failed to reach upstream: {0}")]
    Unreachable(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream { status, .. } => *status,
            AppError::Unreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
