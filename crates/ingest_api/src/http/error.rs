use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::domain::DomainError;
use serde::Serialize;

/// HTTP-facing error, rendered as `{ "error": ..., "message": ... }`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Broker unavailable or did not acknowledge; the client may retry
    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationError(msg) | DomainError::MalformedPayload(msg) => {
                ApiError::BadRequest(msg)
            }
            e @ DomainError::InvalidTimestamp { .. } => ApiError::BadRequest(e.to_string()),
            e @ DomainError::PublishError(_) => ApiError::PublishFailed(format!("{:#}", e)),
            e @ DomainError::StorageError(_) => ApiError::Internal(format!("{:#}", e)),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            Self::PublishFailed(msg) => {
                tracing::error!(error = %msg, "failed to publish event");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "publish_failed",
                    Some("Event could not be queued, retry later".to_string()),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        (status, Json(ErrorResponse { error, message })).into_response()
    }
}
