//! Custom error types for the API service

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::workflow::WorkflowError;

/// Custom error type for the API service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing, invalid, expired or revoked session
    #[error("Unauthorized")]
    Unauthorized,

    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Malformed or oversized multipart body
    #[error("Upload error: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

fn workflow_status(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::DuplicateUsername | WorkflowError::DuplicateEmail => StatusCode::CONFLICT,
        WorkflowError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        WorkflowError::TokenInvalid | WorkflowError::TokenExpired => StatusCode::BAD_REQUEST,
        WorkflowError::NotOwner | WorkflowError::Unconfirmed => StatusCode::FORBIDDEN,
        WorkflowError::NotFound => StatusCode::NOT_FOUND,
        WorkflowError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        WorkflowError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        WorkflowError::NotificationFailed => StatusCode::BAD_GATEWAY,
        WorkflowError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        WorkflowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::CatalogInconsistent | WorkflowError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Multipart(err) => (err.status(), err.body_text()),
            ApiError::Workflow(WorkflowError::Internal(_)) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            ApiError::Workflow(err) => (workflow_status(&err), err.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_errors_map_to_distinct_statuses() {
        let cases = [
            (WorkflowError::DuplicateEmail, StatusCode::CONFLICT),
            (WorkflowError::NotOwner, StatusCode::FORBIDDEN),
            (WorkflowError::NotFound, StatusCode::NOT_FOUND),
            (WorkflowError::StorageUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (WorkflowError::NotificationFailed, StatusCode::BAD_GATEWAY),
            (
                WorkflowError::CatalogInconsistent,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (WorkflowError::TokenExpired, StatusCode::BAD_REQUEST),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let response =
            ApiError::from(WorkflowError::Internal("connection refused".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
