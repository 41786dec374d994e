//! Request-level error taxonomy.
//!
//! Validation, NotFound, and Authorization abort the triggering request and
//! surface only to the initiating actor. Live-delivery failures are not
//! errors at all — they are swallowed inside the dispatcher.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad input shape or bounds (group size, missing fields).
    #[error("{0}")]
    Validation(String),
    /// A referenced chat/message/user id does not resolve.
    #[error("{0}")]
    NotFound(String),
    /// The actor lacks the required role for the operation.
    #[error("{0}")]
    Authorization(String),
    /// The durable backend is unreachable or failing.
    #[error("storage backend unavailable")]
    StorageUnavailable,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Authorization(_) => StatusCode::FORBIDDEN,
            ApiError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => ApiError::NotFound("not found".to_string()),
            _ => {
                tracing::error!(error = %e, "Database error");
                ApiError::StorageUnavailable
            }
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        tracing::error!(error = %e, "Blocking task failed");
        ApiError::Internal
    }
}
