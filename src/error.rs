//! Server-side error taxonomy.
//!
//! Every fallible operation below the HTTP layer returns a structured
//! [`ApiError`]; handlers translate to a status code and a JSON
//! `{status: "error", message}` body at the boundary only.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Unified error type for server operations.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed input: bad path, invalid JSON, missing fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid session token.
    #[error("authentication required")]
    Auth,

    /// The caller lacks the required access level.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The target path or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with current state (duplicate username,
    /// rename target exists).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected failure: database, filesystem, anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::Permission(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }
        let body = Json(json!({
            "status": "error",
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(format!("database error: {}", e))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(format!("io error: {}", e))
    }
}

/// Result type alias for server operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Auth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::permission("x").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::internal("x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = ApiError::not_found("docs/report.pdf");
        assert_eq!(err.to_string(), "not found: docs/report.pdf");
    }
}
