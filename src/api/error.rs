//! HTTP error responses
//!
//! Every error leaves the API as `{"error": {"code", "message", "details"}}`
//! with a machine-readable code from a closed set. Ownership failures
//! surface as 404 so the API never leaks existence.

use crate::error::RegistryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value as JsonValue};
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: JsonValue,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = details;
        self
    }

    pub fn invalid_hash() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "INVALID_HASH",
            "hash must be like 'blake3:<hex>'",
        )
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_QUERY", message)
    }

    pub fn invalid_body(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_BODY", message)
    }

    pub fn invalid_json() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "INVALID_JSON",
            "Request body must be valid JSON.",
        )
    }

    pub fn asset_not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "ASSET_NOT_FOUND", message)
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL",
            "Unexpected server error.",
        )
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidHash(_) => Self::invalid_hash(),
            RegistryError::Validation(message) => Self::invalid_body(message),
            RegistryError::NotFound(message) => Self::asset_not_found(message),
            RegistryError::FileNotFound(_) => Self::new(
                StatusCode::NOT_FOUND,
                "FILE_NOT_FOUND",
                "Underlying file not found on disk.",
            ),
            RegistryError::HashMismatch => Self::new(
                StatusCode::BAD_REQUEST,
                "HASH_MISMATCH",
                "Uploaded file hash does not match provided hash.",
            ),
            RegistryError::Conflict(message) => {
                Self::new(StatusCode::CONFLICT, "BAD_REQUEST", message)
            }
            RegistryError::DependencyMissing(message) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "DEPENDENCY_MISSING",
                message,
            ),
            RegistryError::Database(e) => {
                error!("database error: {e}");
                Self::internal()
            }
            RegistryError::Io(e) => {
                error!("io error: {e}");
                Self::internal()
            }
            RegistryError::Json(e) => {
                error!("json error: {e}");
                Self::internal()
            }
            RegistryError::Internal(message) => {
                error!("internal error: {message}");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "details": self.details,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
