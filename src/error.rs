//! Application error handling with HTTP response conversion
//!
//! Provides a unified error type that can be converted to HTTP responses
//! with appropriate status codes and JSON error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::content::ContentError;
use crate::mappings::ConfigStoreError;
use crate::validation::ValidationError;

/// Application-level errors with HTTP response conversion
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("content store error: {0}")]
    Content(#[from] ContentError),

    #[error("config store error: {0}")]
    Config(#[from] ConfigStoreError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// JSON error response body, shaped like the OCI distribution spec's
/// `{"errors": [{"code": ..., "message": ...}]}` envelope.
#[derive(Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorEntry>,
}

#[derive(Serialize)]
struct ErrorEntry {
    code: &'static str,
    message: String,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::MethodNotAllowed(_) => "UNSUPPORTED",
            AppError::DigestMismatch { .. } => "DIGEST_INVALID",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Content(e) => e.code(),
            AppError::Config(e) => e.code(),
            AppError::Validation(_) => "NAME_INVALID",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::DigestMismatch { .. } => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Content(e) => e.status(),
            AppError::Config(e) => e.status(),
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 5xx messages wrap internal details (I/O errors, paths, OS error
        // text) that must never reach the client; the real message only
        // goes to the log.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            errors: vec![ErrorEntry {
                code: self.code(),
                message,
            }],
        };

        (status, Json(body)).into_response()
    }
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
