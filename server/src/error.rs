//! API error types for HTTP clients
//!
//! Provides structured errors that serialize to `{"code": "...", "message": "..."}`.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors returned by the job routes
///
/// Each variant serializes with a snake_case `code` field for client matching.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ApiError {
    JobNotFound { message: String, document_id: String },
    InvalidRequest { message: String },
    StorageError { message: String },
    InternalError { message: String },
}

impl ApiError {
    pub fn job_not_found(document_id: impl Into<String>) -> Self {
        let document_id = document_id.into();
        Self::JobNotFound {
            message: format!("No job for document: {}", document_id),
            document_id,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::JobNotFound { message, .. }
            | Self::InvalidRequest { message }
            | Self::StorageError { message }
            | Self::InternalError { message } => message,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::JobNotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::StorageError { .. } | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl From<folio_core::Error> for ApiError {
    fn from(err: folio_core::Error) -> Self {
        use folio_core::Error;
        let message = err.to_string();
        match err {
            Error::InvalidRequest(_) => Self::InvalidRequest { message },
            Error::Persistence(_) | Error::Storage(_) => Self::StorageError { message },
            _ => Self::InternalError { message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (self.status_code(), Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
