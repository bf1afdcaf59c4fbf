//! API Error Types
//!
//! Defines error types for the API layer and implements conversion
//! to HTTP responses with appropriate status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::storage::StorageError;
use crate::timeserie::{FieldErrors, IngestError, QueryError};

/// Message returned when a bulk write hits a uniqueness conflict
pub const CONFLICT_MESSAGE: &str = "Objects can not be created.";

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation failed, with per-field messages
    #[error("Validation error: {0}")]
    Validation(FieldErrors),

    /// Malformed request that is not tied to a field
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Page number past the last page
    #[error("Invalid page.")]
    InvalidPage,

    /// Bulk write rejected by a uniqueness constraint
    #[error("{}", CONFLICT_MESSAGE)]
    Conflict,

    /// Missing or invalid bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Valid token without the required role
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(fields) => ApiError::Validation(fields),
            IngestError::Storage(e) if e.is_conflict() => ApiError::Conflict,
            IngestError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Validation(fields) => ApiError::Validation(fields),
            QueryError::InvalidPage => ApiError::InvalidPage,
            QueryError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(fields: FieldErrors) -> Self {
        ApiError::Validation(fields)
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeMap<String, String>>,
}

/// Body of a rejected bulk write
#[derive(Serialize)]
pub struct FailResponse {
    pub status: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Conflict = self {
            tracing::warn!("Bulk write rejected by uniqueness conflict");
            let body = FailResponse {
                status: "fail".to_string(),
                message: CONFLICT_MESSAGE.to_string(),
            };
            return (StatusCode::FORBIDDEN, Json(body)).into_response();
        }

        let (status, code) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::InvalidPage => (StatusCode::NOT_FOUND, "INVALID_PAGE"),
            ApiError::Conflict => (StatusCode::FORBIDDEN, "CONFLICT"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED"),
            ApiError::Storage(e) => match e {
                StorageError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                StorageError::Conflict(_) => (StatusCode::BAD_REQUEST, "CONFLICT"),
                StorageError::InvalidInterval(_) => (StatusCode::BAD_REQUEST, "INVALID_INTERVAL"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };

        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Request rejected"
            );
        }

        let (message, fields) = match self {
            ApiError::Validation(fields) => (
                "Validation error".to_string(),
                Some(fields.into_inner()),
            ),
            ApiError::InvalidPage => ("Invalid page.".to_string(), None),
            ApiError::Storage(StorageError::NotFound { entity, key }) => {
                (format!("{} not found: {}", entity, key), None)
            }
            ApiError::Internal(message) => (message, None),
            other => (other.to_string(), None),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                fields,
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
