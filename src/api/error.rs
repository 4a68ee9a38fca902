//! API error types
//!
//! Maps domain errors onto HTTP responses with appropriate status codes.
//! Every response body carries a stable machine code and a request id for
//! correlating with the server log.

use crate::catalog::CatalogError;
use crate::engine::ComputeError;
use crate::model::ValidationError;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation failed (malformed field, unknown enum value)
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Domain validation rejected the payload
    #[error(transparent)]
    Domain(#[from] ValidationError),

    /// Persistence layer error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A manually requested collection produced an error snapshot
    #[error("collection failed: {0}")]
    Collection(String),

    /// Metric computation failed
    #[error(transparent)]
    Compute(#[from] ComputeError),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(e) => ApiError::Domain(e),
            CatalogError::Store(e) => ApiError::Store(e),
        }
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
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Domain(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Store(e) => match e {
                StoreError::DefinitionNotFound(_) => (StatusCode::NOT_FOUND, "METRIC_NOT_FOUND"),
                StoreError::ConfigurationNotFound(_) => {
                    (StatusCode::NOT_FOUND, "CONFIGURATION_NOT_FOUND")
                }
                StoreError::DuplicateCode(_) => (StatusCode::CONFLICT, "DUPLICATE_CODE"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            },
            ApiError::Collection(_) => (StatusCode::UNPROCESSABLE_ENTITY, "COLLECTION_FAILED"),
            ApiError::Compute(e) => match e {
                ComputeError::Store(StoreError::DefinitionNotFound(_)) => {
                    (StatusCode::NOT_FOUND, "METRIC_NOT_FOUND")
                }
                _ => (StatusCode::UNPROCESSABLE_ENTITY, "COMPUTE_ERROR"),
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };

        let request_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            request_id = %request_id,
            error_code = %code,
            error_message = %self,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
