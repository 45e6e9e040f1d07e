//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::ServiceError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Validation(Vec<String>),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, violations) = match self {
            ApiError::Validation(violations) => (
                StatusCode::BAD_REQUEST,
                "Validation failed".to_string(),
                Some(violations),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::BadGateway(msg) => {
                tracing::warn!("Provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg, None)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = match violations {
            Some(violations) => serde_json::json!({ "error": message, "violations": violations }),
            None => serde_json::json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(violations) => ApiError::Validation(violations),
            ServiceError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::Provider(err) => ApiError::BadGateway(err.to_string()),
            ServiceError::Storage(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
