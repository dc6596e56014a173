//! Error types and handling for the gateway.
//!
//! This module provides a unified error type [`AppError`] that wraps various error sources
//! and implements proper HTTP response conversion. The same JSON error body is reused for
//! the error chunk emitted by the streaming relay.

use crate::core::error_types::{
    ErrorCategoryCode, ERROR_CODE_BACKEND_UNAVAILABLE, ERROR_CODE_MODEL_NOT_FOUND,
    ERROR_CODE_RATE_LIMIT_EXCEEDED, ERROR_TYPE_API, ERROR_TYPE_AUTHENTICATION,
    ERROR_TYPE_INVALID_REQUEST, ERROR_TYPE_RATE_LIMIT, ERROR_TYPE_SERVER,
};
use crate::core::rate_limiter::Ceiling;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for the application.
///
/// All errors in the application should be converted to this type for consistent handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (file not found, parse errors, etc.)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Durable store failures
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Client provided invalid data
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A usage ceiling was reached; `retry_after` is in seconds
    #[error("{message}")]
    RateLimitExceeded {
        ceiling: Ceiling,
        message: String,
        retry_after: Option<u64>,
    },

    /// Backend could not be reached or did not answer in time
    #[error("{0}")]
    BackendUnavailable(String),

    /// Backend does not know the requested model
    #[error("Model '{0}' not found")]
    BackendModelNotFound(String),

    /// Backend rejected the translated request
    #[error("{0}")]
    BackendBadRequest(String),

    /// Backend answered with a 5xx status
    #[error("{0}")]
    BackendServerError(String),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::BackendBadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) | AppError::BackendModelNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BackendServerError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => ERROR_TYPE_AUTHENTICATION,
            AppError::BadRequest(_)
            | AppError::NotFound(_)
            | AppError::Conflict(_)
            | AppError::BackendModelNotFound(_)
            | AppError::BackendBadRequest(_) => ERROR_TYPE_INVALID_REQUEST,
            AppError::RateLimitExceeded { .. } => ERROR_TYPE_RATE_LIMIT,
            AppError::BackendUnavailable(_) | AppError::BackendServerError(_) => {
                ERROR_TYPE_SERVER
            }
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => ERROR_TYPE_API,
        }
    }

    fn param(&self) -> Option<&str> {
        match self {
            AppError::BackendModelNotFound(_) => Some("model"),
            AppError::RateLimitExceeded { ceiling, .. } => Some(ceiling.as_str()),
            _ => None,
        }
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Config(_)
                | AppError::Database(_)
                | AppError::Serialization(_)
                | AppError::Internal(_)
        )
    }

    /// Message that is safe to show to the caller.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn category(&self) -> ErrorCategoryCode {
        match self {
            AppError::BackendUnavailable(_) => ErrorCategoryCode::ConnectError,
            AppError::BackendServerError(_) => ErrorCategoryCode::Backend5xx,
            AppError::BackendModelNotFound(_) | AppError::BackendBadRequest(_) => {
                ErrorCategoryCode::Backend4xx
            }
            _ => ErrorCategoryCode::InternalError,
        }
    }

    /// Build the `{"error": {...}}` payload used for responses and stream error chunks.
    pub fn to_error_body(&self) -> Value {
        let mut error = json!({
            "message": self.public_message(),
            "type": self.error_type(),
        });

        let code = match self {
            AppError::RateLimitExceeded { .. } => json!(ERROR_CODE_RATE_LIMIT_EXCEEDED),
            AppError::BackendModelNotFound(_) => json!(ERROR_CODE_MODEL_NOT_FOUND),
            AppError::BackendUnavailable(_) => json!(ERROR_CODE_BACKEND_UNAVAILABLE),
            _ => json!(self.status_code().as_u16()),
        };
        error["code"] = code;

        if let Some(param) = self.param() {
            error["param"] = json!(param);
        }
        if let AppError::RateLimitExceeded { retry_after, .. } = self {
            error["retry_after"] = json!(retry_after);
        }

        json!({ "error": error })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.is_internal() {
            tracing::error!(error = %self, "Request failed with internal error");
        }

        let status = self.status_code();
        let body = self.to_error_body();
        let mut response = (status, Json(body)).into_response();

        match &self {
            AppError::Unauthorized(_) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            AppError::RateLimitExceeded {
                retry_after: Some(secs),
                ..
            } => {
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            _ => {}
        }

        response
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;
