//! Shared constants for structured API errors and runtime error semantics.

use std::fmt;

pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_TYPE_SERVER: &str = "server_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";

pub const ERROR_CODE_RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
pub const ERROR_CODE_MODEL_NOT_FOUND: &str = "model_not_found";
pub const ERROR_CODE_BACKEND_UNAVAILABLE: &str = "backend_unavailable";

pub const ERROR_CATEGORY_BACKEND_4XX: &str = "backend_4xx";
pub const ERROR_CATEGORY_BACKEND_5XX: &str = "backend_5xx";
pub const ERROR_CATEGORY_CONNECT_ERROR: &str = "connect_error";
pub const ERROR_CATEGORY_STREAM_ERROR: &str = "stream_error";
pub const ERROR_CATEGORY_INTERNAL_ERROR: &str = "internal_error";

/// Coarse classification used as a metric label for failed exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategoryCode {
    Backend4xx,
    Backend5xx,
    ConnectError,
    StreamError,
    InternalError,
}

impl ErrorCategoryCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Backend4xx => ERROR_CATEGORY_BACKEND_4XX,
            Self::Backend5xx => ERROR_CATEGORY_BACKEND_5XX,
            Self::ConnectError => ERROR_CATEGORY_CONNECT_ERROR,
            Self::StreamError => ERROR_CATEGORY_STREAM_ERROR,
            Self::InternalError => ERROR_CATEGORY_INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for ErrorCategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
