//! Service errors and their HTTP mapping.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pluck::PluckError;

/// Stable error codes carried in every error body.
pub mod error_codes {
    pub const INVALID_INPUT: &str = "E_INVALID_INPUT";
    pub const FETCH_TIMEOUT: &str = "E_FETCH_TIMEOUT";
    pub const FETCH_FAILED: &str = "E_FETCH_FAILED";
    pub const UNAUTHORIZED: &str = "E_UNAUTHORIZED";
    pub const NOT_FOUND: &str = "E_NOT_FOUND";
    pub const RATE_LIMITED: &str = "E_RATE_LIMITED";
    pub const INTERNAL: &str = "E_INTERNAL";
}

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Input(String),

    #[error("Fetch timed out after {0}ms")]
    FetchTimeout(u64),

    /// Upstream returned a non-success status.
    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        use error_codes::*;
        match self {
            Self::Input(_) => INVALID_INPUT,
            Self::FetchTimeout(_) => FETCH_TIMEOUT,
            Self::UpstreamStatus(_) | Self::Fetch(_) => FETCH_FAILED,
            Self::Unauthorized(_) => UNAUTHORIZED,
            Self::NotFound(_) => NOT_FOUND,
            Self::RateLimited { .. } => RATE_LIMITED,
            Self::Internal(_) => INTERNAL,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Input(_) => StatusCode::BAD_REQUEST,
            Self::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamStatus(_) | Self::Fetch(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<PluckError> for ServiceError {
    fn from(e: PluckError) -> Self {
        match e {
            PluckError::MappingNotFound(_) => Self::NotFound(e.to_string()),
            e if e.is_input_error() => Self::Input(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("worker task failed: {e}"))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(code = self.code(), "{self}");
        }
        let mut response = (self.status(), Json(self.to_json())).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
