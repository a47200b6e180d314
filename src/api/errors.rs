//! API client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("server rejected the call ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl ApiError {
    /// Only transport errors are retryable; spec.md §4.E explicitly forbids
    /// retrying on HTTP-level status codes (divergence from the teacher's
    /// broader exponential-backoff-on-5xx policy).
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Request(e) => e.is_connect() || e.is_timeout(),
            ApiError::Timeout => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Request(e) => e.status().map(|s| s.as_u16()),
            ApiError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
