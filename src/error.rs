//! Closed error taxonomy for the agent
//!
//! Every fallible operation in the core subsystems ultimately converts into
//! one of these variants at its API boundary, the same way the teacher's
//! `DaemonError` wraps `EnvironmentError` via `#[from]`. Each variant carries
//! a stable `code()` used both on the HTTP surface and in log output.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    #[error("credential bundle invalid: {0}")]
    CredentialBundleInvalid(String),

    #[error("runtime unreachable: {0}")]
    RuntimeUnreachable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("registry auth invalid: {0}")]
    AuthInvalid(String),

    #[error("log line cap exceeded")]
    LogOverflow,

    #[error("no free port in configured range")]
    NoFreePort,

    #[error("no non-virtual IPv4 address found")]
    NoAddress,

    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("already scheduled: {0}")]
    AlreadyScheduled(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable code per the closed taxonomy of SPEC_FULL.md §7.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::ConfigInvalid(_) => "SYS90001",
            AgentError::BootstrapFailed(_) => "SYS90002",
            AgentError::CredentialBundleInvalid(_) => "SYS90003",
            AgentError::RuntimeUnreachable(_) => "SYS90004",
            AgentError::Timeout(_) => "SYS90005",
            AgentError::NoAddress => "SYS90006",
            AgentError::RegistrationRejected(_) => "SYS90007",
            AgentError::NotFound(_) => "CNT10001",
            AgentError::Conflict(_) => "CNT10002",
            AgentError::LogOverflow => "CNT10003",
            AgentError::AuthInvalid(_) => "IMG10001",
            AgentError::NoFreePort => "NET10001",
            AgentError::AlreadyScheduled(_) => "SYS90008",
            AgentError::Unauthorized(_) => "SYS90009",
            AgentError::Internal(_) => "SYS90099",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Conflict(_) => StatusCode::CONFLICT,
            AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AgentError::AuthInvalid(_) | AgentError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            AgentError::RuntimeUnreachable(_) => StatusCode::BAD_GATEWAY,
            AgentError::AlreadyScheduled(_) => StatusCode::CONFLICT,
            AgentError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<crate::runtime::RuntimeError> for AgentError {
    fn from(e: crate::runtime::RuntimeError) -> Self {
        use crate::runtime::RuntimeError as R;
        match e {
            R::NotFound(m) => AgentError::NotFound(m),
            R::Conflict(m) => AgentError::Conflict(m),
            R::Timeout => AgentError::Timeout("runtime adapter call".into()),
            R::LogOverflow => AgentError::LogOverflow,
            R::AuthInvalid(m) => AgentError::AuthInvalid(m),
            R::NoFreePort => AgentError::NoFreePort,
            R::Docker(e) => AgentError::RuntimeUnreachable(e.to_string()),
            R::Other(m) => AgentError::Internal(m),
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "statusCode": status.as_u16(),
            "code": self.code(),
            "errMsg": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AgentError::NotFound("x".into()).code(), "CNT10001");
        assert_eq!(AgentError::NoFreePort.code(), "NET10001");
        assert_eq!(AgentError::AuthInvalid("x".into()).code(), "IMG10001");
    }
}
