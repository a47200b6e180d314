//! Runtime Adapter error type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("deadline elapsed")]
    Timeout,

    #[error("log line cap exceeded")]
    LogOverflow,

    #[error("registry auth invalid: {0}")]
    AuthInvalid(String),

    #[error("no free port in configured range")]
    NoFreePort,

    #[error("docker error: {0}")]
    Docker(bollard::errors::Error),

    #[error("{0}")]
    Other(String),
}
