//! Control-plane API client module
//!
//! Provides an HTTP client for the register/health/config-blob endpoints,
//! with retry limited to transport-level failures and exponential backoff.

mod client;
mod errors;
mod types;

pub use client::HttpClient;
pub use errors::{ApiError, ApiResult};
pub use types::*;
