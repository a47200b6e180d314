//! Bearer-token middleware, layered on top of the listener's own mTLS
//! client-certificate check (spec.md §6: "bearer token on top of mTLS").

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::credentials::CredentialStore;
use crate::error::AgentError;

pub async fn require_bearer_token(
    State(credentials): State<Arc<CredentialStore>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AgentError> {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let expected = credentials.get_token();
    match presented {
        Some(token) if !expected.is_empty() && token == expected => Ok(next.run(request).await),
        _ => Err(AgentError::Unauthorized("missing or invalid bearer token".into())),
    }
}
