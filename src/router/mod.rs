//! Inbound HTTPS surface (spec.md §6): the routes the control plane calls
//! against this agent over mTLS, layered with bearer-token middleware.
//!
//! Grounded in the teacher's `router::build_router` (axum `Router` plus
//! `tower_http::trace::TraceLayer`/`cors::CorsLayer`); route handlers are new
//! (the teacher's were Wings' server-management endpoints) but the
//! build-router shape, state-sharing via `Arc`, and middleware stacking
//! follow it directly.

mod handlers;
mod middleware;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::ContainerCache;
use crate::credentials::CredentialStore;
use crate::pipeline::Pipeline;
use crate::runtime::RuntimeAdapter;

#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<CredentialStore>,
    pub cache: Arc<ContainerCache>,
    pub pipeline: Pipeline,
    pub runtime: Arc<dyn RuntimeAdapter>,
    pub request_timeout: std::time::Duration,
}

/// Builds the full router: every route under `/api/v1`, gated by the bearer
/// token middleware (mTLS itself is enforced at the listener, per
/// `credentials::CredentialStore::get_server_tls`).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/container/:id", get(handlers::get_container))
        .route("/api/v1/container/list", post(handlers::query_containers))
        .route("/api/v1/container/:id/logs", get(handlers::container_logs))
        .route("/api/v1/container/:id/stats", get(handlers::container_stats))
        .route("/api/v1/container", post(handlers::create_container))
        .route("/api/v1/container/:id", delete(handlers::delete_container))
        .route("/api/v1/container/:id/start", post(handlers::start_container))
        .route("/api/v1/container/:id/stop", post(handlers::stop_container))
        .route("/api/v1/container/:id/restart", post(handlers::restart_container))
        .route("/api/v1/network", post(handlers::create_network))
        .route("/api/v1/network/:name", delete(handlers::delete_network))
        .route("/api/v1/faq", get(handlers::faq))
        .layer(from_fn_with_state(state.credentials.clone(), middleware::require_bearer_token))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
