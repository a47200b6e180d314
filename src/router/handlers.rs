//! Route handlers for the inbound HTTPS surface.
//!
//! Every mutating route enqueues onto the [`crate::pipeline::Pipeline`] and
//! returns `202 Accepted` immediately (spec.md §6); the actual engine call
//! happens on the pipeline worker. Read routes go straight to the
//! Container Cache or Runtime Adapter.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::runtime::LogOptions;
use crate::types::container::ContainerRecord;
use crate::types::task::{
    ContainerCreateRequest, ContainerDeleteRequest, ContainerIdRequest, ContainerStopRequest,
    NetworkCreateRequest, NetworkDeleteRequest, PendingTask, QueryContainerRequest,
};

use super::AppState;

/// Body every `202 Accepted` mutating route replies with (spec.md §6).
fn accepted() -> (StatusCode, Json<Value>) {
    (StatusCode::ACCEPTED, Json(json!({"msg": "accepted"})))
}

#[derive(Debug, Serialize)]
pub struct FaqResponse {
    api_version: &'static str,
    timestamp: i64,
}

/// `GET /api/v1/faq` (spec.md §6): lets the control plane confirm the agent
/// is reachable and learn its build version.
pub async fn faq() -> Json<FaqResponse> {
    Json(FaqResponse { api_version: env!("CARGO_PKG_VERSION"), timestamp: chrono::Utc::now().timestamp() })
}

/// `POST /api/v1/container/list` (spec.md §6): filters the Container
/// Cache's snapshot by an optional name substring and/or label subset.
pub async fn query_containers(
    State(state): State<AppState>,
    Json(req): Json<QueryContainerRequest>,
) -> Json<Vec<ContainerRecord>> {
    let matches = state
        .cache
        .snapshot()
        .into_iter()
        .filter(|record| {
            let name_matches = req.name.as_ref().map(|n| record.name.contains(n.as_str())).unwrap_or(true);
            let labels_match = req.labels.iter().all(|(k, v)| record.labels.get(k) == Some(v));
            name_matches && labels_match
        })
        .collect();
    Json(matches)
}

pub async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContainerRecord>> {
    state
        .cache
        .get(&id)
        .map(Json)
        .ok_or_else(|| AgentError::NotFound(id))
}

pub async fn container_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<String>>> {
    let opts = LogOptions {
        tail: params.get("tail").and_then(|v| v.parse().ok()),
        since: params.get("since").and_then(|v| v.parse().ok()),
        until: params.get("until").and_then(|v| v.parse().ok()),
        timestamps: params.get("timestamps").map(|v| v == "true").unwrap_or(false),
    };
    let lines = state.runtime.read_logs(&id, opts, state.request_timeout).await?;
    Ok(Json(lines))
}

pub async fn container_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::runtime::StatsSnapshot>> {
    let snapshot = state.runtime.read_stats_snapshot(&id, state.request_timeout).await?;
    Ok(Json(snapshot))
}

pub async fn create_container(
    State(state): State<AppState>,
    Json(req): Json<ContainerCreateRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    state.pipeline.enqueue(PendingTask::ContainerCreate(req)).await?;
    Ok(accepted())
}

pub async fn delete_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>)> {
    let force = params.get("force").map(|v| v == "true").unwrap_or(false);
    let container_name = params.get("containerName").cloned();
    let req = ContainerDeleteRequest { container_id: id, force, container_name };
    state.pipeline.enqueue(PendingTask::ContainerDelete(req)).await?;
    Ok(accepted())
}

pub async fn start_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>)> {
    state
        .pipeline
        .enqueue(PendingTask::ContainerStart(ContainerIdRequest { container_id: id }))
        .await?;
    Ok(accepted())
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>)> {
    let timeout_secs = params.get("timeoutSecs").and_then(|v| v.parse().ok());
    let req = ContainerStopRequest { container_id: id, timeout_secs };
    state.pipeline.enqueue(PendingTask::ContainerStop(req)).await?;
    Ok(accepted())
}

pub async fn restart_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>)> {
    state
        .pipeline
        .enqueue(PendingTask::ContainerRestart(ContainerIdRequest { container_id: id }))
        .await?;
    Ok(accepted())
}

pub async fn create_network(
    State(state): State<AppState>,
    Json(req): Json<NetworkCreateRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    state.pipeline.enqueue(PendingTask::NetworkCreate(req)).await?;
    Ok(accepted())
}

pub async fn delete_network(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<Value>)> {
    state
        .pipeline
        .enqueue(PendingTask::NetworkDelete(NetworkDeleteRequest { name }))
        .await?;
    Ok(accepted())
}
