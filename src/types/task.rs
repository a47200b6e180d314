//! Job Task and Pending Task entities.

use serde::{Deserialize, Serialize};

/// A cron-enrolled container, derived at admission time from its labels.
///
/// Created when a container carrying a non-empty `JOB_RULES` label enters the
/// local cache; destroyed when that container is destroyed; re-admitted on
/// recreation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTask {
    pub container_id: String,
    pub container_name: String,
    pub image: String,
    pub always_pull: bool,
    pub timeout_secs: u64,
    pub rule_string: String,
    pub registry_auth_blob: Option<String>,
}

/// A decoded request waiting on the in-memory dispatch queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum PendingTask {
    ContainerCreate(ContainerCreateRequest),
    ContainerDelete(ContainerDeleteRequest),
    ContainerStart(ContainerIdRequest),
    ContainerStop(ContainerStopRequest),
    ContainerRestart(ContainerIdRequest),
    NetworkCreate(NetworkCreateRequest),
    NetworkDelete(NetworkDeleteRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCreateRequest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub labels: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<crate::types::container::MountEntry>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub network_mode: Option<String>,
    /// Requested host ports. A `host_port` of `0` triggers the §6 ephemeral
    /// allocation path rather than being passed to the engine literally.
    #[serde(default)]
    pub ports: Vec<RequestedPort>,
    #[serde(default)]
    pub always_pull: bool,
    pub registry_auth_blob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestedPort {
    pub container_port: u16,
    #[serde(default)]
    pub host_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDeleteRequest {
    pub container_id: String,
    #[serde(default)]
    pub force: bool,
    /// Carried from the `?containerName=` query param so the pipeline can
    /// pre-file the Failure Placeholder delete (spec.md §4.K) even when the
    /// id alone no longer resolves to a cached record.
    #[serde(default)]
    pub container_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerIdRequest {
    pub container_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStopRequest {
    pub container_id: String,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkCreateRequest {
    pub name: String,
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDeleteRequest {
    pub name: String,
}

/// `POST /api/v1/container/list` body (spec.md §6): an optional name
/// substring and/or label-subset filter over the Container Cache's
/// snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContainerRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: std::collections::HashMap<String, String>,
}
