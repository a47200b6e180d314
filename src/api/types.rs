//! Wire types for control-plane API calls.

use serde::{Deserialize, Serialize};

use crate::host::NodeIdentity;
use crate::runtime::{EngineInfo, EngineVersion};
use crate::types::container::ContainerRecord;

/// `POST /api/register` body.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub host_ips: Vec<String>,
    pub token: String,
}

/// `POST /api/register` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
    pub token: String,
    pub expire_at: i64,
}

/// `POST /api/health` body, assembled from the Host Prober, Runtime Adapter's
/// engine metadata, and the Container Cache's snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HostHealthRequest {
    pub host: NodeIdentity,
    pub docker_engine: DockerEngineInfo,
    pub containers: Vec<ContainerRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DockerEngineInfo {
    pub info: EngineInfo,
    pub version: EngineVersion,
}

/// `POST /api/health` reply. `token`, when present and non-empty, rotates
/// the Credential Store's bearer token.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HostHealthResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /api/config/<name>` reply: a config blob to be materialized as a
/// bind-mount source per spec.md's volume-templating rule.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigBlobResponse {
    pub content: String,
}
