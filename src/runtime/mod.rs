//! Runtime Adapter: the agent's sole point of contact with the container engine.

mod bollard_adapter;
mod error;
pub mod mock;
pub mod ports;

pub use bollard_adapter::BollardRuntime;
pub use error::RuntimeError;
pub use mock::MockRuntime;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::container::{ContainerRecord, MountEntry};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A decoded `user^^pass^^serverAddress` registry auth blob.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: String,
}

/// Desired-state spec for a container creation call.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub mounts: Vec<MountEntry>,
    pub command: Vec<String>,
    pub network_mode: Option<String>,
    pub port_bindings: HashMap<u16, Option<u16>>,
}

/// One raw event from the engine's event stream.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub typ: String,
    pub action: String,
    pub actor_id: String,
    pub actor_attrs: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatsSnapshot {
    pub cpu_usage_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub tail: Option<u32>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub timestamps: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineInfo {
    pub containers_running: i64,
    pub containers_total: i64,
    pub images: i64,
    pub server_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineVersion {
    pub version: String,
    pub api_version: String,
    pub kernel_version: String,
}

/// Filters passed to `listContainers` — currently only a subset is needed.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub all: bool,
}

/// Abstracts the container engine so the reconciler and executor can be
/// exercised against a fake in tests, without a live daemon.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn inspect_container(&self, id: &str, deadline: Duration) -> RuntimeResult<ContainerRecord>;
    async fn list_containers(&self, filter: ListFilter, deadline: Duration) -> RuntimeResult<Vec<ContainerRecord>>;
    async fn create_container(&self, spec: &ContainerSpec, deadline: Duration) -> RuntimeResult<String>;
    async fn start_container(&self, id: &str, deadline: Duration) -> RuntimeResult<()>;
    async fn stop_container(&self, id: &str, signal: &str, grace: Duration, deadline: Duration) -> RuntimeResult<()>;
    async fn restart_container(&self, id: &str, deadline: Duration) -> RuntimeResult<()>;
    /// Blocks until `id` leaves the running state. No deadline of its own —
    /// the Job Executor wraps this in its own timeout (spec.md §4.J step 8)
    /// so a slow engine call cannot starve the surrounding tick procedure.
    async fn wait_not_running(&self, id: &str) -> RuntimeResult<()>;
    async fn remove_container(&self, id: &str, force: bool, deadline: Duration) -> RuntimeResult<()>;
    async fn rename_container(&self, id: &str, new_name: &str, deadline: Duration) -> RuntimeResult<()>;
    async fn pull_image(&self, reference: &str, auth: Option<RegistryAuth>, deadline: Duration) -> RuntimeResult<()>;
    async fn inspect_image(&self, reference: &str, deadline: Duration) -> RuntimeResult<Option<String>>;
    async fn create_network(&self, name: &str, driver: &str, deadline: Duration) -> RuntimeResult<String>;
    async fn inspect_network(&self, reference: &str, deadline: Duration) -> RuntimeResult<()>;
    async fn remove_network(&self, id: &str, deadline: Duration) -> RuntimeResult<()>;
    fn subscribe_events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>>;
    async fn read_stats_snapshot(&self, id: &str, deadline: Duration) -> RuntimeResult<StatsSnapshot>;
    async fn read_logs(&self, id: &str, opts: LogOptions, deadline: Duration) -> RuntimeResult<Vec<String>>;
    async fn engine_info(&self, deadline: Duration) -> RuntimeResult<EngineInfo>;
    async fn engine_version(&self, deadline: Duration) -> RuntimeResult<EngineVersion>;
}

/// Parses a base64 `user^^pass^^serverAddress` registry auth blob.
pub fn decode_registry_auth(blob: &str) -> RuntimeResult<RegistryAuth> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(blob)
        .map_err(|e| RuntimeError::AuthInvalid(format!("invalid base64: {e}")))?;
    let text = String::from_utf8(raw)
        .map_err(|e| RuntimeError::AuthInvalid(format!("invalid utf8: {e}")))?;
    let parts: Vec<&str> = text.split("^^").collect();
    if parts.len() != 3 {
        return Err(RuntimeError::AuthInvalid(
            "expected user^^pass^^serverAddress".into(),
        ));
    }
    Ok(RegistryAuth {
        username: parts[0].to_string(),
        password: parts[1].to_string(),
        server_address: parts[2].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_valid_auth_blob() {
        use base64::Engine;
        let blob = base64::engine::general_purpose::STANDARD.encode("alice^^hunter2^^registry.example.com");
        let auth = decode_registry_auth(&blob).unwrap();
        assert_eq!(auth.username, "alice");
        assert_eq!(auth.password, "hunter2");
        assert_eq!(auth.server_address, "registry.example.com");
    }

    #[test]
    fn rejects_malformed_blob() {
        use base64::Engine;
        let blob = base64::engine::general_purpose::STANDARD.encode("not-the-right-shape");
        assert!(decode_registry_auth(&blob).is_err());
    }
}
