//! Container Record, Failure Placeholder and the closed state-mapping taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical orchestrator-facing container state.
///
/// Derived from the runtime's raw status string via [`MappedState::from_raw`].
/// Unknown raw states are logged by the caller and mapped to `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MappedState {
    Running,
    Failed,
    Starting,
    Created,
    Exited,
    Removed,
    Warning,
    Pending,
}

impl MappedState {
    /// Maps a runtime's raw status string onto the closed taxonomy.
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "healthy" | "running" => MappedState::Running,
            "unhealthy" => MappedState::Failed,
            "starting" | "restarting" => MappedState::Starting,
            "created" => MappedState::Created,
            "exited" | "stopped" => MappedState::Exited,
            "destroy" | "remove" | "removing" | "delete" => MappedState::Removed,
            "paused" => MappedState::Warning,
            "pending" => MappedState::Pending,
            other => {
                tracing::warn!(raw = other, "unrecognized container state, mapping to Warning");
                MappedState::Warning
            }
        }
    }
}

/// Source/destination pair for a bind mount or named volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountEntry {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Per-network attachment: IP, gateway, and the engine's endpoint id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    pub network_name: String,
    pub ip_address: String,
    pub gateway: String,
    pub endpoint_id: String,
}

/// A single published port mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: String,
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
}

/// One container known locally, keyed by the runtime's container id.
///
/// `restart_count` and `network_mode` are carried alongside the fields named
/// directly by spec.md §3 because the engine inspect call already returns
/// them and the heartbeat payload serializes the full record regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    /// Human name with the engine's leading `/` stripped.
    pub name: String,
    pub state: MappedState,
    pub status: String,
    pub image: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    #[serde(default)]
    pub networks: Vec<NetworkEndpoint>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_msg: Option<String>,
    #[serde(default)]
    pub restart_count: Option<i64>,
    #[serde(default)]
    pub network_mode: Option<String>,
}

impl ContainerRecord {
    /// Overlays a [`FailurePlaceholder`] carrying the same name onto this
    /// record, per spec.md §3's overlay invariant.
    pub fn overlay_failure(&mut self, placeholder: &FailurePlaceholder) {
        self.state = MappedState::Failed;
        self.error_msg = Some(placeholder.error_msg.clone());
    }

    /// Reconstructs a creation spec from this record's own fields, under
    /// `name` — used by the Job Executor's always-pull recreate path
    /// (spec.md §4.J step 6) to recreate "the same config, host config and
    /// network endpoints" from what the last inspect actually captured.
    pub fn to_spec(&self, name: &str) -> crate::runtime::ContainerSpec {
        let port_bindings = self
            .ports
            .iter()
            .map(|p| (p.container_port, p.host_port))
            .collect();

        crate::runtime::ContainerSpec {
            name: name.to_string(),
            image: self.image.clone(),
            labels: self.labels.clone(),
            env: self.env.clone(),
            mounts: self.mounts.clone(),
            command: self.command.clone(),
            network_mode: self.network_mode.clone(),
            port_bindings,
        }
    }
}

/// A synthetic Container Record for a creation that never produced an
/// engine-side object: no id, keyed by the intended container name.
///
/// Purged from the Container Cache once a Delete is signaled for its name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePlaceholder {
    pub name: String,
    pub error_msg: String,
    pub created_at: DateTime<Utc>,
}

impl FailurePlaceholder {
    pub fn new(name: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_msg: error_msg.into(),
            created_at: Utc::now(),
        }
    }

    /// Builds the synthetic, id-less `ContainerRecord` the control plane
    /// sees for a creation that never produced an engine-side object
    /// (spec.md §3): no real record exists to overlay onto, so the
    /// placeholder itself must surface in the heartbeat snapshot.
    pub fn as_record(&self) -> ContainerRecord {
        ContainerRecord {
            id: String::new(),
            name: self.name.clone(),
            state: MappedState::Failed,
            status: "Failed".to_string(),
            image: String::new(),
            labels: HashMap::new(),
            env: vec![],
            mounts: vec![],
            command: vec![],
            ports: vec![],
            networks: vec![],
            created_at: Some(self.created_at),
            started_at: None,
            finished_at: None,
            error_msg: Some(self.error_msg.clone()),
            restart_count: None,
            network_mode: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_closed_taxonomy() {
        assert_eq!(MappedState::from_raw("healthy"), MappedState::Running);
        assert_eq!(MappedState::from_raw("running"), MappedState::Running);
        assert_eq!(MappedState::from_raw("unhealthy"), MappedState::Failed);
        assert_eq!(MappedState::from_raw("starting"), MappedState::Starting);
        assert_eq!(MappedState::from_raw("restarting"), MappedState::Starting);
        assert_eq!(MappedState::from_raw("created"), MappedState::Created);
        assert_eq!(MappedState::from_raw("exited"), MappedState::Exited);
        assert_eq!(MappedState::from_raw("stopped"), MappedState::Exited);
        assert_eq!(MappedState::from_raw("removing"), MappedState::Removed);
        assert_eq!(MappedState::from_raw("paused"), MappedState::Warning);
        assert_eq!(MappedState::from_raw("pending"), MappedState::Pending);
    }

    #[test]
    fn unknown_raw_state_maps_to_warning() {
        assert_eq!(MappedState::from_raw("bogus"), MappedState::Warning);
    }

    #[test]
    fn overlay_sets_failed_with_message() {
        let mut record = ContainerRecord {
            id: "abc123".into(),
            name: "web".into(),
            state: MappedState::Running,
            status: "Up 2 minutes".into(),
            image: "nginx:latest".into(),
            labels: HashMap::new(),
            env: vec![],
            mounts: vec![],
            command: vec![],
            ports: vec![],
            networks: vec![],
            created_at: None,
            started_at: None,
            finished_at: None,
            error_msg: None,
            restart_count: None,
            network_mode: None,
        };
        let placeholder = FailurePlaceholder::new("web", "image pull failed");
        record.overlay_failure(&placeholder);
        assert_eq!(record.state, MappedState::Failed);
        assert_eq!(record.error_msg.as_deref(), Some("image pull failed"));
    }
}
