//! A hand-rolled fake `RuntimeAdapter`, in the teacher's own test-double style
//! (see `cron/scheduler.rs`'s tests), so the reconciler and executor can be
//! exercised without a live engine daemon.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;

use super::{
    ContainerSpec, EngineInfo, EngineVersion, ListFilter, LogOptions, RegistryAuth,
    RuntimeAdapter, RuntimeError, RuntimeEvent, RuntimeResult, StatsSnapshot,
};
use crate::types::container::{ContainerRecord, MappedState};

/// In-memory stand-in for the container engine. Every call is synchronous
/// and infallible unless pre-seeded with an error via [`MockRuntime::fail_next`].
#[derive(Default)]
pub struct MockRuntime {
    containers: DashMap<String, ContainerRecord>,
    next_id: AtomicU64,
    image_digests: DashMap<String, String>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: ContainerRecord) {
        self.containers.insert(record.id.clone(), record);
    }

    pub fn set_image_digest(&self, image: &str, digest: &str) {
        self.image_digests.insert(image.to_string(), digest.to_string());
    }

    fn next_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("mock-container-{n}")
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    async fn inspect_container(&self, id: &str, _deadline: Duration) -> RuntimeResult<ContainerRecord> {
        self.containers
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn list_containers(&self, _filter: ListFilter, _deadline: Duration) -> RuntimeResult<Vec<ContainerRecord>> {
        Ok(self.containers.iter().map(|e| e.value().clone()).collect())
    }

    async fn create_container(&self, spec: &ContainerSpec, _deadline: Duration) -> RuntimeResult<String> {
        if self.containers.iter().any(|e| e.value().name == spec.name) {
            return Err(RuntimeError::Conflict(spec.name.clone()));
        }
        let id = self.next_id();
        let record = ContainerRecord {
            id: id.clone(),
            name: spec.name.clone(),
            state: MappedState::Created,
            status: "Created".into(),
            image: spec.image.clone(),
            labels: spec.labels.clone(),
            env: spec.env.clone(),
            mounts: spec.mounts.clone(),
            command: spec.command.clone(),
            ports: vec![],
            networks: vec![],
            created_at: None,
            started_at: None,
            finished_at: None,
            error_msg: None,
            restart_count: Some(0),
            network_mode: spec.network_mode.clone(),
        };
        self.containers.insert(id.clone(), record);
        Ok(id)
    }

    async fn start_container(&self, id: &str, _deadline: Duration) -> RuntimeResult<()> {
        let mut entry = self
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        entry.state = MappedState::Running;
        entry.status = "Running".into();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _signal: &str, _grace: Duration, _deadline: Duration) -> RuntimeResult<()> {
        let mut entry = self
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        entry.state = MappedState::Exited;
        entry.status = "Exited".into();
        Ok(())
    }

    async fn restart_container(&self, id: &str, deadline: Duration) -> RuntimeResult<()> {
        self.stop_container(id, "SIGTERM", Duration::from_secs(0), deadline).await?;
        self.start_container(id, deadline).await
    }

    /// Polls the in-memory record rather than blocking on a real event —
    /// sufficient for exercising the Job Executor's timeout-vs-exit race in
    /// tests without a live engine.
    async fn wait_not_running(&self, id: &str) -> RuntimeResult<()> {
        loop {
            let state = self
                .containers
                .get(id)
                .map(|r| r.state)
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
            if state != MappedState::Running && state != MappedState::Starting {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn remove_container(&self, id: &str, _force: bool, _deadline: Duration) -> RuntimeResult<()> {
        self.containers.remove(id);
        Ok(())
    }

    async fn rename_container(&self, id: &str, new_name: &str, _deadline: Duration) -> RuntimeResult<()> {
        let mut entry = self
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        entry.name = new_name.to_string();
        Ok(())
    }

    async fn pull_image(&self, _reference: &str, _auth: Option<RegistryAuth>, _deadline: Duration) -> RuntimeResult<()> {
        Ok(())
    }

    async fn inspect_image(&self, reference: &str, _deadline: Duration) -> RuntimeResult<Option<String>> {
        Ok(self.image_digests.get(reference).map(|d| d.clone()))
    }

    async fn create_network(&self, name: &str, _driver: &str, _deadline: Duration) -> RuntimeResult<String> {
        Ok(format!("mock-network-{name}"))
    }

    async fn inspect_network(&self, _reference: &str, _deadline: Duration) -> RuntimeResult<()> {
        Ok(())
    }

    async fn remove_network(&self, _id: &str, _deadline: Duration) -> RuntimeResult<()> {
        Ok(())
    }

    fn subscribe_events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>> {
        stream::empty().boxed()
    }

    async fn read_stats_snapshot(&self, id: &str, _deadline: Duration) -> RuntimeResult<StatsSnapshot> {
        if !self.containers.contains_key(id) {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Ok(StatsSnapshot::default())
    }

    async fn read_logs(&self, id: &str, _opts: LogOptions, _deadline: Duration) -> RuntimeResult<Vec<String>> {
        if !self.containers.contains_key(id) {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        Ok(vec![])
    }

    async fn engine_info(&self, _deadline: Duration) -> RuntimeResult<EngineInfo> {
        Ok(EngineInfo {
            containers_running: self
                .containers
                .iter()
                .filter(|e| e.value().state == MappedState::Running)
                .count() as i64,
            containers_total: self.containers.len() as i64,
            images: self.image_digests.len() as i64,
            server_version: "mock".into(),
        })
    }

    async fn engine_version(&self, _deadline: Duration) -> RuntimeResult<EngineVersion> {
        Ok(EngineVersion {
            version: "mock".into(),
            api_version: "1.43".into(),
            kernel_version: "mock".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "alpine:latest".to_string(),
            labels: Map::new(),
            env: vec![],
            mounts: vec![],
            command: vec![],
            network_mode: None,
            port_bindings: Map::new(),
        }
    }

    #[tokio::test]
    async fn create_then_inspect_round_trips() {
        let runtime = MockRuntime::new();
        let id = runtime.create_container(&spec("c1"), Duration::from_secs(1)).await.unwrap();
        let record = runtime.inspect_container(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(record.name, "c1");
        assert_eq!(record.state, MappedState::Created);
    }

    #[tokio::test]
    async fn create_with_duplicate_name_conflicts() {
        let runtime = MockRuntime::new();
        runtime.create_container(&spec("c1"), Duration::from_secs(1)).await.unwrap();
        let err = runtime.create_container(&spec("c1"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Conflict(_)));
    }

    #[tokio::test]
    async fn start_stop_transitions_state() {
        let runtime = MockRuntime::new();
        let id = runtime.create_container(&spec("c1"), Duration::from_secs(1)).await.unwrap();
        runtime.start_container(&id, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            runtime.inspect_container(&id, Duration::from_secs(1)).await.unwrap().state,
            MappedState::Running
        );
        runtime.stop_container(&id, "SIGTERM", Duration::from_secs(0), Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            runtime.inspect_container(&id, Duration::from_secs(1)).await.unwrap().state,
            MappedState::Exited
        );
    }
}
