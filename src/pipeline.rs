//! Task Pipeline (spec.md §4.K): an effectively-unbuffered dispatch queue
//! between the inbound HTTPS handlers and the engine-mutating work they
//! request.
//!
//! Grounded in the teacher's `cron/scheduler.rs` `JobHandle` dispatch
//! pattern (one channel, one worker, fire off the actual work so the
//! dequeue loop is never blocked by a single slow call). The channel's
//! capacity of 1 approximates spec.md's "effectively unbuffered" queue: a
//! handler's `enqueue` call returns immediately once the task lands in the
//! channel, but a second `enqueue` arriving before the worker has drained
//! the first blocks until there's room, giving the control plane natural
//! backpressure instead of an unbounded queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::HttpClient;
use crate::cache::ContainerCache;
use crate::error::{AgentError, Result};
use crate::runtime::{decode_registry_auth, ContainerSpec, RuntimeAdapter};
use crate::types::container::FailurePlaceholder;
use crate::types::task::{
    ContainerCreateRequest, ContainerDeleteRequest, ContainerIdRequest, ContainerStopRequest,
    NetworkCreateRequest, NetworkDeleteRequest, PendingTask,
};
use crate::volumes;

#[derive(Clone)]
pub struct Pipeline {
    tx: mpsc::Sender<PendingTask>,
}

impl Pipeline {
    /// Enqueues `task`, returning once it lands in the channel. Backpressure
    /// from the 1-capacity channel surfaces here as the enqueuing handler's
    /// own await resolving late, never as a dropped task.
    pub async fn enqueue(&self, task: PendingTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| AgentError::Internal("task pipeline worker is gone".into()))
    }
}

pub struct PipelineWorker {
    rx: mpsc::Receiver<PendingTask>,
    runtime: Arc<dyn RuntimeAdapter>,
    cache: Arc<ContainerCache>,
    client: Arc<HttpClient>,
    volumes_root: PathBuf,
    request_timeout: Duration,
    ephemeral_port_start: u16,
    ephemeral_port_end: u16,
}

/// Builds the `(Pipeline, PipelineWorker)` pair: handlers hold the former,
/// `cmd::root` spawns the latter's [`PipelineWorker::run`] as a background task.
pub fn channel(
    runtime: Arc<dyn RuntimeAdapter>,
    cache: Arc<ContainerCache>,
    client: Arc<HttpClient>,
    volumes_root: PathBuf,
    request_timeout: Duration,
    ephemeral_port_start: u16,
    ephemeral_port_end: u16,
) -> (Pipeline, PipelineWorker) {
    let (tx, rx) = mpsc::channel(1);
    (
        Pipeline { tx },
        PipelineWorker {
            rx,
            runtime,
            cache,
            client,
            volumes_root,
            request_timeout,
            ephemeral_port_start,
            ephemeral_port_end,
        },
    )
}

impl PipelineWorker {
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("task pipeline worker shutting down");
                    return;
                }
                task = self.rx.recv() => match task {
                    Some(t) => t,
                    None => return,
                },
            };

            let runtime = self.runtime.clone();
            let cache = self.cache.clone();
            let client = self.client.clone();
            let volumes_root = self.volumes_root.clone();
            let request_timeout = self.request_timeout;
            let ephemeral_port_start = self.ephemeral_port_start;
            let ephemeral_port_end = self.ephemeral_port_end;

            // Spawned so a slow task (an image pull, a stop grace period)
            // never stalls the dequeue loop behind it.
            tokio::spawn(async move {
                dispatch(
                    task,
                    runtime,
                    cache,
                    client,
                    volumes_root,
                    request_timeout,
                    ephemeral_port_start,
                    ephemeral_port_end,
                )
                .await;
            });
        }
    }
}

async fn dispatch(
    task: PendingTask,
    runtime: Arc<dyn RuntimeAdapter>,
    cache: Arc<ContainerCache>,
    client: Arc<HttpClient>,
    volumes_root: PathBuf,
    request_timeout: Duration,
    ephemeral_port_start: u16,
    ephemeral_port_end: u16,
) {
    let result = match task {
        PendingTask::ContainerCreate(req) => {
            handle_create(req, &runtime, &cache, &client, &volumes_root, request_timeout, ephemeral_port_start, ephemeral_port_end).await
        }
        PendingTask::ContainerDelete(req) => handle_delete(req, &runtime, &cache, request_timeout).await,
        PendingTask::ContainerStart(req) => handle_start(req, &runtime, &cache, request_timeout).await,
        PendingTask::ContainerStop(req) => handle_stop(req, &runtime, &cache, request_timeout).await,
        PendingTask::ContainerRestart(req) => handle_restart(req, &runtime, &cache, request_timeout).await,
        PendingTask::NetworkCreate(req) => handle_network_create(req, &runtime, request_timeout).await,
        PendingTask::NetworkDelete(req) => handle_network_delete(req, &runtime, request_timeout).await,
    };

    if let Err(e) = result {
        warn!(error = %e, "task pipeline dispatch failed");
    }
}

async fn handle_create(
    req: ContainerCreateRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    cache: &Arc<ContainerCache>,
    client: &Arc<HttpClient>,
    volumes_root: &PathBuf,
    request_timeout: Duration,
    ephemeral_port_start: u16,
    ephemeral_port_end: u16,
) -> Result<()> {
    let name = req.name.clone();
    match build_and_create(req, runtime, client, volumes_root, request_timeout, ephemeral_port_start, ephemeral_port_end).await {
        Ok(id) => {
            runtime.start_container(&id, request_timeout).await?;
            let record = runtime.inspect_container(&id, request_timeout).await?;
            cache.upsert_from_inspect(record);
            Ok(())
        }
        Err(e) => {
            cache.record_failure(FailurePlaceholder::new(&name, e.to_string()));
            Err(e)
        }
    }
}

async fn build_and_create(
    req: ContainerCreateRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    client: &Arc<HttpClient>,
    volumes_root: &PathBuf,
    request_timeout: Duration,
    ephemeral_port_start: u16,
    ephemeral_port_end: u16,
) -> Result<String> {
    if req.always_pull {
        let auth = match req.registry_auth_blob.as_deref().filter(|s| !s.is_empty()) {
            Some(blob) => Some(decode_registry_auth(blob)?),
            None => None,
        };
        runtime.pull_image(&req.image, auth, request_timeout).await?;
    }

    let mounts = volumes::materialize_mounts(client, volumes_root, req.mounts).await?;

    let mut port_bindings = std::collections::HashMap::new();
    for port in req.ports {
        let host_port = if port.host_port == 0 {
            Some(crate::runtime::ports::allocate_port(ephemeral_port_start, ephemeral_port_end)?)
        } else {
            Some(port.host_port)
        };
        port_bindings.insert(port.container_port, host_port);
    }

    let spec = ContainerSpec {
        name: req.name,
        image: req.image,
        labels: req.labels,
        env: req.env,
        mounts,
        command: req.command,
        network_mode: req.network_mode,
        port_bindings,
    };

    Ok(runtime.create_container(&spec, request_timeout).await?)
}

async fn handle_delete(
    req: ContainerDeleteRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    cache: &Arc<ContainerCache>,
    request_timeout: Duration,
) -> Result<()> {
    // Pre-file: clear any Failure Placeholder for this name before touching
    // the engine, so a delete always purges the placeholder even if the
    // engine itself has nothing by this id (spec.md §8 testable property 5).
    if let Some(name) = req.container_name.as_deref() {
        cache.clear_failure(name);
    }

    let force = req.force;
    match runtime.remove_container(&req.container_id, force, request_timeout).await {
        Ok(()) => {
            cache.mark_removed(&req.container_id);
            cache.remove(&req.container_id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_start(
    req: ContainerIdRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    cache: &Arc<ContainerCache>,
    request_timeout: Duration,
) -> Result<()> {
    runtime.start_container(&req.container_id, request_timeout).await?;
    refresh_cache_entry(&req.container_id, runtime, cache, request_timeout).await
}

async fn handle_stop(
    req: ContainerStopRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    cache: &Arc<ContainerCache>,
    request_timeout: Duration,
) -> Result<()> {
    let grace = Duration::from_secs(req.timeout_secs.unwrap_or(5));
    runtime.stop_container(&req.container_id, "SIGTERM", grace, request_timeout).await?;
    refresh_cache_entry(&req.container_id, runtime, cache, request_timeout).await
}

async fn handle_restart(
    req: ContainerIdRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    cache: &Arc<ContainerCache>,
    request_timeout: Duration,
) -> Result<()> {
    runtime.restart_container(&req.container_id, request_timeout).await?;
    refresh_cache_entry(&req.container_id, runtime, cache, request_timeout).await
}

async fn refresh_cache_entry(
    id: &str,
    runtime: &Arc<dyn RuntimeAdapter>,
    cache: &Arc<ContainerCache>,
    request_timeout: Duration,
) -> Result<()> {
    let record = runtime.inspect_container(id, request_timeout).await?;
    cache.upsert_from_inspect(record);
    Ok(())
}

async fn handle_network_create(
    req: NetworkCreateRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    request_timeout: Duration,
) -> Result<()> {
    let driver = req.driver.unwrap_or_else(|| "bridge".to_string());
    runtime.create_network(&req.name, &driver, request_timeout).await?;
    Ok(())
}

async fn handle_network_delete(
    req: NetworkDeleteRequest,
    runtime: &Arc<dyn RuntimeAdapter>,
    request_timeout: Duration,
) -> Result<()> {
    runtime.remove_network(&req.name, request_timeout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::types::container::MountEntry;
    use std::collections::HashMap;

    fn create_req(name: &str) -> ContainerCreateRequest {
        ContainerCreateRequest {
            name: name.to_string(),
            image: "alpine:latest".into(),
            labels: HashMap::new(),
            env: vec![],
            mounts: vec![],
            command: vec![],
            network_mode: None,
            ports: vec![],
            always_pull: false,
            registry_auth_blob: None,
        }
    }

    fn worker_fixture() -> (Arc<MockRuntime>, Arc<ContainerCache>, Arc<HttpClient>, tempfile::TempDir) {
        let runtime = Arc::new(MockRuntime::new());
        let cache = Arc::new(ContainerCache::new());
        let credentials = crate::credentials::CredentialStore::new();
        let client = Arc::new(HttpClient::new("https://127.0.0.1:1", credentials, Duration::from_millis(10)).unwrap());
        let tmp = tempfile::tempdir().unwrap();
        (runtime, cache, client, tmp)
    }

    #[tokio::test]
    async fn create_success_populates_cache() {
        let (runtime, cache, client, tmp) = worker_fixture();
        let req = create_req("web");

        handle_create(req, &(runtime.clone() as Arc<dyn RuntimeAdapter>), &cache, &client, &tmp.path().to_path_buf(), Duration::from_secs(5), 40000, 40100)
            .await
            .unwrap();

        let record = cache.get_by_name("web").unwrap();
        assert_eq!(record.state, crate::types::MappedState::Running);
    }

    #[tokio::test]
    async fn create_failure_records_placeholder() {
        let (runtime, cache, client, tmp) = worker_fixture();
        // Seed a conflicting container under the same name to force create_container to fail.
        runtime.seed(crate::types::container::ContainerRecord {
            id: "existing".into(),
            name: "web".into(),
            state: crate::types::MappedState::Running,
            status: "Up".into(),
            image: "alpine:latest".into(),
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
        });

        let req = create_req("web");
        let runtime_dyn: Arc<dyn RuntimeAdapter> = runtime.clone();
        let err = handle_create(req, &runtime_dyn, &cache, &client, &tmp.path().to_path_buf(), Duration::from_secs(5), 40000, 40100)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Conflict(_)));

        let snap = cache.snapshot();
        let placeholder_record = snap.iter().find(|r| r.name == "web").unwrap();
        assert_eq!(placeholder_record.state, crate::types::MappedState::Failed);
    }

    #[tokio::test]
    async fn delete_clears_placeholder_even_without_matching_id() {
        let (runtime, cache, _client, _tmp) = worker_fixture();
        cache.record_failure(FailurePlaceholder::new("ghost", "create failed"));

        let req = ContainerDeleteRequest {
            container_id: "nonexistent".into(),
            force: true,
            container_name: Some("ghost".into()),
        };
        let runtime_dyn: Arc<dyn RuntimeAdapter> = runtime.clone();
        handle_delete(req, &runtime_dyn, &cache, Duration::from_secs(5)).await.unwrap();

        assert!(cache.snapshot().is_empty());
    }

    #[test]
    fn mount_with_real_path_is_unaffected() {
        let m = MountEntry { source: "/x".into(), destination: "/y".into(), read_only: false };
        assert_eq!(m.source, "/x");
    }
}
