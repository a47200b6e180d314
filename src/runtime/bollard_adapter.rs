//! `bollard`-backed implementation of [`RuntimeAdapter`].
//!
//! Grounded in the teacher's `environment/docker/{environment,container,power}.rs`:
//! the same create/start/stop/inspect call shapes, generalized from a single
//! managed "server" container to an arbitrary named container, and recombined
//! behind one trait instead of being split across `DockerEnvironment` methods.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
    LogsOptions, RemoveContainerOptions, RenameContainerOptions, StartContainerOptions,
    StatsOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding as BollardPortBinding};
use bollard::network::CreateNetworkOptions;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::{debug, warn};

use super::{
    ContainerSpec, EngineInfo, EngineVersion, ListFilter, LogOptions, RegistryAuth,
    RuntimeAdapter, RuntimeError, RuntimeEvent, RuntimeResult, StatsSnapshot,
};
use crate::types::container::{ContainerRecord, MappedState, MountEntry, NetworkEndpoint, PortBinding};

/// Default per-call log line cap, used when no configuration overrides it
/// (spec.md §9's log-line-cap open question, resolved as a configurable
/// field — see `AgentConfiguration::log_line_cap`).
pub const DEFAULT_LOG_LINE_CAP: usize = 10_000;

pub struct BollardRuntime {
    docker: Docker,
    log_line_cap: usize,
}

impl BollardRuntime {
    pub fn connect_with_socket(socket_path: &str, log_line_cap: usize) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)?;
        Ok(Self { docker, log_line_cap })
    }

    pub fn connect_with_local_defaults() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker, log_line_cap: DEFAULT_LOG_LINE_CAP })
    }

    async fn with_deadline<T>(
        &self,
        deadline: Duration,
        fut: impl std::future::Future<Output = Result<T, bollard::errors::Error>>,
    ) -> RuntimeResult<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_docker_err(e)),
            Err(_) => Err(RuntimeError::Timeout),
        }
    }

    async fn inspect_raw(
        &self,
        id: &str,
        deadline: Duration,
    ) -> RuntimeResult<bollard::models::ContainerInspectResponse> {
        self.with_deadline(deadline, self.docker.inspect_container(id, None))
            .await
    }
}

fn map_docker_err(e: bollard::errors::Error) -> RuntimeError {
    if let bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } = e {
        return RuntimeError::NotFound(e.to_string());
    }
    if let bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } = e {
        return RuntimeError::Conflict(e.to_string());
    }
    RuntimeError::Docker(e)
}

/// Translates an engine inspect response into the agent's canonical record.
///
/// `restartCount` and `networkMode` ride along because the inspect call
/// already returns them at no extra cost (see SPEC_FULL.md §3).
fn parse_inspect(resp: bollard::models::ContainerInspectResponse) -> ContainerRecord {
    let id = resp.id.unwrap_or_default();
    let name = resp
        .name
        .unwrap_or_default()
        .strip_prefix('/')
        .unwrap_or_default()
        .to_string();

    let state = resp.state.clone().unwrap_or_default();
    let raw_state = state
        .health
        .as_ref()
        .and_then(|h| h.status.as_ref())
        .map(|s| s.to_string())
        .or_else(|| state.status.map(|s| s.to_string()))
        .unwrap_or_default();
    let mapped = MappedState::from_raw(&raw_state);

    let config = resp.config.clone().unwrap_or_default();
    let host_config = resp.host_config.clone().unwrap_or_default();
    let network_settings = resp.network_settings.clone().unwrap_or_default();

    let labels = config.labels.unwrap_or_default();
    let env = config.env.unwrap_or_default();
    let command = config.cmd.unwrap_or_default();

    let mounts = resp
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|m| MountEntry {
            source: m.source.unwrap_or_default(),
            destination: m.destination.unwrap_or_default(),
            read_only: m.rw.map(|rw| !rw).unwrap_or(false),
        })
        .collect();

    let ports = network_settings
        .ports
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(spec, bindings)| {
            let mut parts = spec.splitn(2, '/');
            let port_num: u16 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let proto = parts.next().unwrap_or("tcp").to_string();
            bindings
                .unwrap_or_default()
                .into_iter()
                .map(move |b| PortBinding {
                    container_port: port_num,
                    protocol: proto.clone(),
                    host_ip: b.host_ip,
                    host_port: b.host_port.and_then(|p| p.parse().ok()),
                })
        })
        .collect();

    let networks = network_settings
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(name, endpoint)| NetworkEndpoint {
            network_name: name,
            ip_address: endpoint.ip_address.unwrap_or_default(),
            gateway: endpoint.gateway.unwrap_or_default(),
            endpoint_id: endpoint.endpoint_id.unwrap_or_default(),
        })
        .collect();

    let parse_time = |s: Option<String>| {
        s.filter(|t| !t.is_empty() && t != "0001-01-01T00:00:00Z")
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
    };

    ContainerRecord {
        id,
        name,
        state: mapped,
        status: state.status.map(|s| s.to_string()).unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        labels,
        env,
        mounts,
        command,
        ports,
        networks,
        created_at: parse_time(resp.created),
        started_at: parse_time(state.started_at),
        finished_at: parse_time(state.finished_at),
        error_msg: state.error.filter(|s| !s.is_empty()),
        restart_count: resp.restart_count,
        network_mode: host_config.network_mode,
    }
}

#[async_trait]
impl RuntimeAdapter for BollardRuntime {
    async fn inspect_container(&self, id: &str, deadline: Duration) -> RuntimeResult<ContainerRecord> {
        let resp = self.inspect_raw(id, deadline).await?;
        Ok(parse_inspect(resp))
    }

    async fn list_containers(&self, filter: ListFilter, deadline: Duration) -> RuntimeResult<Vec<ContainerRecord>> {
        let options = ListContainersOptions::<String> {
            all: filter.all,
            ..Default::default()
        };
        let summaries = self
            .with_deadline(deadline, self.docker.list_containers(Some(options)))
            .await?;

        let mut records = Vec::with_capacity(summaries.len());
        for summary in summaries {
            if let Some(id) = summary.id {
                match self.inspect_container(&id, deadline).await {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(container_id = %id, error = %e, "failed to inspect container during list"),
                }
            }
        }
        Ok(records)
    }

    async fn create_container(&self, spec: &ContainerSpec, deadline: Duration) -> RuntimeResult<String> {
        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.destination.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let mut port_bindings: HashMap<String, Option<Vec<BollardPortBinding>>> = HashMap::new();
        for (container_port, host_port) in &spec.port_bindings {
            let key = format!("{container_port}/tcp");
            let binding = host_port.map(|p| {
                vec![BollardPortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(p.to_string()),
                }]
            });
            port_bindings.insert(key, binding);
        }

        let host_config = HostConfig {
            mounts: Some(mounts),
            port_bindings: Some(port_bindings),
            network_mode: spec.network_mode.clone(),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            cmd: if spec.command.is_empty() { None } else { Some(spec.command.clone()) },
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .with_deadline(
                deadline,
                self.docker.create_container(Some(options), container_config),
            )
            .await?;

        debug!(container_id = %response.id, name = %spec.name, "created container");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str, deadline: Duration) -> RuntimeResult<()> {
        let options = StartContainerOptions::<String>::default();
        self.with_deadline(deadline, self.docker.start_container(id, Some(options)))
            .await
    }

    async fn stop_container(&self, id: &str, signal: &str, grace: Duration, deadline: Duration) -> RuntimeResult<()> {
        let options = KillContainerOptions { signal };
        match self
            .with_deadline(deadline, self.docker.kill_container(id, Some(options)))
            .await
        {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => return Ok(()),
            Err(RuntimeError::Conflict(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
        tokio::time::sleep(grace).await;
        Ok(())
    }

    async fn restart_container(&self, id: &str, deadline: Duration) -> RuntimeResult<()> {
        self.stop_container(id, "SIGTERM", Duration::from_secs(5), deadline).await?;
        self.start_container(id, deadline).await
    }

    async fn wait_not_running(&self, id: &str) -> RuntimeResult<()> {
        let options = WaitContainerOptions { condition: "not-running" };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(map_docker_err(e)),
            None => Ok(()),
        }
    }

    async fn remove_container(&self, id: &str, force: bool, deadline: Duration) -> RuntimeResult<()> {
        let options = RemoveContainerOptions { force, v: false, ..Default::default() };
        match self
            .with_deadline(deadline, self.docker.remove_container(id, Some(options)))
            .await
        {
            Ok(()) => Ok(()),
            Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn rename_container(&self, id: &str, new_name: &str, deadline: Duration) -> RuntimeResult<()> {
        let options = RenameContainerOptions { name: new_name };
        self.with_deadline(deadline, self.docker.rename_container(id, options))
            .await
    }

    async fn pull_image(&self, reference: &str, auth: Option<RegistryAuth>, deadline: Duration) -> RuntimeResult<()> {
        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username),
            password: Some(a.password),
            serveraddress: Some(a.server_address),
            ..Default::default()
        });

        let options = CreateImageOptions {
            from_image: reference,
            ..Default::default()
        };

        let result = tokio::time::timeout(deadline, async {
            let mut stream = self.docker.create_image(Some(options), None, credentials);
            while let Some(item) = stream.next().await {
                item?;
            }
            Ok::<(), bollard::errors::Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(map_docker_err(e)),
            Err(_) => Err(RuntimeError::Timeout),
        }
    }

    async fn inspect_image(&self, reference: &str, deadline: Duration) -> RuntimeResult<Option<String>> {
        match self
            .with_deadline(deadline, self.docker.inspect_image(reference))
            .await
        {
            Ok(image) => Ok(image.repo_digests.and_then(|d| d.into_iter().next())),
            Err(RuntimeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_network(&self, name: &str, driver: &str, deadline: Duration) -> RuntimeResult<String> {
        let options = CreateNetworkOptions {
            name,
            driver,
            ..Default::default()
        };
        let response = self
            .with_deadline(deadline, self.docker.create_network(options))
            .await?;
        Ok(response.id.unwrap_or_default())
    }

    async fn inspect_network(&self, reference: &str, deadline: Duration) -> RuntimeResult<()> {
        self.with_deadline(deadline, self.docker.inspect_network::<String>(reference, None))
            .await?;
        Ok(())
    }

    async fn remove_network(&self, id: &str, deadline: Duration) -> RuntimeResult<()> {
        match self.with_deadline(deadline, self.docker.remove_network(id)).await {
            Ok(()) => Ok(()),
            Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn subscribe_events(&self) -> BoxStream<'static, RuntimeResult<RuntimeEvent>> {
        // Scoped to container-type events at the source (spec.md §4.G /
        // §9): image and network events reuse action names like
        // `delete`/`create` and must never reach the reconciler's
        // container-lifecycle dispatch.
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);
        let options = EventsOptions::<String> { filters, ..Default::default() };
        let stream = self.docker.events(Some(options));
        stream
            .map(|item| {
                item.map(|msg| RuntimeEvent {
                    typ: msg.typ.map(|t| format!("{t:?}").to_lowercase()).unwrap_or_default(),
                    action: msg.action.unwrap_or_default(),
                    actor_id: msg.actor.as_ref().and_then(|a| a.id.clone()).unwrap_or_default(),
                    actor_attrs: msg
                        .actor
                        .and_then(|a| a.attributes)
                        .unwrap_or_default(),
                })
                .map_err(map_docker_err)
            })
            .boxed()
    }

    async fn read_stats_snapshot(&self, id: &str, deadline: Duration) -> RuntimeResult<StatsSnapshot> {
        let options = StatsOptions { stream: false, one_shot: true };
        let mut stream = self.docker.stats(id, Some(options));
        let stats = tokio::time::timeout(deadline, stream.next())
            .await
            .map_err(|_| RuntimeError::Timeout)?
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?
            .map_err(map_docker_err)?;

        let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
            - stats.precpu_stats.cpu_usage.total_usage as f64;
        let system_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
            - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
        let online_cpus = stats.cpu_stats.online_cpus.unwrap_or(1).max(1) as f64;
        let cpu_usage_percent = if system_delta > 0.0 && cpu_delta > 0.0 {
            (cpu_delta / system_delta) * online_cpus * 100.0
        } else {
            0.0
        };

        let memory_usage_bytes = stats.memory_stats.usage.unwrap_or(0);
        let memory_limit_bytes = stats.memory_stats.limit.unwrap_or(0);

        let (rx, tx) = stats
            .networks
            .unwrap_or_default()
            .values()
            .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes));

        Ok(StatsSnapshot {
            cpu_usage_percent: (cpu_usage_percent * 100.0).round() / 100.0,
            memory_usage_bytes,
            memory_limit_bytes,
            network_rx_bytes: rx,
            network_tx_bytes: tx,
        })
    }

    async fn read_logs(&self, id: &str, opts: LogOptions, deadline: Duration) -> RuntimeResult<Vec<String>> {
        let line_cap = self.log_line_cap;

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: opts.tail.map(|t| t.to_string()).unwrap_or_else(|| "all".to_string()),
            since: opts.since.unwrap_or(0),
            until: opts.until.unwrap_or(0),
            timestamps: opts.timestamps,
            ..Default::default()
        };

        let result = tokio::time::timeout(deadline, async {
            let mut stream = self.docker.logs(id, Some(options));
            let mut lines = Vec::new();
            while let Some(item) = stream.next().await {
                let chunk = item?;
                lines.push(chunk.to_string());
                if lines.len() > line_cap {
                    return Err(bollard::errors::Error::IOError {
                        err: std::io::Error::new(std::io::ErrorKind::Other, "log line cap exceeded"),
                    });
                }
            }
            Ok(lines)
        })
        .await;

        match result {
            Ok(Ok(lines)) if lines.len() <= line_cap => Ok(lines),
            Ok(Ok(_)) => Err(RuntimeError::LogOverflow),
            Ok(Err(_)) => Err(RuntimeError::LogOverflow),
            Err(_) => Err(RuntimeError::Timeout),
        }
    }

    async fn engine_info(&self, deadline: Duration) -> RuntimeResult<EngineInfo> {
        let info = self.with_deadline(deadline, self.docker.info()).await?;
        Ok(EngineInfo {
            containers_running: info.containers_running.unwrap_or(0),
            containers_total: info.containers.unwrap_or(0),
            images: info.images.unwrap_or(0),
            server_version: info.server_version.unwrap_or_default(),
        })
    }

    async fn engine_version(&self, deadline: Duration) -> RuntimeResult<EngineVersion> {
        let version = self.with_deadline(deadline, self.docker.version()).await?;
        Ok(EngineVersion {
            version: version.version.unwrap_or_default(),
            api_version: version.api_version.unwrap_or_default(),
            kernel_version: version.kernel_version.unwrap_or_default(),
        })
    }
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        map_docker_err(e)
    }
}
