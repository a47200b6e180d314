//! Main daemon command - bootstraps credentials, starts every background
//! subsystem, and serves the inbound mTLS API until a shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stellar_agent_daemon::api::HttpClient;
use stellar_agent_daemon::cache::ContainerCache;
use stellar_agent_daemon::config::Configuration;
use stellar_agent_daemon::credentials::CredentialStore;
use stellar_agent_daemon::heartbeat::Heartbeat;
use stellar_agent_daemon::host;
use stellar_agent_daemon::labels::parse_job_labels;
use stellar_agent_daemon::pipeline;
use stellar_agent_daemon::reconciler::Reconciler;
use stellar_agent_daemon::registrar::Registrar;
use stellar_agent_daemon::router::{self, AppState};
use stellar_agent_daemon::runtime::{BollardRuntime, RuntimeAdapter};
use stellar_agent_daemon::scheduler::{ExecutorDeps, Scheduler};
use stellar_agent_daemon::types::JobTask;

/// Grace period the listener is given to drain in-flight requests before
/// the process exits (spec.md §5).
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(15);

/// Upper bound on the startup `listContainers(all=true)` call.
const STARTUP_LIST_DEADLINE: Duration = Duration::from_secs(30);

/// Run the main daemon
pub async fn run(config_path: &str) -> Result<()> {
    info!("Loading configuration from: {}", config_path);
    let config = Configuration::load(config_path)?;

    info!("Configuration loaded successfully");
    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Docker socket: {}", config.docker.socket);
    info!("  Data directory: {}", config.system.data_directory.display());

    let request_timeout = Duration::from_secs(config.agent.request_timeout_secs);
    let kill_grace = Duration::from_secs(config.agent.kill_grace_secs);

    let credentials = CredentialStore::new();
    let client = Arc::new(
        HttpClient::new(&config.agent.server, credentials.clone(), request_timeout)
            .context("building control-plane HTTP client")?,
    );
    let registrar = Registrar::new(client.clone(), credentials.clone(), config.agent.register_token.clone());

    info!("Probing host identity for bootstrap registration");
    let identity = host::probe().await.context("probing host identity")?;
    registrar.bootstrap(&identity).await.context("bootstrap registration")?;
    info!("Registered with control plane, credentials installed");

    let runtime: Arc<dyn RuntimeAdapter> = Arc::new(BollardRuntime::connect_with_socket(
        &config.docker.socket,
        config.agent.log_line_cap as usize,
    )?);

    let cache = Arc::new(ContainerCache::new());
    cache.load_all(&*runtime, STARTUP_LIST_DEADLINE).await?;
    info!("Loaded container state from the runtime engine");

    let scheduler = Scheduler::new(ExecutorDeps { runtime: runtime.clone(), request_timeout, kill_grace }).await?;
    scheduler.start().await?;

    // The Event Reconciler only admits jobs off live "create" events; a
    // container already running at startup needs the same admission done
    // here, once, against the freshly loaded cache.
    for record in cache.snapshot() {
        if let Some(labels) = parse_job_labels(&record.labels) {
            let task = JobTask {
                container_id: record.id.clone(),
                container_name: record.name.clone(),
                image: record.image.clone(),
                always_pull: labels.always_pull,
                timeout_secs: labels.timeout.as_secs(),
                rule_string: labels.rule_string,
                registry_auth_blob: labels.registry_auth_blob,
            };
            if let Err(e) = scheduler.admit(task).await {
                warn!(container = %record.name, error = %e, "skipping job admission for pre-existing container");
            }
        }
    }

    let shutdown_token = CancellationToken::new();

    let (heartbeat, heartbeat_trigger) = Heartbeat::new(
        client.clone(),
        credentials.clone(),
        runtime.clone(),
        cache.clone(),
        Duration::from_secs(config.agent.heartbeat_interval_secs),
        request_timeout,
    );
    tokio::spawn(heartbeat.run(shutdown_token.clone()));

    let reconciler = Reconciler::new(
        runtime.clone(),
        cache.clone(),
        scheduler.clone(),
        heartbeat_trigger,
        request_timeout,
    );
    tokio::spawn(reconciler.run(shutdown_token.clone()));

    tokio::spawn(registrar.clone().run(shutdown_token.clone()));

    let (pipeline, worker) = pipeline::channel(
        runtime.clone(),
        cache.clone(),
        client.clone(),
        config.system.data_directory.join("volumes"),
        request_timeout,
        config.docker.ephemeral_port_start,
        config.docker.ephemeral_port_end,
    );
    tokio::spawn(worker.run(shutdown_token.clone()));

    let state = AppState {
        credentials: credentials.clone(),
        cache: cache.clone(),
        pipeline,
        runtime: runtime.clone(),
        request_timeout,
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr =
        format!("{}:{}", config.api.host, config.api.port).parse().context("invalid api.host/api.port")?;
    let tls_config = credentials.get_server_tls().await?;

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
        warn!("Received shutdown signal, draining background tasks...");
        signal_token.cancel();
        shutdown_handle.graceful_shutdown(Some(SHUTDOWN_DRAIN));
    });

    info!("Starting HTTPS listener on {} (mTLS)", bind_addr);
    if let Err(e) = axum_server::bind_rustls(bind_addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
    {
        error!("HTTPS listener exited with an error: {}", e);
    }

    info!("Daemon stopped");
    Ok(())
}
