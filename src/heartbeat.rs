//! Heartbeat (spec.md §4.H): periodic and event-triggered health reports to
//! the control plane.
//!
//! Grounded in the teacher's `cmd/root.rs` periodic `report_all_statuses`
//! task: a `tokio::time::interval` loop with an extra `mpsc`-fed trigger
//! channel layered on so the Event Reconciler can force an out-of-band
//! report on a qualifying transition, without the reconciler itself knowing
//! anything about HTTP.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{DockerEngineInfo, HostHealthRequest, HttpClient};
use crate::cache::ContainerCache;
use crate::credentials::CredentialStore;
use crate::host;
use crate::runtime::RuntimeAdapter;

/// A handle the Event Reconciler (and anything else) can use to force an
/// immediate report without waiting for the next tick.
#[derive(Clone)]
pub struct HeartbeatTrigger {
    tx: mpsc::Sender<()>,
}

impl HeartbeatTrigger {
    /// Non-blocking: a trigger already pending in the channel makes this a
    /// no-op rather than queuing a second redundant report.
    pub fn fire(&self) {
        let _ = self.tx.try_send(());
    }

    /// Builds a trigger directly from a channel half, for exercising
    /// `reconciler`'s dispatch against an observable receiver in tests.
    #[cfg(test)]
    pub(crate) fn for_test(tx: mpsc::Sender<()>) -> Self {
        Self { tx }
    }
}

pub struct Heartbeat {
    client: Arc<HttpClient>,
    credentials: Arc<CredentialStore>,
    runtime: Arc<dyn RuntimeAdapter>,
    cache: Arc<ContainerCache>,
    interval: Duration,
    request_timeout: Duration,
    rx: mpsc::Receiver<()>,
}

impl Heartbeat {
    pub fn new(
        client: Arc<HttpClient>,
        credentials: Arc<CredentialStore>,
        runtime: Arc<dyn RuntimeAdapter>,
        cache: Arc<ContainerCache>,
        interval: Duration,
        request_timeout: Duration,
    ) -> (Self, HeartbeatTrigger) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self { client, credentials, runtime, cache, interval, request_timeout, rx },
            HeartbeatTrigger { tx },
        )
    }

    /// Runs until `cancel` fires. A report failure is logged and swallowed:
    /// the agent must never block container reconciliation on control-plane
    /// reachability (spec.md §4.H invariant).
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("heartbeat loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.report_once().await;
                }
                Some(()) = self.rx.recv() => {
                    self.report_once().await;
                }
            }
        }
    }

    async fn report_once(&self) {
        let host = match host::probe().await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "host probe failed, skipping heartbeat");
                return;
            }
        };

        let info = match self.runtime.engine_info(self.request_timeout).await {
            Ok(i) => i,
            Err(e) => {
                warn!(error = %e, "engine info unavailable, skipping heartbeat");
                return;
            }
        };
        let version = match self.runtime.engine_version(self.request_timeout).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "engine version unavailable, skipping heartbeat");
                return;
            }
        };

        let request = HostHealthRequest {
            host,
            docker_engine: DockerEngineInfo { info, version },
            containers: self.cache.snapshot(),
        };

        match self.client.health(&request).await {
            Ok(response) => {
                if let Some(token) = response.token.filter(|t| !t.is_empty()) {
                    self.credentials.rotate_token(token);
                }
            }
            Err(e) => warn!(error = %e, "heartbeat report failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn report_once_swallows_transport_failure() {
        let credentials = CredentialStore::new();
        let client = Arc::new(
            HttpClient::new("https://127.0.0.1:1", credentials.clone(), Duration::from_millis(50)).unwrap(),
        );
        let runtime: Arc<dyn RuntimeAdapter> = Arc::new(MockRuntime::new());
        let cache = Arc::new(ContainerCache::new());
        let (heartbeat, _trigger) =
            Heartbeat::new(client, credentials, runtime, cache, Duration::from_secs(30), Duration::from_millis(50));

        // Must not panic even though nothing is listening on that port.
        heartbeat.report_once().await;
    }

    #[tokio::test]
    async fn rotated_token_is_installed_after_report() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "tok-new"})))
            .mount(&server)
            .await;

        let credentials = CredentialStore::new();
        let client = Arc::new(
            HttpClient::new(&server.uri(), credentials.clone(), Duration::from_secs(5)).unwrap(),
        );
        let runtime: Arc<dyn RuntimeAdapter> = Arc::new(MockRuntime::new());
        let cache = Arc::new(ContainerCache::new());
        let (heartbeat, _trigger) =
            Heartbeat::new(client, credentials.clone(), runtime, cache, Duration::from_secs(30), Duration::from_secs(5));

        heartbeat.report_once().await;
        assert_eq!(credentials.get_token(), "tok-new");
    }
}
