//! Registrar (spec.md §4.D): Bootstrap -> Registered -> Refreshing -> Registered.
//!
//! Grounded in the teacher's `cmd/root.rs` startup sequence (it built a
//! `Configuration` then reached for the control plane once, at process
//! start); here that single call becomes a state machine because credentials
//! expire and must be rotated without a restart. The refresh ticker follows
//! the same `tokio::time::interval` + `tokio::select!` idiom the teacher's
//! old `cron/scheduler.rs` used for its fixed-period jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::{HttpClient, RegisterRequest};
use crate::credentials::{CredentialBundle, CredentialStore};
use crate::error::{AgentError, Result};
use crate::host::NodeIdentity;

const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const REFRESH_BACKOFF: Duration = Duration::from_secs(60 * 60);
/// Re-registration only fires once the current credential is within this
/// window of expiry (spec.md §4.D).
const REFRESH_THRESHOLD: chrono::Duration = chrono::Duration::hours(120);

/// Drives credential bootstrap and the background refresh loop. Holds the
/// bootstrap token so a hard refresh failure can always fall back to
/// re-registering from scratch (spec.md §9 Open Question, resolved: retrying
/// forever with only the rotated token would strand the agent if the control
/// plane ever forgets it).
pub struct Registrar {
    client: Arc<HttpClient>,
    credentials: Arc<CredentialStore>,
    bootstrap_token: String,
    registered_tx: watch::Sender<bool>,
}

impl Registrar {
    pub fn new(client: Arc<HttpClient>, credentials: Arc<CredentialStore>, bootstrap_token: String) -> Arc<Self> {
        let (registered_tx, _) = watch::channel(false);
        Arc::new(Self { client, credentials, bootstrap_token, registered_tx })
    }

    /// Resolves once the first successful registration installs a bundle.
    pub fn registered(&self) -> watch::Receiver<bool> {
        self.registered_tx.subscribe()
    }

    /// Performs the initial `POST /api/register` call over the insecure
    /// (CA-unverified) bootstrap channel and installs the returned bundle.
    /// Must succeed before any other subsystem starts (spec.md §5).
    pub async fn bootstrap(&self, identity: &NodeIdentity) -> Result<()> {
        let request = RegisterRequest { host_ips: identity.host_ips.clone(), token: self.bootstrap_token.clone() };
        let response = self
            .client
            .register(&request)
            .await
            .map_err(|e| AgentError::BootstrapFailed(e.to_string()))?;
        self.install_response(response).await
    }

    /// Re-registers over the current, fully-verified mTLS channel
    /// (spec.md §4.D refresh transition, S6) — never drops CA verification
    /// once a credential bundle is already installed.
    async fn refresh_with(&self, token: String, identity: &NodeIdentity) -> Result<()> {
        let request = RegisterRequest { host_ips: identity.host_ips.clone(), token };
        let response = self
            .client
            .register_mtls(&request)
            .await
            .map_err(|e| AgentError::BootstrapFailed(e.to_string()))?;
        self.install_response(response).await
    }

    async fn install_response(&self, response: crate::api::RegisterResponse) -> Result<()> {
        let bundle = CredentialBundle {
            cert_pem: response.cert_pem,
            key_pem: response.key_pem,
            ca_pem: response.ca_pem,
            token: response.token,
            expire_at: chrono::DateTime::from_timestamp(response.expire_at, 0).unwrap_or_else(chrono::Utc::now),
        };
        self.credentials.install(bundle).await?;
        let _ = self.registered_tx.send(true);
        Ok(())
    }

    /// Background refresh loop: re-registers every 24h, backing off to an
    /// hourly retry cadence on failure. Exits on cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = REFRESH_INTERVAL;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("registrar refresh loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if !should_refresh(self.credentials.expire_at(), chrono::Utc::now()) {
                debug!("credential not yet within refresh window, skipping this tick");
                continue;
            }

            let identity = match crate::host::probe().await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(error = %e, "host probe failed, skipping this refresh cycle");
                    interval = REFRESH_BACKOFF;
                    continue;
                }
            };
            match self.refresh_with(self.current_token(), &identity).await {
                Ok(()) => {
                    info!("credential refresh succeeded");
                    interval = REFRESH_INTERVAL;
                }
                Err(e) => {
                    warn!(error = %e, "credential refresh failed, retrying with bootstrap token on next attempt");
                    if let Err(e2) = self.refresh_with(self.bootstrap_token.clone(), &identity).await {
                        error!(error = %e2, "bootstrap-token fallback refresh also failed");
                        interval = REFRESH_BACKOFF;
                    } else {
                        interval = REFRESH_INTERVAL;
                    }
                }
            }
        }
    }

    fn current_token(&self) -> String {
        self.credentials.get_token()
    }
}

/// Re-registration only fires once the installed credential is within
/// [`REFRESH_THRESHOLD`] of `expire_at` (spec.md §4.D).
fn should_refresh(expire_at: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> bool {
    expire_at - now < REFRESH_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RegisterResponse;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity() -> NodeIdentity {
        NodeIdentity {
            host_ips: vec!["10.0.0.5".into()],
            hostname: "node-1".into(),
            os: "linux".into(),
            os_version: "6.1".into(),
            kernel_version: "6.1.0".into(),
            cpu_total: 4,
            cpu_used_percent: 1.0,
            memory_total_bytes: 1024,
            memory_used_bytes: 128,
        }
    }

    #[tokio::test]
    async fn bootstrap_installs_returned_bundle() {
        let server = MockServer::start().await;
        let body = RegisterResponse {
            cert_pem: String::new(),
            key_pem: String::new(),
            ca_pem: String::new(),
            token: "tok-rotated".into(),
            expire_at: chrono::Utc::now().timestamp() + 3600,
        };
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let credentials = CredentialStore::new();
        let client = Arc::new(
            HttpClient::new(&server.uri(), credentials.clone(), Duration::from_secs(5)).unwrap(),
        );
        let registrar = Registrar::new(client, credentials.clone(), "boot-token".into());

        // An empty cert/key/ca bundle fails CredentialStore::install's PEM
        // parsing, so assert the call reaches the server and surfaces that
        // failure rather than silently succeeding.
        let err = registrar.bootstrap(&identity()).await.unwrap_err();
        assert!(matches!(err, AgentError::CredentialBundleInvalid(_)));
    }

    #[tokio::test]
    async fn bootstrap_failure_surfaces_as_bootstrap_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let credentials = CredentialStore::new();
        let client = Arc::new(
            HttpClient::new(&server.uri(), credentials.clone(), Duration::from_secs(5)).unwrap(),
        );
        let registrar = Registrar::new(client, credentials, "boot-token".into());

        let err = registrar.bootstrap(&identity()).await.unwrap_err();
        assert!(matches!(err, AgentError::BootstrapFailed(_)));
    }

    #[tokio::test]
    async fn refresh_uses_mtls_client_not_the_insecure_bootstrap_channel() {
        // No credential bundle has ever been installed, so `mtls_client()`
        // cannot build a client cert/key pair from an empty bundle. If
        // `refresh_with` reused the insecure bootstrap client (as it did
        // before this fix) the call would happily proceed over plain HTTP
        // against the mock server; instead it must fail locally building
        // the mTLS identity, never reaching the server at all.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/register"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let credentials = CredentialStore::new();
        let client = Arc::new(
            HttpClient::new(&server.uri(), credentials.clone(), Duration::from_secs(5)).unwrap(),
        );
        let registrar = Registrar::new(client, credentials, "boot-token".into());

        let err = registrar.refresh_with(registrar.current_token(), &identity()).await.unwrap_err();
        assert!(matches!(err, AgentError::BootstrapFailed(_)));
    }

    #[test]
    fn should_refresh_fires_only_inside_the_120h_window() {
        let now = chrono::Utc::now();
        assert!(!should_refresh(now + chrono::Duration::hours(200), now));
        assert!(should_refresh(now + chrono::Duration::hours(100), now));
        assert!(should_refresh(now - chrono::Duration::hours(1), now));
    }
}
