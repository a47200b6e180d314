//! HTTP client for control-plane communication.
//!
//! Kept close to the teacher's `HttpClient` (retry loop, exponential
//! backoff), narrowed per spec.md §4.E: retries fire only on transport-level
//! failures, never on HTTP status codes, and every call rebuilds its
//! `reqwest::Client` from the Credential Store's *current* client TLS config
//! so a credential swap takes effect on the very next call.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::errors::{ApiError, ApiResult};
use super::types::{HostHealthRequest, HostHealthResponse, RegisterRequest, RegisterResponse};
use crate::credentials::CredentialStore;

const MAX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

pub struct HttpClient {
    base_url: String,
    credentials: Arc<CredentialStore>,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(base_url: &str, credentials: Arc<CredentialStore>, timeout: Duration) -> ApiResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ApiError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }
        Ok(Self { base_url, credentials, timeout })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// A client presenting our current mTLS identity and trusting the
    /// control plane's CA — used for every call except bootstrap register.
    fn mtls_client(&self) -> ApiResult<Client> {
        let tls_config = self.credentials.get_client_tls().map_err(|e| ApiError::Tls(e.to_string()))?;
        Client::builder()
            .use_preconfigured_tls(tls_config)
            .timeout(self.timeout)
            .build()
            .map_err(ApiError::Request)
    }

    /// The agent cannot yet validate the control plane's cert at bootstrap —
    /// this is the one intentional `danger_accept_invalid_certs` use in the
    /// codebase (spec.md §4.D).
    fn insecure_client(&self) -> ApiResult<Client> {
        Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(self.timeout)
            .build()
            .map_err(ApiError::Request)
    }

    /// Bootstrap registration: the agent cannot yet validate the control
    /// plane's certificate, so this is the only call in the codebase that
    /// skips CA verification (spec.md §4.D).
    pub async fn register(&self, req: &RegisterRequest) -> ApiResult<RegisterResponse> {
        let client = self.insecure_client()?;
        self.register_via(&client, req).await
    }

    /// Re-registration over the already-installed, fully-verified mTLS
    /// channel (spec.md §4.D refresh transition, S6): unlike bootstrap,
    /// a refresh has a valid credential bundle already and must not drop
    /// CA verification to get it.
    pub async fn register_mtls(&self, req: &RegisterRequest) -> ApiResult<RegisterResponse> {
        let client = self.mtls_client()?;
        self.register_via(&client, req).await
    }

    async fn register_via(&self, client: &Client, req: &RegisterRequest) -> ApiResult<RegisterResponse> {
        let url = self.url("api/register");
        let response = client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { ApiError::Timeout } else { ApiError::Request(e) })?;

        self.parse_or_reject(response).await
    }

    pub async fn health(&self, req: &HostHealthRequest) -> ApiResult<HostHealthResponse> {
        self.request(Method::POST, "api/health", Some(req)).await
    }

    pub async fn get_config_blob(&self, name: &str) -> ApiResult<String> {
        let body: super::types::ConfigBlobResponse =
            self.request(Method::GET, &format!("api/config/{name}"), None::<()>).await?;
        Ok(body.content)
    }

    async fn parse_or_reject<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ApiError::RegistrationRejected(message));
        }
        let text = response.text().await.map_err(ApiError::Request)?;
        serde_json::from_str(&text).map_err(ApiError::Parse)
    }

    /// Runs one call with retries scoped to transport failures only.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<impl Serialize>,
    ) -> ApiResult<T> {
        let url = self.url(path);
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Self::calculate_backoff(attempt);
                debug!(path, attempt, ?delay, "retrying control-plane call");
                tokio::time::sleep(delay).await;
            }

            let client = self.mtls_client()?;
            let mut request = client.request(method.clone(), &url);
            let token = self.credentials.get_token();
            if !token.is_empty() {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }

            match self.execute(request).await {
                Ok(response) => return self.parse_response(response).await,
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    warn!(path, attempt, error = %e, "transient failure, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ApiError::Timeout))
    }

    async fn execute(&self, request: RequestBuilder) -> ApiResult<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Request(e)
            }
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound("resource not found".into()));
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status();
        let text = response.text().await.map_err(ApiError::Request)?;

        if !status.is_success() {
            return Err(ApiError::Server { status: status.as_u16(), message: text });
        }

        serde_json::from_str(&text).map_err(ApiError::Parse)
    }

    fn calculate_backoff(attempt: u32) -> Duration {
        let delay = BASE_RETRY_DELAY * 2u32.pow(attempt - 1);
        std::cmp::min(delay, MAX_RETRY_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;

    #[test]
    fn rejects_url_without_scheme() {
        let store = CredentialStore::new();
        let result = HttpClient::new("cp.example.com", store, Duration::from_secs(20));
        assert!(result.is_err());
    }

    #[test]
    fn normalizes_trailing_slash() {
        let store = CredentialStore::new();
        let client = HttpClient::new("https://cp.example.com/", store, Duration::from_secs(20)).unwrap();
        assert_eq!(client.url("api/health"), "https://cp.example.com/api/health");
    }

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(HttpClient::calculate_backoff(1), Duration::from_millis(500));
        assert_eq!(HttpClient::calculate_backoff(2), Duration::from_millis(1000));
        assert_eq!(HttpClient::calculate_backoff(3), Duration::from_millis(2000));
    }
}
