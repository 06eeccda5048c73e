pub mod breaker;
pub mod limiter;
pub mod types;

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

use crate::metrics;
use breaker::{CircuitBreaker, CircuitState};
use limiter::RateLimiter;
use types::*;

/* ============================= CONFIG ============================= */

const DEFAULT_BASE_URL: &str = "https://api.vpsie.com/apps/v2";
const DEFAULT_RATE_PER_MINUTE: u32 = 100;

/// Bearer tokens are refreshed this long before their reported expiry.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

const RETRY_BASE_DELAY_MS: u64 = 200;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
/// Retries after the first attempt; 3 attempts total.
const RETRY_COUNT: usize = 2;

/* ============================= ERRORS ============================= */

/// Error taxonomy for the cloud API.
///
/// Only `ServerError` (5xx), `Timeout`, and `Transport` are retried.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("unauthorized: credentials rejected")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited,

    #[error("server error (status {status})")]
    ServerError { status: u16 },

    #[error("circuit open")]
    CircuitOpen,

    #[error("timeout")]
    Timeout,

    #[error("transport: {0}")]
    Transport(String),

    #[error("decode: {0}")]
    Decode(String),
}

impl CloudError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::ServerError { status } => *status >= 500,
            CloudError::Timeout | CloudError::Transport(_) => true,
            _ => false,
        }
    }

    /// Stable label for the errors-by-kind metric.
    pub fn kind(&self) -> &'static str {
        match self {
            CloudError::Unauthorized => "unauthorized",
            CloudError::Forbidden => "forbidden",
            CloudError::NotFound => "not_found",
            CloudError::RateLimited => "rate_limited",
            CloudError::ServerError { .. } => "server_error",
            CloudError::CircuitOpen => "circuit_open",
            CloudError::Timeout => "timeout",
            CloudError::Transport(_) => "transport",
            CloudError::Decode(_) => "decode",
        }
    }
}

fn classify_status(status: StatusCode) -> CloudError {
    match status {
        StatusCode::UNAUTHORIZED => CloudError::Unauthorized,
        StatusCode::FORBIDDEN => CloudError::Forbidden,
        StatusCode::NOT_FOUND => CloudError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => CloudError::RateLimited,
        other => CloudError::ServerError {
            status: other.as_u16(),
        },
    }
}

fn map_reqwest(err: reqwest::Error) -> CloudError {
    if err.is_timeout() {
        CloudError::Timeout
    } else {
        CloudError::Transport(err.to_string())
    }
}

/* ============================= CREDENTIALS ============================= */

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

struct TokenState {
    value: Option<String>,
    expires_at: Option<Instant>,
}

/* ============================= CLIENT ============================= */

/// Typed client for the VPSie REST API.
///
/// Owns the rate limiter, circuit breaker, and cached bearer token; share it
/// as `Arc<VpsieClient>` across consumers.
pub struct VpsieClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    token: Mutex<TokenState>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl VpsieClient {
    pub fn new(credentials: Credentials, base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            credentials,
            token: Mutex::new(TokenState {
                value: None,
                expires_at: None,
            }),
            limiter: RateLimiter::new(DEFAULT_RATE_PER_MINUTE),
            breaker: CircuitBreaker::default(),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /* ── auth ── */

    async fn bearer(&self, deadline: Duration) -> Result<String, CloudError> {
        {
            let token = self.token.lock().await;
            if let (Some(value), Some(expires_at)) = (&token.value, token.expires_at)
                && Instant::now() < expires_at
            {
                return Ok(value.clone());
            }
        }
        self.refresh_token(deadline).await
    }

    async fn refresh_token(&self, deadline: Duration) -> Result<String, CloudError> {
        let response = self
            .http
            .post(format!("{}/token", self.base_url))
            .json(&TokenRequest {
                client_id: self.credentials.client_id.clone(),
                client_secret: self.credentials.client_secret.clone(),
            })
            .timeout(deadline)
            .send()
            .await
            .map_err(map_reqwest)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status()));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            CloudError::Decode(e.to_string())
        })?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_SKEW);
        let mut state = self.token.lock().await;
        state.value = Some(token.access_token.clone());
        state.expires_at = Some(Instant::now() + lifetime);

        debug!(expires_in = token.expires_in, "cloud_token_refreshed");
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        let mut state = self.token.lock().await;
        state.value = None;
        state.expires_at = None;
    }

    /* ── request core ── */

    /// One rate-limited, breaker-guarded, retried request; returns raw bytes.
    async fn request_raw(
        &self,
        endpoint: &'static str,
        method: Method,
        path: String,
        body: Option<serde_json::Value>,
        deadline: Duration,
    ) -> Result<Vec<u8>, CloudError> {
        let start = Instant::now();

        metrics::CLOUD_API_REQUESTS
            .with_label_values(&[endpoint])
            .inc();

        if !self.limiter.acquire(deadline).await {
            metrics::CLOUD_RATE_LIMITED.inc();
            metrics::CLOUD_API_ERRORS
                .with_label_values(&["rate_limited"])
                .inc();
            return Err(CloudError::RateLimited);
        }

        let strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .max_delay(RETRY_MAX_DELAY)
            .map(jitter)
            .take(RETRY_COUNT);

        let result = RetryIf::spawn(
            strategy,
            || self.attempt(&method, &path, body.as_ref(), start, deadline),
            |err: &CloudError| err.is_retryable(),
        )
        .await;

        metrics::CLOUD_CIRCUIT_STATE.set(match self.breaker.state() {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        });

        if let Err(err) = &result {
            metrics::CLOUD_API_ERRORS
                .with_label_values(&[err.kind()])
                .inc();
            warn!(endpoint, error = %err, "cloud_request_failed");
        }

        result
    }

    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        start: Instant,
        deadline: Duration,
    ) -> Result<Vec<u8>, CloudError> {
        let remaining = deadline
            .checked_sub(start.elapsed())
            .ok_or(CloudError::Timeout)?;

        if !self.breaker.check() {
            return Err(CloudError::CircuitOpen);
        }

        let outcome = self.send_once(method, path, body, remaining).await;

        // A 401 mid-flight means the cached token went stale; refresh and
        // retry the request once before giving up.
        let outcome = match outcome {
            Err(CloudError::Unauthorized) => {
                self.invalidate_token().await;
                let remaining = deadline
                    .checked_sub(start.elapsed())
                    .ok_or(CloudError::Timeout)?;
                self.send_once(method, path, body, remaining).await
            }
            other => other,
        };

        match &outcome {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.is_retryable() => self.breaker.record_failure(),
            Err(_) => {}
        }

        outcome
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        remaining: Duration,
    ) -> Result<Vec<u8>, CloudError> {
        let token = self.bearer(remaining).await?;

        let mut request = self
            .http
            .request(method.clone(), format!("{}/{}", self.base_url, path))
            .bearer_auth(token)
            .timeout(remaining);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(map_reqwest)?;
        let status = response.status();

        if !status.is_success() {
            return Err(classify_status(status));
        }

        let bytes = response.bytes().await.map_err(map_reqwest)?;
        Ok(bytes.to_vec())
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: String,
        deadline: Duration,
    ) -> Result<Vec<T>, CloudError> {
        let bytes = self
            .request_raw(endpoint, Method::GET, path, None, deadline)
            .await?;
        let envelope: ListResponse<T> =
            serde_json::from_slice(&bytes).map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn get_item<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: String,
        deadline: Duration,
    ) -> Result<T, CloudError> {
        let bytes = self
            .request_raw(endpoint, Method::GET, path, None, deadline)
            .await?;
        let envelope: ItemResponse<T> =
            serde_json::from_slice(&bytes).map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    /* ── catalog ── */

    pub async fn list_offers(
        &self,
        datacenter: Option<&str>,
        deadline: Duration,
    ) -> Result<Vec<Offer>, CloudError> {
        let path = match datacenter {
            Some(dc) => format!("offers?datacenterId={dc}"),
            None => "offers".to_string(),
        };
        self.get_list("list_offers", path, deadline).await
    }

    pub async fn list_datacenters(&self, deadline: Duration) -> Result<Vec<Datacenter>, CloudError> {
        self.get_list("list_datacenters", "datacenters".to_string(), deadline)
            .await
    }

    pub async fn list_images(&self, deadline: Duration) -> Result<Vec<OsImage>, CloudError> {
        self.get_list("list_images", "images".to_string(), deadline)
            .await
    }

    /* ── VMs ── */

    pub async fn list_vms(&self, deadline: Duration) -> Result<Vec<Vm>, CloudError> {
        self.get_list("list_vms", "vms".to_string(), deadline).await
    }

    pub async fn get_vm(&self, id: i64, deadline: Duration) -> Result<Vm, CloudError> {
        self.get_item("get_vm", format!("vms/{id}"), deadline).await
    }

    pub async fn create_vm(
        &self,
        request: &CreateVmRequest,
        deadline: Duration,
    ) -> Result<Vm, CloudError> {
        let body = serde_json::to_value(request).map_err(|e| CloudError::Decode(e.to_string()))?;
        let bytes = self
            .request_raw("create_vm", Method::POST, "vms".to_string(), Some(body), deadline)
            .await?;
        let envelope: ItemResponse<Vm> =
            serde_json::from_slice(&bytes).map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    pub async fn delete_vm(&self, id: i64, deadline: Duration) -> Result<(), CloudError> {
        self.request_raw("delete_vm", Method::DELETE, format!("vms/{id}"), None, deadline)
            .await?;
        Ok(())
    }

    pub async fn vm_action(
        &self,
        id: i64,
        action: &str,
        deadline: Duration,
    ) -> Result<(), CloudError> {
        let body = serde_json::to_value(VmActionRequest {
            action: action.to_string(),
        })
        .map_err(|e| CloudError::Decode(e.to_string()))?;
        self.request_raw(
            "vm_action",
            Method::POST,
            format!("vms/{id}/action"),
            Some(body),
            deadline,
        )
        .await?;
        Ok(())
    }

    /* ── managed kubernetes ── */

    pub async fn list_k8s_clusters(&self, deadline: Duration) -> Result<Vec<K8sCluster>, CloudError> {
        self.get_list(
            "list_k8s_clusters",
            "kubernetes/clusters".to_string(),
            deadline,
        )
        .await
    }

    pub async fn list_k8s_offers(&self, deadline: Duration) -> Result<Vec<Offer>, CloudError> {
        self.get_list("list_k8s_offers", "kubernetes/offers".to_string(), deadline)
            .await
    }

    pub async fn list_k8s_groups(
        &self,
        cluster: &str,
        deadline: Duration,
    ) -> Result<Vec<K8sGroup>, CloudError> {
        self.get_list(
            "list_k8s_groups",
            format!("kubernetes/clusters/{cluster}/groups"),
            deadline,
        )
        .await
    }

    pub async fn create_k8s_group(
        &self,
        request: &CreateK8sGroupRequest,
        deadline: Duration,
    ) -> Result<K8sGroup, CloudError> {
        let body = serde_json::to_value(request).map_err(|e| CloudError::Decode(e.to_string()))?;
        let bytes = self
            .request_raw(
                "create_k8s_group",
                Method::POST,
                "kubernetes/groups".to_string(),
                Some(body),
                deadline,
            )
            .await?;
        let envelope: ItemResponse<K8sGroup> =
            serde_json::from_slice(&bytes).map_err(|e| CloudError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}

/* ============================= TESTS ============================= */
