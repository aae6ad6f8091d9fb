//! API Client
//!
//! Outbound HTTP calls composed through the resilience stack. Per integration
//! key the client keeps one circuit breaker and one rate limit budget in an
//! explicit registry; the breaker wraps the whole retry sequence so one
//! exhausted retry run counts as a single breaker failure.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::IntegrationConfig;
use crate::errors::{ApiError, IntegrationError, IntegrationResult, ProtocolError};
use crate::resilience::{AdaptiveRateLimiter, CircuitBreaker, RetryPolicy};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Identifies one integration (tenant, provider, connection) for circuit
/// breaker and rate limit bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntegrationKey(String);

impl IntegrationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IntegrationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IntegrationKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One outbound API request. Immutable once issued.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the configured base URL.
    pub path: String,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
    /// Idempotency key, sent as `idempotency-key`.
    pub idempotency_key: Option<String>,
}

impl ApiRequest {
    /// Create a request with method and path.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
            idempotency_key: None,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Shorthand for a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a JSON body.
    pub fn json_body<T: serde::Serialize>(mut self, body: &T) -> IntegrationResult<Self> {
        self.body = Some(serde_json::to_string(body).map_err(|e| {
            IntegrationError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })?);
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Set a raw body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the idempotency key.
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// API client sharing one transport across concurrent callers.
pub struct ApiClient<T: HttpTransport> {
    config: IntegrationConfig,
    transport: Arc<T>,
    retry: RetryPolicy,
    limiter: AdaptiveRateLimiter,
    breakers: RwLock<HashMap<IntegrationKey, Arc<CircuitBreaker>>>,
}

impl<T: HttpTransport> ApiClient<T> {
    /// Create a client from a configuration and transport.
    pub fn new(config: IntegrationConfig, transport: Arc<T>) -> Self {
        Self {
            retry: RetryPolicy::new(config.retry.clone()),
            limiter: AdaptiveRateLimiter::new(config.rate_limiter.clone()),
            breakers: RwLock::new(HashMap::new()),
            config,
            transport,
        }
    }

    /// Breaker for `key`, created on first use.
    fn breaker(&self, key: &IntegrationKey) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone()))
            })
            .clone()
    }

    /// Current circuit state for `key`.
    pub fn circuit_state(&self, key: &IntegrationKey) -> crate::resilience::CircuitState {
        self.breaker(key).state()
    }

    fn build_http_request(
        &self,
        request: &ApiRequest,
        request_id: &str,
    ) -> IntegrationResult<HttpRequest> {
        let url = self
            .config
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| IntegrationError::Configuration {
                message: format!("invalid request path {}: {e}", request.path),
            })?;

        let mut headers = request.headers.clone();
        headers.insert("x-request-id".to_string(), request_id.to_string());
        headers.insert("user-agent".to_string(), self.config.user_agent.clone());
        if let Some(key) = &request.idempotency_key {
            headers.insert("idempotency-key".to_string(), key.clone());
        }

        Ok(HttpRequest {
            method: request.method,
            url: url.to_string(),
            headers,
            body: request.body.clone(),
            timeout: Some(request.timeout.unwrap_or(self.config.timeout)),
        })
    }

    /// Issue a request under `key`, applying rate limiting, circuit breaking,
    /// and retries.
    #[instrument(skip(self, request), fields(key = %key, method = request.method.as_str(), path = %request.path))]
    pub async fn request(
        &self,
        key: &IntegrationKey,
        request: ApiRequest,
    ) -> IntegrationResult<HttpResponse> {
        let decision = self.limiter.check(key.as_str());
        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or_default();
            warn!(key = %key, retry_after_secs = retry_after.as_secs(), "request rate limited");
            return Err(IntegrationError::RateLimited { retry_after });
        }

        let request_id = Uuid::new_v4().to_string();
        debug!(
            key = %key,
            request_id = %request_id,
            method = request.method.as_str(),
            path = %request.path,
            "issuing request"
        );

        let http_request = self.build_http_request(&request, &request_id)?;
        let breaker = self.breaker(key);
        let transport = self.transport.clone();
        let retry = &self.retry;

        let result = breaker
            .execute(|| {
                retry.execute(|| {
                    let transport = transport.clone();
                    let http_request = http_request.clone();
                    async move { Self::raw_call(transport, http_request).await }
                })
            })
            .await;

        // Fail-fast rejections never reached the dependency and must not
        // shape the next window's budget.
        if !matches!(result, Err(IntegrationError::CircuitOpen { .. })) {
            self.limiter.record_outcome(key.as_str(), result.is_ok());
        }

        if let Err(error) = &result {
            warn!(
                key = %key,
                request_id = %request_id,
                error = %error,
                code = error.error_code(),
                "request failed"
            );
        }

        result
    }

    /// Issue a request and deserialize the JSON response body.
    pub async fn request_json<R: DeserializeOwned>(
        &self,
        key: &IntegrationKey,
        request: ApiRequest,
    ) -> IntegrationResult<R> {
        let response = self.request(key, request).await?;
        serde_json::from_str(&response.body).map_err(|e| {
            IntegrationError::Protocol(ProtocolError::InvalidJson {
                message: e.to_string(),
            })
        })
    }

    /// One network attempt. Non-success statuses become `ApiError`.
    async fn raw_call(
        transport: Arc<T>,
        request: HttpRequest,
    ) -> IntegrationResult<HttpResponse> {
        let response = transport.send(request).await?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(IntegrationError::Api(ApiError {
                status: response.status,
                body: response.body,
                headers: response.headers,
            }))
        }
    }
}

impl<T: HttpTransport> std::fmt::Debug for ApiClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("breakers", &self.breakers.read().len())
            .finish()
    }
}
