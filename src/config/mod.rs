//! Client Configuration
//!
//! Fluent builder for the integration client configuration.

use std::time::Duration;
use url::Url;

use crate::errors::{IntegrationError, IntegrationResult};
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};

/// Configuration for an [`ApiClient`](crate::client::ApiClient).
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    /// Base URL requests are resolved against.
    pub base_url: Url,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Default per-call timeout.
    pub timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Circuit breaker configuration (per integration key).
    pub circuit_breaker: CircuitBreakerConfig,
    /// Rate limiter configuration (per integration key).
    pub rate_limiter: RateLimiterConfig,
}

impl IntegrationConfig {
    /// Start building a configuration for the given base URL.
    pub fn builder(base_url: &str) -> IntegrationConfigBuilder {
        IntegrationConfigBuilder {
            base_url: base_url.to_string(),
            user_agent: format!("integrations-core/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
        }
    }
}

/// Builder for [`IntegrationConfig`].
#[derive(Debug, Clone)]
pub struct IntegrationConfigBuilder {
    base_url: String,
    user_agent: String,
    timeout: Duration,
    retry: RetryConfig,
    circuit_breaker: CircuitBreakerConfig,
    rate_limiter: RateLimiterConfig,
}

impl IntegrationConfigBuilder {
    /// Set the User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the default per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Set the rate limiter configuration.
    pub fn rate_limiter(mut self, config: RateLimiterConfig) -> Self {
        self.rate_limiter = config;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> IntegrationResult<IntegrationConfig> {
        let base_url =
            Url::parse(&self.base_url).map_err(|e| IntegrationError::Configuration {
                message: format!("invalid base URL {}: {e}", self.base_url),
            })?;

        if self.timeout.is_zero() {
            return Err(IntegrationError::Configuration {
                message: "timeout must be non-zero".to_string(),
            });
        }

        Ok(IntegrationConfig {
            base_url,
            user_agent: self.user_agent,
            timeout: self.timeout,
            retry: self.retry,
            circuit_breaker: self.circuit_breaker,
            rate_limiter: self.rate_limiter,
        })
    }
}
