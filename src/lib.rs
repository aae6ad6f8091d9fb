//! Integrations Core
//!
//! Resilience and lifecycle building blocks for third-party API
//! integrations: outbound calls wrapped in retry, circuit breaking, and
//! adaptive rate limiting; OAuth2 token management with single-flight
//! refresh; exactly-once webhook receiving; and bidirectional data sync.
//!
//! # Features
//!
//! - Exponential-backoff retry with jitter and retryable-error classification
//! - Per-integration circuit breaker (closed / open / half-open, single probe)
//! - Adaptive per-key rate limiter that sheds load as error rates climb
//! - `ApiClient` composing limiter, breaker, and retry around a transport
//! - OAuth2 token manager: expiry-skewed refresh, single-flight per client
//! - Webhook receiver: HMAC verification, dedup, provider dispatch
//! - `SyncEngine`: conflict detection and pluggable resolution over a
//!   local/remote source pair with checkpointed passes
//!
//! # Example
//!
//! ```rust,ignore
//! use integrations_core::{ApiClient, ApiRequest, IntegrationConfig};
//! use integrations_core::transport::ReqwestTransport;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IntegrationConfig::builder("https://api.example.com")
//!         .user_agent("acme-sync/1.0")
//!         .build()?;
//!
//!     let client = ApiClient::new(config, Arc::new(ReqwestTransport::new()));
//!     let response = client
//!         .request(&"crm".into(), ApiRequest::get("/v1/contacts"))
//!         .await?;
//!
//!     println!("status: {}", response.status);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `errors`: error hierarchy with retryability classification
//! - `transport`: HTTP abstraction (reqwest-backed and mock implementations)
//! - `config`: fluent configuration builders
//! - `resilience`: retry policy, circuit breaker, adaptive rate limiter
//! - `client`: high-level API client combining the resilience layers
//! - `token`: OAuth2 token lifecycle (storage, manager)
//! - `webhooks`: inbound delivery verification, dedup, and dispatch
//! - `sync`: bidirectional reconciliation over data source pairs

pub mod client;
pub mod config;
pub mod errors;
pub mod resilience;
pub mod sync;
pub mod token;
pub mod transport;
pub mod webhooks;

// Re-export the high-level client
pub use client::{ApiClient, ApiRequest, IntegrationKey};

// Re-export configuration
pub use config::{IntegrationConfig, IntegrationConfigBuilder};

// Re-export errors
pub use errors::{
    ApiError, IntegrationError, IntegrationResult, ProtocolError, StorageError, SyncError,
    TokenError, TransportError, WebhookError,
};

// Re-export transport
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockTransport, ReqwestTransport,
};

// Re-export resilience primitives
pub use resilience::{
    AdaptiveRateLimiter, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitDecision,
    RateLimiterConfig, RetryConfig, RetryPolicy,
};

// Re-export token management
pub use token::{
    InMemoryTokenStorage, OAuth2TokenManager, TokenManagerConfig, TokenResponse, TokenSet,
    TokenStorage,
};

// Re-export webhooks
pub use webhooks::{
    ClaimOutcome, EventStore, InMemoryEventStore, ProviderRegistration, SignatureScheme,
    WebhookEvent, WebhookProcessor, WebhookReceiver, WebhookResponse,
};

// Re-export sync
pub use sync::{
    Change, ChangeOrigin, CheckpointStore, Conflict, ConflictKind, ConflictResolver, DataSource,
    InMemoryCheckpointStore, InMemoryDataSource, LatestWins, Resolution, SyncEngine, SyncResult,
    TieBreak,
};
