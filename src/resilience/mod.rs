//! Resilience patterns for outbound calls.
//!
//! Retry with exponential backoff, circuit breaking, and adaptive rate
//! limiting. `ApiClient` composes all three per integration key.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::{
    adaptive_limit, AdaptiveRateLimiter, RateLimitDecision, RateLimiterConfig,
};
pub use retry::{RetryConfig, RetryPolicy};
