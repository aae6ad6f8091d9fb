//! Retry Logic
//!
//! Exponential backoff retry for outbound calls. Attempt 1 runs immediately;
//! attempt n (n > 1) waits `base_delay * 2^(n-2)`, capped and jittered.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::errors::{IntegrationError, IntegrationResult};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to each delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retries.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Retry policy executing operations with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from a configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Backoff delay before attempt `attempt` (1-based; attempt 1 has none).
    ///
    /// Without jitter the sequence is non-decreasing: base, 2*base, 4*base...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(2).min(31);
        let base = self.config.base_delay.as_millis() as f64 * 2f64.powi(exponent as i32);
        let capped = base.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter;
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Execute an operation, retrying transient failures.
    ///
    /// Non-retryable errors propagate immediately without consuming retries.
    /// Exhaustion wraps the last failure in `RetriesExhausted`.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> IntegrationResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = IntegrationResult<T>>,
    {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_retryable() {
                        return Err(error);
                    }
                    if attempt >= max_attempts {
                        return Err(IntegrationError::RetriesExhausted {
                            attempts: attempt,
                            source: Box::new(error),
                        });
                    }
                    debug!(
                        attempt,
                        error = %error,
                        "transient failure, will retry"
                    );
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ApiError, TransportError};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn api_error(status: u16) -> IntegrationError {
        IntegrationError::Api(ApiError {
            status,
            body: String::new(),
            headers: HashMap::new(),
        })
    }

    fn no_jitter_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .max_retries(max_retries)
                .base_delay(Duration::from_millis(1))
                .jitter(0.0),
        )
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let policy = RetryPolicy::new(RetryConfig::new().jitter(0.0));
        let mut previous = Duration::ZERO;
        for attempt in 1..=8 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .base_delay(Duration::from_millis(100))
                .jitter(0.0),
        );
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped_at_max_delay() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .base_delay(Duration::from_millis(100))
                .max_delay(Duration::from_millis(250))
                .jitter(0.0),
        );
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = no_jitter_policy(3);

        let counter = attempts.clone();
        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(api_error(503))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_404_never_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = no_jitter_policy(5);

        let counter = attempts.clone();
        let result: IntegrationResult<()> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(404))
                }
            })
            .await;

        assert!(matches!(result, Err(IntegrationError::Api(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let policy = no_jitter_policy(2);

        let result: IntegrationResult<()> = policy
            .execute(|| async {
                Err(IntegrationError::Transport(TransportError::Timeout {
                    timeout: Duration::from_secs(1),
                }))
            })
            .await;

        match result {
            Err(IntegrationError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, IntegrationError::Transport(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
