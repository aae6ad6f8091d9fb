//! Circuit Breaker
//!
//! Sheds load from a failing dependency. Closed counts failures within an
//! observation window; at the threshold the circuit opens and rejects calls
//! without any network attempt; after the open timeout exactly one half-open
//! trial is permitted, concurrent callers fail fast.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{IntegrationError, IntegrationResult};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through, failures counted.
    Closed,
    /// Calls rejected without a network attempt.
    Open,
    /// One trial call permitted.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window before opening.
    pub failure_threshold: u32,
    /// Observation window for the failure count.
    pub window: Duration,
    /// Time the circuit stays open before a half-open trial.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold.
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Set the observation window.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the open timeout.
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
    /// Set while the single half-open trial is in flight.
    probe_in_flight: bool,
}

/// Circuit breaker guarding one integration key.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker from a configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                window_start: Instant::now(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state, promoting Open to HalfOpen when the timeout elapsed.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock();
        self.promote_if_elapsed(&mut state);
        state.state
    }

    /// Reset to Closed with counters cleared.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.window_start = Instant::now();
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    fn promote_if_elapsed(&self, state: &mut BreakerState) {
        if state.state == CircuitState::Open {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() >= self.config.open_timeout {
                    debug!("circuit half-open, permitting one trial");
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = false;
                }
            }
        }
    }

    /// Time until the circuit leaves Open, if currently open.
    fn remaining_open(&self, state: &BreakerState) -> Option<Duration> {
        state
            .opened_at
            .map(|t| self.config.open_timeout.saturating_sub(t.elapsed()))
    }

    /// Admit or reject a call. Admission in HalfOpen claims the single probe;
    /// the permit frees the slot again if the call is dropped unsettled.
    fn try_acquire(&self) -> IntegrationResult<CallPermit<'_>> {
        let mut state = self.state.lock();
        self.promote_if_elapsed(&mut state);

        match state.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => Err(IntegrationError::CircuitOpen {
                retry_after: self.remaining_open(&state),
            }),
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(IntegrationError::CircuitOpen {
                        retry_after: Some(self.config.open_timeout),
                    })
                } else {
                    state.probe_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn release_probe(&self) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            debug!("half-open trial abandoned, releasing probe slot");
            state.probe_in_flight = false;
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
                state.window_start = Instant::now();
            }
            CircuitState::HalfOpen => {
                debug!("half-open trial succeeded, closing circuit");
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.window_start = Instant::now();
                state.opened_at = None;
                state.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                let now = Instant::now();
                if now.duration_since(state.window_start) > self.config.window {
                    state.window_start = now;
                    state.failure_count = 1;
                } else {
                    state.failure_count += 1;
                }

                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = state.failure_count,
                        "failure threshold reached, opening circuit"
                    );
                    state.state = CircuitState::Open;
                    state.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!("half-open trial failed, reopening circuit");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an operation through the breaker.
    ///
    /// The operation is the caller's whole retry sequence; its outcome counts
    /// once toward the threshold. Dropping the returned future mid-operation
    /// frees a claimed half-open probe slot rather than wedging the breaker.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> IntegrationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IntegrationResult<T>>,
    {
        let permit = self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                Err(error)
            }
        }
    }
}

/// Admission token for one call through the breaker.
///
/// Must be settled with `success` or `failure`; if dropped unsettled (the
/// call future was cancelled) a claimed half-open probe slot is released so
/// a later trial can run.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing() -> IntegrationResult<()> {
        Err(IntegrationError::Transport(TransportError::Timeout {
            timeout: Duration::from_secs(1),
        }))
    }

    async fn trip(breaker: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            let _ = breaker.execute(|| async { failing() }).await;
        }
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_rejects_without_call() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(5)
                .open_timeout(Duration::from_millis(60_000)),
        );

        trip(&breaker, 5).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = breaker
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(IntegrationError::CircuitOpen { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(5)
                .open_timeout(Duration::from_millis(60_000)),
        );

        trip(&breaker, 5).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(60_001)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = breaker
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("trial")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "trial");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_timeout() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(2)
                .open_timeout(Duration::from_secs(10)),
        );

        trip(&breaker, 2).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = breaker.execute(|| async { failing() }).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // Timeout restarted: still open just before it elapses again.
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_under_concurrent_callers() {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .open_timeout(Duration::from_secs(5)),
        ));

        trip(&breaker, 1).await;
        tokio::time::advance(Duration::from_secs(6)).await;

        // First caller claims the probe and holds it.
        let admitted = breaker.try_acquire().expect("probe slot is free");

        // Concurrent callers must fail fast while the probe is in flight.
        let second = breaker.try_acquire();
        assert!(matches!(
            second,
            Err(IntegrationError::CircuitOpen { .. })
        ));

        admitted.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_releases_probe_slot() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .open_timeout(Duration::from_secs(5)),
        );

        trip(&breaker, 1).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Caller abandons the trial before it settles.
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        // The slot is free again: a later trial runs and closes the circuit.
        let result = breaker.execute(|| async { Ok("trial") }).await;
        assert_eq!(result.unwrap(), "trial");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failures_outside_window_do_not_accumulate() {
        tokio::time::pause();
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(2)
                .window(Duration::from_secs(1)),
        );

        let _ = breaker.execute(|| async { failing() }).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        let _ = breaker.execute(|| async { failing() }).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
