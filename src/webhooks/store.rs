//! Webhook Event Store
//!
//! Deduplication ledger keyed by `(provider, event_id)`. A delivery must be
//! claimed before its processor runs; the claim is atomic so concurrent
//! redeliveries of the same event execute the processor at most once.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::errors::IntegrationResult;

/// Result of attempting to claim an event for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Event is new; the caller owns processing.
    Claimed,
    /// Event was already processed successfully.
    AlreadyProcessed,
    /// Another delivery of this event is being processed right now.
    InFlight,
}

/// Processing state tracked per event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EventStatus {
    InFlight,
    Processed,
}

/// Dedup ledger interface (for dependency injection).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically claim an event. Only a `Claimed` outcome permits running
    /// the processor.
    async fn claim(&self, provider: &str, event_id: &str) -> IntegrationResult<ClaimOutcome>;

    /// Mark a claimed event as processed. Later claims return
    /// `AlreadyProcessed`.
    async fn mark_processed(&self, provider: &str, event_id: &str) -> IntegrationResult<()>;

    /// Release a claim after a processing failure, recording the error.
    /// The next delivery of the event may claim it again.
    async fn release(
        &self,
        provider: &str,
        event_id: &str,
        error: &str,
    ) -> IntegrationResult<()>;
}

/// In-memory event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: Mutex<HashMap<(String, String), EventStatus>>,
    failures: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last recorded processing failure for an event, if any.
    pub fn last_failure(&self, provider: &str, event_id: &str) -> Option<String> {
        self.failures
            .lock()
            .get(&(provider.to_string(), event_id.to_string()))
            .cloned()
    }

    /// Number of events marked processed.
    pub fn processed_count(&self) -> usize {
        self.events
            .lock()
            .values()
            .filter(|s| **s == EventStatus::Processed)
            .count()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn claim(&self, provider: &str, event_id: &str) -> IntegrationResult<ClaimOutcome> {
        let key = (provider.to_string(), event_id.to_string());
        let mut events = self.events.lock();
        match events.get(&key) {
            Some(EventStatus::Processed) => Ok(ClaimOutcome::AlreadyProcessed),
            Some(EventStatus::InFlight) => Ok(ClaimOutcome::InFlight),
            None => {
                events.insert(key, EventStatus::InFlight);
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn mark_processed(&self, provider: &str, event_id: &str) -> IntegrationResult<()> {
        let key = (provider.to_string(), event_id.to_string());
        self.events.lock().insert(key, EventStatus::Processed);
        Ok(())
    }

    async fn release(
        &self,
        provider: &str,
        event_id: &str,
        error: &str,
    ) -> IntegrationResult<()> {
        let key = (provider.to_string(), event_id.to_string());
        self.events.lock().remove(&key);
        self.failures.lock().insert(key, error.to_string());
        Ok(())
    }
}
