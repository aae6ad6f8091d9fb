//! Sync Checkpoints
//!
//! Persists the last successful sync point per data source pair. The engine
//! only advances a checkpoint after an error-free pass, so a crashed or
//! cancelled pass resumes from the last confirmed point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::errors::IntegrationResult;

/// Checkpoint persistence interface (for dependency injection).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last confirmed sync point for a pair, if one exists.
    async fn load(&self, pair: &str) -> IntegrationResult<Option<DateTime<Utc>>>;

    /// Record a new sync point for a pair.
    async fn store(&self, pair: &str, at: DateTime<Utc>) -> IntegrationResult<()>;
}

/// In-memory checkpoint store.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, pair: &str) -> IntegrationResult<Option<DateTime<Utc>>> {
        Ok(self.checkpoints.lock().get(pair).copied())
    }

    async fn store(&self, pair: &str, at: DateTime<Utc>) -> IntegrationResult<()> {
        self.checkpoints.lock().insert(pair.to_string(), at);
        Ok(())
    }
}
