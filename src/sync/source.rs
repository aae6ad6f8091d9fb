//! Sync Data Sources
//!
//! A `DataSource` exposes changes since a point in time and accepts changes
//! applied from the other side of a sync pair. The in-memory implementation
//! backs tests and supports per-id apply fault injection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::errors::{IntegrationResult, SyncError};
use crate::sync::Change;

/// One side of a sync pair.
#[async_trait]
pub trait DataSource<T>: Send + Sync
where
    T: Clone + Send + Sync,
{
    /// Name used in error reporting (e.g. `local`, `remote`).
    fn origin(&self) -> &str;

    /// Changes recorded strictly after `since`; all changes when `None`.
    async fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> IntegrationResult<Vec<Change<T>>>;

    /// Apply a change that originated on the other side.
    async fn apply(&self, change: &Change<T>) -> IntegrationResult<()>;
}

/// In-memory data source.
pub struct InMemoryDataSource<T> {
    origin: String,
    /// Locally-originated changes, in recording order.
    log: Mutex<Vec<Change<T>>>,
    /// Current record state by id (`None` payload = deleted).
    records: Mutex<HashMap<String, Change<T>>>,
    /// Foreign changes accepted through `apply`.
    applied: Mutex<Vec<Change<T>>>,
    /// Ids for which `apply` fails (fault injection).
    fail_apply: Mutex<HashSet<String>>,
}

impl<T: Clone + Send + Sync> InMemoryDataSource<T> {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            log: Mutex::new(Vec::new()),
            records: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            fail_apply: Mutex::new(HashSet::new()),
        }
    }

    /// Record a change made on this side. It will surface from
    /// `changes_since` but is not an applied foreign change.
    pub fn record_change(&self, change: Change<T>) {
        self.records
            .lock()
            .insert(change.id.clone(), change.clone());
        self.log.lock().push(change);
    }

    /// Make `apply` fail for the given id.
    pub fn fail_apply_for(&self, id: impl Into<String>) {
        self.fail_apply.lock().insert(id.into());
    }

    /// Current record for an id, if any change has touched it.
    pub fn record(&self, id: &str) -> Option<Change<T>> {
        self.records.lock().get(id).cloned()
    }

    /// Foreign changes accepted through `apply`, in arrival order.
    pub fn applied(&self) -> Vec<Change<T>> {
        self.applied.lock().clone()
    }

    /// Number of foreign changes applied to this side.
    pub fn applied_count(&self) -> usize {
        self.applied.lock().len()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> DataSource<T> for InMemoryDataSource<T> {
    fn origin(&self) -> &str {
        &self.origin
    }

    async fn changes_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> IntegrationResult<Vec<Change<T>>> {
        let log = self.log.lock();
        Ok(log
            .iter()
            .filter(|c| since.map_or(true, |s| c.timestamp > s))
            .cloned()
            .collect())
    }

    async fn apply(&self, change: &Change<T>) -> IntegrationResult<()> {
        if self.fail_apply.lock().contains(&change.id) {
            return Err(SyncError::ApplyFailed {
                id: change.id.clone(),
                message: format!("injected apply failure on {}", self.origin),
            }
            .into());
        }
        self.records
            .lock()
            .insert(change.id.clone(), change.clone());
        self.applied.lock().push(change.clone());
        Ok(())
    }
}
