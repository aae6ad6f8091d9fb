//! Bidirectional Sync
//!
//! Reconciles a local and a remote data source: fetches changes on both
//! sides since the last checkpoint, detects conflicts by id, resolves them
//! through a pluggable policy, and applies the remainder in both directions.
//! A pass is best-effort: one failed apply is recorded and the rest of the
//! pass continues. The checkpoint only advances to the pass start time after
//! an error-free pass, so changes made during a long pass are not skipped
//! and an interrupted pass resumes from the last confirmed point.

pub mod checkpoint;
pub mod resolver;
pub mod source;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use resolver::{ConflictResolver, LatestWins, ManualResolution, Resolution, TieBreak};
pub use source::{DataSource, InMemoryDataSource};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::errors::{IntegrationError, IntegrationResult, SyncError};

/// Which side of a sync pair a change originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// A single record mutation. `payload: None` denotes a deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct Change<T> {
    pub id: String,
    pub payload: Option<T>,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub origin: ChangeOrigin,
}

/// How two changes to the same id disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Both sides updated the record.
    ConcurrentUpdate,
    /// One side deleted the record while the other updated it.
    DeleteUpdate,
}

/// Two changes to the same id within one pass that disagree on
/// payload or version.
#[derive(Debug, Clone)]
pub struct Conflict<T> {
    pub id: String,
    pub local: Change<T>,
    pub remote: Change<T>,
    pub kind: ConflictKind,
}

/// Outcome of one sync pass. Immutable once returned.
#[derive(Debug)]
pub struct SyncResult<T> {
    /// Local changes applied to the remote side.
    pub pushed: usize,
    /// Remote changes applied to the local side.
    pub pulled: usize,
    /// Conflicts the resolution policy declined to pick a winner for,
    /// left unapplied on both sides.
    pub conflicts: Vec<Conflict<T>>,
    /// Per-change failures; the pass continued past each one.
    pub errors: Vec<SyncError>,
}

/// Bidirectional sync engine for one local/remote pair.
///
/// Sources are expected to report at most one change per record id per
/// fetch (coalesced to the latest state).
pub struct SyncEngine<T> {
    pair: String,
    local: Arc<dyn DataSource<T>>,
    remote: Arc<dyn DataSource<T>>,
    checkpoints: Arc<dyn CheckpointStore>,
    resolver: Box<dyn ConflictResolver<T>>,
    // Serializes passes so checkpoint advancement stays monotonic.
    pass_lock: tokio::sync::Mutex<()>,
}

impl<T> SyncEngine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an engine with the default most-recent-wins resolution.
    pub fn new(
        pair: impl Into<String>,
        local: Arc<dyn DataSource<T>>,
        remote: Arc<dyn DataSource<T>>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            pair: pair.into(),
            local,
            remote,
            checkpoints,
            resolver: Box::new(LatestWins::default()),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the conflict resolution policy.
    pub fn with_resolver(mut self, resolver: Box<dyn ConflictResolver<T>>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run one sync pass. Concurrent calls on the same engine serialize.
    #[instrument(skip(self), fields(pair = %self.pair))]
    pub async fn sync(&self) -> IntegrationResult<SyncResult<T>> {
        let _pass = self.pass_lock.lock().await;
        let pass_start = Utc::now();
        let since = self.checkpoints.load(&self.pair).await?;

        let local_changes = self
            .local
            .changes_since(since)
            .await
            .map_err(|e| fetch_failed(self.local.origin(), e))?;
        let remote_changes = self
            .remote
            .changes_since(since)
            .await
            .map_err(|e| fetch_failed(self.remote.origin(), e))?;

        debug!(
            pair = %self.pair,
            local = local_changes.len(),
            remote = remote_changes.len(),
            "sync pass started"
        );

        // Pair up changes by id; identical changes on both sides are
        // already convergent and drop out entirely.
        let mut remote_by_id: HashMap<String, Change<T>> = remote_changes
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();

        let mut to_push = Vec::new();
        let mut contested = Vec::new();
        for local_change in local_changes {
            match remote_by_id.remove(&local_change.id) {
                Some(remote_change) => {
                    if local_change.version == remote_change.version
                        && local_change.payload == remote_change.payload
                    {
                        continue;
                    }
                    contested.push((local_change, remote_change));
                }
                None => to_push.push(local_change),
            }
        }
        let to_pull: Vec<Change<T>> = remote_changes
            .into_iter()
            .filter(|c| remote_by_id.contains_key(&c.id))
            .collect();

        let mut result = SyncResult {
            pushed: 0,
            pulled: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
        };

        for (local_change, remote_change) in contested {
            let conflict = Conflict {
                id: local_change.id.clone(),
                kind: classify(&local_change, &remote_change),
                local: local_change,
                remote: remote_change,
            };
            match self.resolver.resolve(&conflict) {
                Resolution::UseLocal => {
                    self.apply(&*self.remote, &conflict.local, &mut result.pushed, &mut result.errors)
                        .await;
                }
                Resolution::UseRemote => {
                    self.apply(&*self.local, &conflict.remote, &mut result.pulled, &mut result.errors)
                        .await;
                }
                Resolution::Unresolved => {
                    warn!(pair = %self.pair, id = %conflict.id, "conflict left unresolved");
                    result.conflicts.push(conflict);
                }
            }
        }

        for change in &to_push {
            self.apply(&*self.remote, change, &mut result.pushed, &mut result.errors)
                .await;
        }
        for change in &to_pull {
            self.apply(&*self.local, change, &mut result.pulled, &mut result.errors)
                .await;
        }

        if result.errors.is_empty() {
            if let Err(e) = self.checkpoints.store(&self.pair, pass_start).await {
                result.errors.push(SyncError::CheckpointFailed {
                    message: e.to_string(),
                });
            }
        }

        debug!(
            pair = %self.pair,
            pushed = result.pushed,
            pulled = result.pulled,
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            "sync pass finished"
        );
        Ok(result)
    }

    async fn apply(
        &self,
        target: &dyn DataSource<T>,
        change: &Change<T>,
        counter: &mut usize,
        errors: &mut Vec<SyncError>,
    ) {
        match target.apply(change).await {
            Ok(()) => *counter += 1,
            Err(e) => {
                warn!(
                    pair = %self.pair,
                    id = %change.id,
                    target = target.origin(),
                    error = %e,
                    "failed to apply change"
                );
                errors.push(apply_failed(&change.id, e));
            }
        }
    }
}

fn classify<T>(local: &Change<T>, remote: &Change<T>) -> ConflictKind {
    if local.payload.is_none() || remote.payload.is_none() {
        ConflictKind::DeleteUpdate
    } else {
        ConflictKind::ConcurrentUpdate
    }
}

fn fetch_failed(origin: &str, e: IntegrationError) -> IntegrationError {
    match e {
        IntegrationError::Sync(sync_err) => sync_err.into(),
        other => SyncError::FetchFailed {
            origin: origin.to_string(),
            message: other.to_string(),
        }
        .into(),
    }
}

fn apply_failed(id: &str, e: IntegrationError) -> SyncError {
    match e {
        IntegrationError::Sync(sync_err) => sync_err,
        other => SyncError::ApplyFailed {
            id: id.to_string(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn change(
        id: &str,
        payload: Option<&str>,
        version: u64,
        age_secs: i64,
        origin: ChangeOrigin,
    ) -> Change<String> {
        Change {
            id: id.to_string(),
            payload: payload.map(str::to_string),
            version,
            timestamp: Utc::now() - Duration::seconds(age_secs),
            origin,
        }
    }

    fn engine(
        local: Arc<InMemoryDataSource<String>>,
        remote: Arc<InMemoryDataSource<String>>,
        checkpoints: Arc<InMemoryCheckpointStore>,
    ) -> SyncEngine<String> {
        SyncEngine::new("crm-pair", local, remote, checkpoints)
    }

    #[tokio::test]
    async fn test_push_and_pull_non_conflicting() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        local.record_change(change("a", Some("1"), 1, 30, ChangeOrigin::Local));
        local.record_change(change("b", Some("2"), 1, 20, ChangeOrigin::Local));
        remote.record_change(change("c", Some("3"), 1, 10, ChangeOrigin::Remote));

        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let result = engine(local.clone(), remote.clone(), checkpoints.clone())
            .sync()
            .await
            .unwrap();

        assert_eq!(result.pushed, 2);
        assert_eq!(result.pulled, 1);
        assert!(result.conflicts.is_empty());
        assert!(result.errors.is_empty());
        assert_eq!(remote.applied_count(), 2);
        assert_eq!(local.applied_count(), 1);
        assert!(checkpoints.load("crm-pair").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_newer_local_change_wins_conflict() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        // Local edit is more recent than the remote edit to the same record.
        local.record_change(change("rec", Some("local-v2"), 2, 10, ChangeOrigin::Local));
        remote.record_change(change("rec", Some("remote-v2"), 2, 60, ChangeOrigin::Remote));

        let result = engine(
            local.clone(),
            remote.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .sync()
        .await
        .unwrap();

        assert_eq!(result.pushed, 1);
        assert_eq!(result.pulled, 0);
        assert!(result.conflicts.is_empty());
        assert_eq!(
            remote.record("rec").unwrap().payload.as_deref(),
            Some("local-v2")
        );
        // The losing local copy was not overwritten.
        assert_eq!(
            local.record("rec").unwrap().payload.as_deref(),
            Some("local-v2")
        );
    }

    #[tokio::test]
    async fn test_delete_update_conflict_classified_and_resolved() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        local.record_change(change("rec", None, 3, 5, ChangeOrigin::Local));
        remote.record_change(change("rec", Some("edited"), 3, 60, ChangeOrigin::Remote));

        let result = engine(
            local.clone(),
            remote.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .sync()
        .await
        .unwrap();

        // The newer deletion wins and propagates to remote.
        assert_eq!(result.pushed, 1);
        assert!(remote.record("rec").unwrap().payload.is_none());
    }

    #[tokio::test]
    async fn test_unresolved_conflicts_surface_and_apply_nothing() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        local.record_change(change("rec", Some("l"), 2, 10, ChangeOrigin::Local));
        remote.record_change(change("rec", Some("r"), 2, 20, ChangeOrigin::Remote));

        let result = engine(
            local.clone(),
            remote.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .with_resolver(Box::new(ManualResolution))
        .sync()
        .await
        .unwrap();

        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::ConcurrentUpdate);
        assert_eq!(result.pushed, 0);
        assert_eq!(result.pulled, 0);
        assert_eq!(local.applied_count(), 0);
        assert_eq!(remote.applied_count(), 0);
    }

    #[tokio::test]
    async fn test_one_failed_apply_does_not_abort_pass() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        for i in 1..=5 {
            local.record_change(change(
                &format!("c{i}"),
                Some("v"),
                1,
                30 - i,
                ChangeOrigin::Local,
            ));
        }
        remote.fail_apply_for("c3");

        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let result = engine(local, remote.clone(), checkpoints.clone())
            .sync()
            .await
            .unwrap();

        assert_eq!(result.pushed, 4);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0],
            SyncError::ApplyFailed { ref id, .. } if id == "c3"
        ));
        assert_eq!(remote.applied_count(), 4);
        // Failed pass leaves the checkpoint unadvanced so a retry
        // resumes from the last confirmed point.
        assert!(checkpoints.load("crm-pair").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clean_pass_advances_checkpoint_past_synced_changes() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        local.record_change(change("a", Some("1"), 1, 10, ChangeOrigin::Local));

        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let engine = engine(local, remote.clone(), checkpoints);

        let first = engine.sync().await.unwrap();
        assert_eq!(first.pushed, 1);

        // Nothing new since the checkpoint: the second pass is a no-op.
        let second = engine.sync().await.unwrap();
        assert_eq!(second.pushed, 0);
        assert_eq!(second.pulled, 0);
        assert_eq!(remote.applied_count(), 1);
    }

    #[tokio::test]
    async fn test_identical_changes_on_both_sides_drop_out() {
        let local = Arc::new(InMemoryDataSource::new("local"));
        let remote = Arc::new(InMemoryDataSource::new("remote"));
        let ts = Utc::now() - Duration::seconds(10);
        let mut shared = change("rec", Some("same"), 4, 0, ChangeOrigin::Local);
        shared.timestamp = ts;
        local.record_change(shared.clone());
        let mut remote_copy = shared;
        remote_copy.origin = ChangeOrigin::Remote;
        remote.record_change(remote_copy);

        let result = engine(
            local.clone(),
            remote.clone(),
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .sync()
        .await
        .unwrap();

        assert_eq!(result.pushed, 0);
        assert_eq!(result.pulled, 0);
        assert!(result.conflicts.is_empty());
    }
}
