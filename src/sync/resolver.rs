//! Conflict Resolution
//!
//! Pluggable policy deciding which side of a conflict wins. The default
//! picks the most recent timestamp; on equal timestamps a configurable
//! tie-break keeps the pair convergent (both sides must break ties the same
//! way, so the default favors remote).

use crate::sync::Conflict;

/// Which side a resolver picked, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    UseLocal,
    UseRemote,
    /// Policy declines to pick; the conflict surfaces to the caller.
    Unresolved,
}

/// Conflict resolution policy.
pub trait ConflictResolver<T>: Send + Sync {
    fn resolve(&self, conflict: &Conflict<T>) -> Resolution;
}

/// Tie-break when both sides carry the same timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    #[default]
    PreferRemote,
    PreferLocal,
}

/// Most-recent-timestamp-wins policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatestWins {
    tie_break: TieBreak,
}

impl LatestWins {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }
}

impl<T> ConflictResolver<T> for LatestWins {
    fn resolve(&self, conflict: &Conflict<T>) -> Resolution {
        use std::cmp::Ordering;
        match conflict.local.timestamp.cmp(&conflict.remote.timestamp) {
            Ordering::Greater => Resolution::UseLocal,
            Ordering::Less => Resolution::UseRemote,
            Ordering::Equal => match self.tie_break {
                TieBreak::PreferRemote => Resolution::UseRemote,
                TieBreak::PreferLocal => Resolution::UseLocal,
            },
        }
    }
}

/// Policy that never picks a winner; every conflict is surfaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualResolution;

impl<T> ConflictResolver<T> for ManualResolution {
    fn resolve(&self, _conflict: &Conflict<T>) -> Resolution {
        Resolution::Unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Change, ChangeOrigin, Conflict, ConflictKind};
    use chrono::{Duration, Utc};

    fn change(ts_offset_secs: i64, origin: ChangeOrigin) -> Change<String> {
        Change {
            id: "rec_1".to_string(),
            payload: Some("v".to_string()),
            version: 1,
            timestamp: Utc::now() + Duration::seconds(ts_offset_secs),
            origin,
        }
    }

    fn conflict(local_offset: i64, remote_offset: i64) -> Conflict<String> {
        Conflict {
            id: "rec_1".to_string(),
            local: change(local_offset, ChangeOrigin::Local),
            remote: change(remote_offset, ChangeOrigin::Remote),
            kind: ConflictKind::ConcurrentUpdate,
        }
    }

    #[test]
    fn test_latest_timestamp_wins() {
        let resolver = LatestWins::default();
        assert_eq!(resolver.resolve(&conflict(10, 0)), Resolution::UseLocal);
        assert_eq!(resolver.resolve(&conflict(0, 10)), Resolution::UseRemote);
    }

    #[test]
    fn test_tie_favors_remote_by_default() {
        let resolver = LatestWins::default();
        let ts = Utc::now();
        let conflict = Conflict {
            id: "rec_1".to_string(),
            local: Change {
                timestamp: ts,
                ..change(0, ChangeOrigin::Local)
            },
            remote: Change {
                timestamp: ts,
                ..change(0, ChangeOrigin::Remote)
            },
            kind: ConflictKind::ConcurrentUpdate,
        };
        assert_eq!(resolver.resolve(&conflict), Resolution::UseRemote);

        let local_biased = LatestWins::new(TieBreak::PreferLocal);
        assert_eq!(local_biased.resolve(&conflict), Resolution::UseLocal);
    }

    #[test]
    fn test_manual_resolution_never_picks() {
        let resolver = ManualResolution;
        assert_eq!(resolver.resolve(&conflict(10, 0)), Resolution::Unresolved);
    }
}
