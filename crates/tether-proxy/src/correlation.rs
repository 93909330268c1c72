//! Tracking of outstanding commands awaiting results.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tether_core::{CorrelationId, SessionId};

/// Outstanding command correlations, keyed by session.
///
/// An entry exists from the moment a command is forwarded until its
/// result arrives, its stream finishes, or its timeout elapses. A
/// `Result` or `StreamChunk` with no matching entry is an anomaly and
/// is never forwarded.
#[derive(Debug, Default)]
pub struct CorrelationTracker {
    pending: DashMap<(SessionId, CorrelationId), DateTime<Utc>>,
}

impl CorrelationTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a command. Returns `false` if the correlation ID
    /// is already outstanding on this session (the caller reused an ID).
    pub fn begin(&self, session: &SessionId, id: &CorrelationId) -> bool {
        let key = (session.clone(), id.clone());
        match self.pending.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                true
            },
        }
    }

    /// Close out a correlation. Returns `true` if it was outstanding;
    /// `false` means the entry was already closed (late or replayed
    /// message).
    pub fn complete(&self, session: &SessionId, id: &CorrelationId) -> bool {
        self.pending
            .remove(&(session.clone(), id.clone()))
            .is_some()
    }

    /// Whether a correlation is currently outstanding.
    #[must_use]
    pub fn is_pending(&self, session: &SessionId, id: &CorrelationId) -> bool {
        self.pending.contains_key(&(session.clone(), id.clone()))
    }

    /// Drop every outstanding correlation for a session. Returns how
    /// many were dropped. Called at session teardown.
    pub fn abandon_session(&self, session: &SessionId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(s, _), _| s != session);
        before.saturating_sub(self.pending.len())
    }

    /// Number of outstanding correlations across all sessions.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_complete_cycle() {
        let tracker = CorrelationTracker::new();
        let session = SessionId::new();
        let id = CorrelationId::from("cmd-1");

        assert!(tracker.begin(&session, &id));
        assert!(tracker.is_pending(&session, &id));
        assert!(tracker.complete(&session, &id));
        assert!(!tracker.is_pending(&session, &id));
    }

    #[test]
    fn test_duplicate_begin_rejected() {
        let tracker = CorrelationTracker::new();
        let session = SessionId::new();
        let id = CorrelationId::from("cmd-1");

        assert!(tracker.begin(&session, &id));
        assert!(!tracker.begin(&session, &id));
    }

    #[test]
    fn test_late_complete_reports_closed() {
        let tracker = CorrelationTracker::new();
        let session = SessionId::new();
        let id = CorrelationId::from("cmd-1");

        tracker.begin(&session, &id);
        assert!(tracker.complete(&session, &id));
        // A second result for the same command is late.
        assert!(!tracker.complete(&session, &id));
    }

    #[test]
    fn test_sessions_do_not_share_ids() {
        let tracker = CorrelationTracker::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let id = CorrelationId::from("cmd-1");

        assert!(tracker.begin(&a, &id));
        assert!(tracker.begin(&b, &id));
        assert!(tracker.complete(&a, &id));
        assert!(tracker.is_pending(&b, &id));
    }

    #[test]
    fn test_abandon_session() {
        let tracker = CorrelationTracker::new();
        let doomed = SessionId::new();
        let other = SessionId::new();

        tracker.begin(&doomed, &CorrelationId::from("1"));
        tracker.begin(&doomed, &CorrelationId::from("2"));
        tracker.begin(&other, &CorrelationId::from("1"));

        assert_eq!(tracker.abandon_session(&doomed), 2);
        assert_eq!(tracker.outstanding(), 1);
        assert!(tracker.is_pending(&other, &CorrelationId::from("1")));
    }
}
