//! Per-session sliding-window rate limiting.
//!
//! Each session gets an ordered bucket of admission timestamps. A call
//! to [`RateLimiter::admit`] prunes entries older than the window, then
//! admits and records iff the pruned count is under the quota. Buckets
//! for different sessions never block each other; mutation of a single
//! bucket is atomic because the map shard guard is held for the whole
//! prune-count-record step.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tether_core::config::RateLimitConfig;
use tether_core::SessionId;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy)]
pub enum Admission {
    /// Request admitted and recorded.
    Admitted {
        /// Requests left in the current window.
        remaining: u32,
    },
    /// Request rejected; nothing was recorded.
    Denied {
        /// Time until the oldest recorded admission leaves the window.
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request was admitted.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Retry-after hint, present only on denial.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Admitted { .. } => None,
            Self::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Sliding-window request limiter keyed by session.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    buckets: DashMap<SessionId, Vec<DateTime<Utc>>>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`.
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Create a limiter from broker configuration.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let secs = i64::try_from(config.window_secs).unwrap_or(i64::MAX);
        Self::new(config.max_requests, Duration::seconds(secs))
    }

    /// Check and record one request for a session at time `now`.
    ///
    /// On denial nothing is recorded, so a rejected burst does not
    /// extend the penalty.
    #[allow(clippy::arithmetic_side_effects)] // chrono DateTime +/- Duration
    #[allow(clippy::cast_possible_truncation)]
    pub fn admit(&self, session: &SessionId, now: DateTime<Utc>) -> Admission {
        let mut bucket = self.buckets.entry(session.clone()).or_default();
        let window_start = now - self.window;

        bucket.retain(|t| *t > window_start);

        if bucket.len() >= self.max_requests as usize {
            // Bucket is already pruned, so the front entry is the oldest
            // admission still inside the window.
            let retry_after = bucket
                .first()
                .map_or_else(|| Duration::seconds(1), |oldest| *oldest + self.window - now);
            return Admission::Denied { retry_after };
        }

        bucket.push(now);
        let remaining = self.max_requests.saturating_sub(bucket.len() as u32);
        Admission::Admitted { remaining }
    }

    /// Drop all history for a session. Called on session destruction to
    /// bound memory.
    pub fn reset(&self, session: &SessionId) {
        self.buckets.remove(session);
    }

    /// Number of sessions currently holding a bucket.
    #[must_use]
    pub fn tracked_sessions(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: i64) -> RateLimiter {
        RateLimiter::new(max, Duration::seconds(window_secs))
    }

    #[test]
    fn test_admits_up_to_quota() {
        let limiter = limiter(3, 60);
        let session = SessionId::new();
        let now = Utc::now();

        assert!(limiter.admit(&session, now).is_admitted());
        assert!(limiter.admit(&session, now).is_admitted());
        assert!(limiter.admit(&session, now).is_admitted());
        assert!(!limiter.admit(&session, now).is_admitted());
    }

    #[test]
    fn test_denial_reports_retry_after() {
        let limiter = limiter(1, 60);
        let session = SessionId::new();
        let now = Utc::now();

        limiter.admit(&session, now);
        let denied = limiter.admit(&session, now);
        let retry = denied.retry_after().unwrap();
        assert!(retry > Duration::zero());
        assert!(retry <= Duration::seconds(60));
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter(2, 10);
        let session = SessionId::new();
        let t0 = Utc::now();

        assert!(limiter.admit(&session, t0).is_admitted());
        assert!(
            limiter
                .admit(&session, t0 + Duration::seconds(5))
                .is_admitted()
        );
        // Window full at t0+6.
        assert!(
            !limiter
                .admit(&session, t0 + Duration::seconds(6))
                .is_admitted()
        );
        // t0 has left the window at t0+11: exactly one slot frees up.
        assert!(
            limiter
                .admit(&session, t0 + Duration::seconds(11))
                .is_admitted()
        );
        assert!(
            !limiter
                .admit(&session, t0 + Duration::seconds(12))
                .is_admitted()
        );
    }

    #[test]
    fn test_rejection_records_nothing() {
        let limiter = limiter(1, 10);
        let session = SessionId::new();
        let t0 = Utc::now();

        assert!(limiter.admit(&session, t0).is_admitted());
        // Hammering while denied must not push the window forward.
        for i in 1..=9 {
            assert!(
                !limiter
                    .admit(&session, t0 + Duration::seconds(i))
                    .is_admitted()
            );
        }
        assert!(
            limiter
                .admit(&session, t0 + Duration::seconds(11))
                .is_admitted()
        );
    }

    #[test]
    fn test_sessions_are_independent() {
        let limiter = limiter(1, 60);
        let a = SessionId::new();
        let b = SessionId::new();
        let now = Utc::now();

        assert!(limiter.admit(&a, now).is_admitted());
        assert!(!limiter.admit(&a, now).is_admitted());
        assert!(limiter.admit(&b, now).is_admitted());
    }

    #[test]
    fn test_reset_drops_history() {
        let limiter = limiter(1, 60);
        let session = SessionId::new();
        let now = Utc::now();

        limiter.admit(&session, now);
        assert_eq!(limiter.tracked_sessions(), 1);

        limiter.reset(&session);
        assert_eq!(limiter.tracked_sessions(), 0);
        assert!(limiter.admit(&session, now).is_admitted());
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = limiter(3, 60);
        let session = SessionId::new();
        let now = Utc::now();

        let Admission::Admitted { remaining } = limiter.admit(&session, now) else {
            panic!("expected admission");
        };
        assert_eq!(remaining, 2);

        let Admission::Admitted { remaining } = limiter.admit(&session, now) else {
            panic!("expected admission");
        };
        assert_eq!(remaining, 1);
    }
}
