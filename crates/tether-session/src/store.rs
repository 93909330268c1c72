//! The in-memory session and request store.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tether_core::{AgentId, BrokerConfig, RequestId, SessionId, Timestamp};
use tether_policy::{is_scope_subset, Scope};
use tracing::{debug, info};

use crate::error::{SessionError, SessionResult};
use crate::request::{AccessRequest, RequestStatus};
use crate::session::{ApprovedSession, Session, SessionInfo, SessionStatus};
use crate::token::mint_token;

/// How long terminal sessions and requests remain queryable before the
/// sweeper prunes them.
const TERMINAL_RETENTION_SECS: i64 = 300;

/// What a sweep pass retired.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    /// Sessions whose TTL elapsed during this pass.
    pub expired_sessions: Vec<SessionId>,
    /// Pending requests that went unresolved past the request TTL.
    pub expired_requests: Vec<RequestId>,
}

impl SweepReport {
    /// Whether the pass retired anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired_sessions.is_empty() && self.expired_requests.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    requests: HashMap<RequestId, AccessRequest>,
}

/// Single authority over session and access-request lifecycle.
///
/// All state lives behind one lock so that approval's capacity check
/// and insert are a single atomic step. Everything is in memory;
/// restart clears all sessions and requests.
pub struct SessionStore {
    inner: RwLock<Inner>,
    max_active_sessions: usize,
    default_ttl: Duration,
    max_ttl: Duration,
    request_ttl: Duration,
}

impl SessionStore {
    /// Create a store from broker configuration.
    #[must_use]
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_active_sessions: config.max_active_sessions,
            default_ttl: Duration::seconds(i64::try_from(config.default_ttl_secs).unwrap_or(i64::MAX)),
            max_ttl: Duration::seconds(i64::try_from(config.max_ttl_secs).unwrap_or(i64::MAX)),
            request_ttl: Duration::seconds(i64::try_from(config.request_ttl_secs).unwrap_or(i64::MAX)),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new pending access request.
    pub fn create_access_request(
        &self,
        agent_id: AgentId,
        scopes: Vec<Scope>,
        roots: Vec<PathBuf>,
        reason: String,
    ) -> AccessRequest {
        let request = AccessRequest::new(agent_id, scopes, roots, reason);
        info!(
            request_id = %request.id,
            agent_id = %request.agent_id,
            scopes = ?request.scopes,
            "access request created"
        );
        self.write().requests.insert(request.id.clone(), request.clone());
        request
    }

    /// Fetch a request by ID.
    #[must_use]
    pub fn request(&self, id: &RequestId) -> Option<AccessRequest> {
        self.read().requests.get(id).cloned()
    }

    /// List requests, optionally filtered by status, sorted oldest
    /// first, with offset/limit paging.
    #[must_use]
    pub fn list_requests(
        &self,
        status: Option<RequestStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<AccessRequest> {
        let inner = self.read();
        let mut requests: Vec<AccessRequest> = inner
            .requests
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at.0);
        requests.into_iter().skip(offset).take(limit).collect()
    }

    /// Approve a pending request, creating a session.
    ///
    /// `scopes` narrows the grant to a subset of what was requested;
    /// `None` grants everything requested. The TTL defaults to the
    /// configured default and is clamped to the configured maximum.
    /// Returns the plaintext token exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for an unknown request,
    /// [`SessionError::InvalidState`] if the request is not pending,
    /// [`SessionError::ScopeNotRequested`] if the narrowed scope set is
    /// not a subset of the request, and [`SessionError::LimitExceeded`]
    /// if the active session cap is reached.
    #[allow(clippy::arithmetic_side_effects)] // chrono duration addition
    pub fn approve(
        &self,
        id: &RequestId,
        scopes: Option<Vec<Scope>>,
        ttl_secs: Option<u64>,
    ) -> SessionResult<ApprovedSession> {
        let mut inner = self.write();

        let request = inner.requests.get(id).ok_or_else(|| SessionError::NotFound {
            what: format!("request {id}"),
        })?;
        if !request.is_pending() {
            return Err(SessionError::InvalidState {
                reason: format!("request {id} is {}", request.status),
            });
        }

        let granted = match scopes {
            Some(narrowed) => {
                if !is_scope_subset(&narrowed, &request.scopes) {
                    let extra = narrowed
                        .iter()
                        .find(|s| !request.scopes.contains(s))
                        .map_or_else(String::new, |s| s.as_str().to_string());
                    return Err(SessionError::ScopeNotRequested { scope: extra });
                }
                narrowed
            },
            None => request.scopes.clone(),
        };

        let active = inner
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .count();
        if active >= self.max_active_sessions {
            return Err(SessionError::LimitExceeded {
                active,
                max: self.max_active_sessions,
            });
        }

        let ttl = ttl_secs
            .map_or(self.default_ttl, |secs| {
                Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
            })
            .min(self.max_ttl);

        let agent_id = request.agent_id.clone();
        let roots = request.roots.clone();
        let now = Utc::now();
        let (token, token_hash) = mint_token();
        let session = Session {
            id: SessionId::new(),
            agent_id,
            token_hash,
            scopes: granted.clone(),
            roots,
            created_at: Timestamp::from_datetime(now),
            expires_at: Timestamp::from_datetime(now + ttl),
            last_activity: Timestamp::from_datetime(now),
            request_count: 0,
            status: SessionStatus::Active,
            terminated_at: None,
            swept: false,
        };
        let approved = ApprovedSession {
            session_id: session.id.clone(),
            token,
            expires_at: session.expires_at,
            scopes: granted,
        };

        let request = inner
            .requests
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound {
                what: format!("request {id}"),
            })?;
        request.status = RequestStatus::Approved;
        request.resolved_at = Some(Timestamp::from_datetime(now));

        info!(
            request_id = %id,
            session_id = %session.id,
            agent_id = %session.agent_id,
            scopes = ?session.scopes,
            expires_at = %session.expires_at.0,
            "request approved, session created"
        );
        inner.sessions.insert(session.id.clone(), session);

        Ok(approved)
    }

    /// Deny a pending request.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for an unknown request and
    /// [`SessionError::InvalidState`] if it is not pending.
    pub fn deny(&self, id: &RequestId) -> SessionResult<AccessRequest> {
        let mut inner = self.write();
        let request = inner.requests.get_mut(id).ok_or_else(|| SessionError::NotFound {
            what: format!("request {id}"),
        })?;
        if !request.is_pending() {
            return Err(SessionError::InvalidState {
                reason: format!("request {id} is {}", request.status),
            });
        }
        request.status = RequestStatus::Denied;
        request.resolved_at = Some(Timestamp::now());
        info!(request_id = %id, agent_id = %request.agent_id, "request denied");
        Ok(request.clone())
    }

    /// Fetch a session view by ID, token material excluded.
    #[must_use]
    pub fn lookup(&self, id: &SessionId) -> Option<SessionInfo> {
        self.read().sessions.get(id).map(Session::info)
    }

    /// Fetch a full session record. Internal to the broker; never
    /// serialized.
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<Session> {
        self.read().sessions.get(id).cloned()
    }

    /// Verify a presented bearer token against a session.
    ///
    /// True only if the session exists, the token hash matches in
    /// constant time, the session is active, and the TTL has not
    /// elapsed. A session found expired here is transitioned
    /// immediately rather than waiting for the sweeper.
    #[must_use]
    pub fn verify(&self, id: &SessionId, token: &str) -> bool {
        let mut inner = self.write();
        let Some(session) = inner.sessions.get_mut(id) else {
            return false;
        };
        if !session.token_hash.verify(token) {
            return false;
        }
        if session.status != SessionStatus::Active {
            return false;
        }
        if session.is_expired_at(Utc::now()) {
            session.status = SessionStatus::Expired;
            session.terminated_at = Some(Timestamp::now());
            debug!(session_id = %id, "session expired at verification");
            return false;
        }
        true
    }

    /// Record activity on a session: bump the forwarded-message count
    /// and refresh `last_activity`. Expiry is absolute, so this never
    /// extends the TTL.
    pub fn touch(&self, id: &SessionId) {
        let mut inner = self.write();
        if let Some(session) = inner.sessions.get_mut(id) {
            session.request_count = session.request_count.saturating_add(1);
            session.last_activity = Timestamp::now();
        }
    }

    /// Revoke a session. Idempotent: returns `true` only if the session
    /// was active and is now revoked.
    pub fn revoke(&self, id: &SessionId) -> bool {
        let mut inner = self.write();
        let Some(session) = inner.sessions.get_mut(id) else {
            return false;
        };
        if session.status.is_terminal() {
            return false;
        }
        session.status = SessionStatus::Revoked;
        session.terminated_at = Some(Timestamp::now());
        info!(session_id = %id, agent_id = %session.agent_id, "session revoked");
        true
    }

    /// Expire sessions and pending requests whose TTL elapsed at `now`,
    /// and prune terminal records past the retention window.
    #[allow(clippy::arithmetic_side_effects)] // chrono duration arithmetic
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut inner = self.write();
        let mut report = SweepReport::default();

        for session in inner.sessions.values_mut() {
            if session.status == SessionStatus::Active && session.is_expired_at(now) {
                session.status = SessionStatus::Expired;
                session.terminated_at = Some(Timestamp::from_datetime(now));
            }
            // Also picks up sessions expired lazily at verification,
            // which still need their teardown.
            if session.status == SessionStatus::Expired && !session.swept {
                session.swept = true;
                report.expired_sessions.push(session.id.clone());
            }
        }

        for request in inner.requests.values_mut() {
            if request.is_pending() && now - request.created_at.0 >= self.request_ttl {
                request.status = RequestStatus::Expired;
                request.resolved_at = Some(Timestamp::from_datetime(now));
                report.expired_requests.push(request.id.clone());
            }
        }

        let retention = Duration::seconds(TERMINAL_RETENTION_SECS);
        inner.sessions.retain(|_, s| {
            s.terminated_at.is_none_or(|t| now - t.0 < retention)
        });
        inner.requests.retain(|_, r| {
            r.resolved_at.is_none_or(|t| now - t.0 < retention)
        });

        if !report.is_empty() {
            info!(
                expired_sessions = report.expired_sessions.len(),
                expired_requests = report.expired_requests.len(),
                "sweep retired stale entries"
            );
        } else if inner.sessions.is_empty() && inner.requests.is_empty() {
            debug!("sweep found nothing to retire");
        }
        report
    }

    /// List all sessions, token material excluded, newest first.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let inner = self.read();
        let mut sessions: Vec<SessionInfo> = inner.sessions.values().map(Session::info).collect();
        sessions.sort_by(|a, b| b.created_at.0.cmp(&a.created_at.0));
        sessions
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.read()
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .count()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("SessionStore")
            .field("sessions", &inner.sessions.len())
            .field("requests", &inner.requests.len())
            .finish_non_exhaustive()
    }
}
