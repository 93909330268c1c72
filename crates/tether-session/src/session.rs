//! Session state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tether_core::{AgentId, SessionId, Timestamp};
use tether_policy::Scope;

use crate::token::TokenHash;

/// Lifecycle state of a session.
///
/// "Disconnected" is deliberately absent: peer reachability is soft
/// state owned by the proxy engine, not a store field. `Expired` and
/// `Revoked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Live; commands may flow.
    Active,
    /// TTL elapsed.
    Expired,
    /// Revoked by an administrator.
    Revoked,
}

impl SessionStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// An ephemeral scoped session.
///
/// The approved scope and root sets never change after creation; expiry
/// and revocation are the only terminal transitions. Holds the token
/// *hash*, never the plaintext. The type has no `Serialize` impl;
/// listings go through [`SessionInfo`].
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// The owning agent.
    pub agent_id: AgentId,
    /// Hash of the bearer token.
    pub token_hash: TokenHash,
    /// Approved scopes (subset of what was requested).
    pub scopes: Vec<Scope>,
    /// Approved filesystem roots.
    pub roots: Vec<PathBuf>,
    /// When the session was created.
    pub created_at: Timestamp,
    /// Absolute expiry (`created_at + ttl`).
    pub expires_at: Timestamp,
    /// Last successfully forwarded message.
    pub last_activity: Timestamp,
    /// Count of successfully forwarded messages.
    pub request_count: u64,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// When the session reached a terminal state, for pruning.
    pub terminated_at: Option<Timestamp>,
    /// Whether a sweep pass has reported this session's expiry. Expiry
    /// can happen lazily at verification; the next sweep still owes the
    /// caller a teardown for it, exactly once.
    pub swept: bool,
}

impl Session {
    /// Whether the session's TTL has elapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at.0
    }

    /// Whether a scope is granted to this session.
    #[must_use]
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Borrow the session as a listing view (no token material).
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            scopes: self.scopes.clone(),
            roots: self.roots.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_activity: self.last_activity,
            request_count: self.request_count,
            status: self.status,
        }
    }
}

/// Serializable view of a session for listings. Carries no token
/// material in any form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// The owning agent.
    pub agent_id: AgentId,
    /// Approved scopes.
    pub scopes: Vec<Scope>,
    /// Approved filesystem roots.
    pub roots: Vec<PathBuf>,
    /// When the session was created.
    pub created_at: Timestamp,
    /// Absolute expiry.
    pub expires_at: Timestamp,
    /// Last successfully forwarded message.
    pub last_activity: Timestamp,
    /// Count of successfully forwarded messages.
    pub request_count: u64,
    /// Current lifecycle state.
    pub status: SessionStatus,
}

/// The approval response: the only place a plaintext token ever
/// appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedSession {
    /// The new session's ID.
    pub session_id: SessionId,
    /// The plaintext bearer token. Returned exactly once.
    pub token: String,
    /// Absolute expiry of the session.
    pub expires_at: Timestamp,
    /// The approved (possibly narrowed) scopes.
    pub scopes: Vec<Scope>,
}
