//! Access requests awaiting a human decision.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tether_core::{AgentId, RequestId, Timestamp};
use tether_policy::Scope;

/// Lifecycle state of an access request. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved; a session was created.
    Approved,
    /// Denied by the approver.
    Denied,
    /// Went unresolved past the request TTL.
    Expired,
}

impl RequestStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// A request for scoped access, created by an external caller and
/// resolved by the approval workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Unique request identifier.
    pub id: RequestId,
    /// Who is asking.
    pub agent_id: AgentId,
    /// Requested scopes (already validated against the catalog).
    pub scopes: Vec<Scope>,
    /// Requested filesystem roots, for filesystem-touching scopes.
    pub roots: Vec<PathBuf>,
    /// Human-readable justification.
    pub reason: String,
    /// When the request was created.
    pub created_at: Timestamp,
    /// Current lifecycle state.
    pub status: RequestStatus,
    /// When the request left `Pending`, if it has.
    pub resolved_at: Option<Timestamp>,
}

impl AccessRequest {
    /// Create a new pending request.
    #[must_use]
    pub fn new(agent_id: AgentId, scopes: Vec<Scope>, roots: Vec<PathBuf>, reason: String) -> Self {
        Self {
            id: RequestId::new(),
            agent_id,
            scopes,
            roots,
            reason,
            created_at: Timestamp::now(),
            status: RequestStatus::Pending,
            resolved_at: None,
        }
    }

    /// Whether the request is still awaiting a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}
