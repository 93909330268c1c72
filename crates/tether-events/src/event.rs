//! Broker lifecycle events.

use serde::{Deserialize, Serialize};
use tether_core::{AgentId, PeerRole, RequestId, SessionId, Timestamp};

/// An event published on the broker's notification stream.
///
/// Serialized with a `type` tag so external consumers (the consent UI)
/// can dispatch without knowing the full enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    /// A new access request is awaiting a human decision.
    AccessRequest {
        /// The pending request's ID.
        request_id: RequestId,
        /// Who is asking.
        agent_id: AgentId,
        /// Requested scope strings.
        scopes: Vec<String>,
        /// Human-readable justification supplied by the agent.
        reason: String,
    },

    /// An access request was denied.
    RequestDenied {
        /// The denied request's ID.
        request_id: RequestId,
        /// Why it was denied.
        reason: String,
    },

    /// A pending access request went unresolved past its TTL.
    RequestExpired {
        /// The expired request's ID.
        request_id: RequestId,
    },

    /// An approval materialized a new session.
    SessionCreated {
        /// The new session's ID.
        session_id: SessionId,
        /// The owning agent.
        agent_id: AgentId,
        /// Approved scope strings (may be narrower than requested).
        scopes: Vec<String>,
        /// When the session will expire.
        expires_at: Timestamp,
    },

    /// A session's TTL elapsed and the sweep retired it.
    SessionExpired {
        /// The expired session's ID.
        session_id: SessionId,
    },

    /// A session was revoked by an administrator.
    SessionRevoked {
        /// The revoked session's ID.
        session_id: SessionId,
        /// Why it was revoked.
        reason: String,
    },

    /// One side of a session lost its connection; the session itself is
    /// still live.
    PeerDisconnected {
        /// The affected session.
        session_id: SessionId,
        /// Which side dropped.
        role: PeerRole,
    },

    /// A previously disconnected side reconnected.
    PeerReconnected {
        /// The affected session.
        session_id: SessionId,
        /// Which side returned.
        role: PeerRole,
    },
}

impl BrokerEvent {
    /// The event's `type` tag as a string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AccessRequest { .. } => "access_request",
            Self::RequestDenied { .. } => "request_denied",
            Self::RequestExpired { .. } => "request_expired",
            Self::SessionCreated { .. } => "session_created",
            Self::SessionExpired { .. } => "session_expired",
            Self::SessionRevoked { .. } => "session_revoked",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::PeerReconnected { .. } => "peer_reconnected",
        }
    }

    /// The session this event concerns, when it concerns one.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::SessionExpired { session_id }
            | Self::SessionRevoked { session_id, .. }
            | Self::PeerDisconnected { session_id, .. }
            | Self::PeerReconnected { session_id, .. } => Some(session_id),
            Self::AccessRequest { .. }
            | Self::RequestDenied { .. }
            | Self::RequestExpired { .. } => None,
        }
    }
}
