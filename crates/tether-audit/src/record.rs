//! Audit record type and payload redaction.

use serde::{Deserialize, Serialize};
use tether_core::{SessionId, Timestamp};

/// Outcome of the audited action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The action passed every check and was carried out.
    Allowed,
    /// Policy denied the action.
    Denied {
        /// Which check denied it.
        reason: String,
    },
    /// The action failed for a non-policy reason (peer gone, timeout,
    /// anomaly).
    Error {
        /// Stable error code, matching the wire protocol.
        code: String,
    },
}

impl AuditOutcome {
    /// Build a denial with a reason.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// Build an error outcome with a code.
    #[must_use]
    pub fn error(code: impl Into<String>) -> Self {
        Self::Error { code: code.into() }
    }

    /// Whether this outcome is [`AuditOutcome::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// One immutable audit record.
///
/// `session_id` is absent for pre-session events (access requests,
/// failed authentication). `payload_digest` is a blake3 hex digest of
/// the action's payload, never the payload itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// When the decision was made.
    pub timestamp: Timestamp,
    /// The session the action ran under, if any.
    pub session_id: Option<SessionId>,
    /// Who initiated the action (agent id, peer id, or `admin`).
    pub actor: String,
    /// The action name (command action or lifecycle operation).
    pub action: String,
    /// Redacted representation of the payload, if the action carried one.
    pub payload_digest: Option<String>,
    /// What happened.
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    /// Time spent deciding and forwarding, in milliseconds.
    pub latency_ms: u64,
}

impl AuditRecord {
    /// Build a record with the current timestamp.
    #[must_use]
    pub fn new(
        session_id: Option<SessionId>,
        actor: impl Into<String>,
        action: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Timestamp::now(),
            session_id,
            actor: actor.into(),
            action: action.into(),
            payload_digest: None,
            outcome,
            latency_ms: 0,
        }
    }

    /// Attach a payload digest.
    #[must_use]
    pub fn with_payload_digest(mut self, digest: impl Into<String>) -> Self {
        self.payload_digest = Some(digest.into());
        self
    }

    /// Attach a latency measurement.
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

/// Reduce a payload to a short blake3 hex digest for audit storage.
///
/// Serialization of a `serde_json::Value` cannot fail, so this is total.
#[must_use]
pub fn payload_digest(payload: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
