//! Protocol-level error taxonomy for broker operations.
//!
//! All policy decisions inside the broker are plain booleans or enums;
//! [`BrokerError`] is the single place those decisions become errors a
//! caller can see. Every variant has a stable wire code so frontends can
//! branch without parsing messages.

use thiserror::Error;

/// Errors surfaced to callers of the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Missing or invalid management credential or session token.
    #[error("unauthenticated: {reason}")]
    Unauthenticated {
        /// Why authentication failed.
        reason: String,
    },

    /// Valid credential, but scope/path/size policy denies the action.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Which policy denied the action.
        reason: String,
    },

    /// Valid and authorized, but the session's request quota is exhausted.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the next request will be admitted.
        retry_after_secs: u64,
    },

    /// Referenced an unknown request or session.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Operation on a request/session in the wrong lifecycle state.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Why the transition is not allowed.
        reason: String,
    },

    /// Session or connection capacity reached.
    #[error("limit exceeded: {reason}")]
    LimitExceeded {
        /// Which limit was hit.
        reason: String,
    },

    /// The counterpart connection is absent; the session is degraded,
    /// not destroyed.
    #[error("peer unreachable for session")]
    PeerUnreachable,

    /// A command received no result within the configured window.
    #[error("command timed out after {timeout_ms}ms")]
    Timeout {
        /// The configured timeout that elapsed.
        timeout_ms: u64,
    },

    /// Unexpected internal failure. Terminates only the affected
    /// connection, never the process.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Stable machine-readable code for the wire protocol.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound { .. } => "not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::PeerUnreachable => "peer_unreachable",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Convenience constructor for [`BrokerError::Forbidden`].
    #[must_use]
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`BrokerError::Unauthenticated`].
    #[must_use]
    pub fn unauthenticated(reason: impl Into<String>) -> Self {
        Self::Unauthenticated {
            reason: reason.into(),
        }
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
