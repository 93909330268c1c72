//! Session store errors.

use tether_core::BrokerError;

/// Errors from session and request lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The named entity does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// The operation is not valid in the entity's current state.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Why the transition was rejected.
        reason: String,
    },

    /// The active session cap would be exceeded.
    #[error("active session limit reached ({active}/{max})")]
    LimitExceeded {
        /// Current number of active sessions.
        active: usize,
        /// Configured maximum.
        max: usize,
    },

    /// An approval tried to grant a scope the request never asked for.
    #[error("scope was not requested: {scope}")]
    ScopeNotRequested {
        /// The offending scope.
        scope: String,
    },
}

impl From<SessionError> for BrokerError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { what } => BrokerError::NotFound { what },
            SessionError::InvalidState { reason } => BrokerError::InvalidState { reason },
            SessionError::LimitExceeded { active, max } => BrokerError::LimitExceeded {
                reason: format!("active session limit reached ({active}/{max})"),
            },
            SessionError::ScopeNotRequested { scope } => BrokerError::InvalidState {
                reason: format!("scope was not requested: {scope}"),
            },
        }
    }
}

/// Convenience alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
