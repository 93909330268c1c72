//! Audit error types.

use thiserror::Error;

/// Errors from writing audit records.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The sink's backing file could not be written.
    #[error("audit write failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("audit serialization failed: {0}")]
    Serialization(String),
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
