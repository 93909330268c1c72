//! Append-only audit trail for the Tether access broker.
//!
//! Every policy decision and every forwarded action produces one
//! [`AuditRecord`]. Records are immutable once written; retention and
//! rotation are external concerns. Payload content is never written
//! raw; write-type payloads are reduced to a digest.

pub mod error;
pub mod record;
pub mod sink;

pub use error::{AuditError, AuditResult};
pub use record::{payload_digest, AuditOutcome, AuditRecord};
pub use sink::{record_or_log, AuditSink, JsonlSink, MemorySink};
