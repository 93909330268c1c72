//! Ephemeral sessions and access requests for the Tether broker.
//!
//! The [`SessionStore`] is the single authority over session and
//! request lifecycle: it mints bearer tokens on approval, verifies them
//! in constant time against their stored hash, and retires sessions by
//! TTL sweep or revocation. Nothing here is ever persisted to disk.

pub mod error;
pub mod request;
pub mod session;
pub mod store;
pub mod token;

pub use error::{SessionError, SessionResult};
pub use request::{AccessRequest, RequestStatus};
pub use session::{ApprovedSession, Session, SessionInfo, SessionStatus};
pub use store::{SessionStore, SweepReport};
pub use token::{mint_token, TokenHash};
