//! Policy checks for the Tether access broker.
//!
//! Everything here is a pure decision: scope membership, action
//! classification, path confinement, payload size, and request rate.
//! Validators never log and never return errors; callers branch on the
//! returned value and decide what to surface (the proxy engine turns
//! denials into protocol errors and audit records).

pub mod limits;
pub mod path;
pub mod rate_limit;
pub mod scope;

pub use limits::{is_scope_subset, validate_payload_size};
pub use path::validate_path;
pub use rate_limit::{Admission, RateLimiter};
pub use scope::{required_scope, validate_scopes, Scope};
