//! Size and scope-set checks.

use crate::scope::Scope;

/// Check a payload size against a limit. Total function: a zero limit
/// simply rejects every non-empty payload.
#[must_use]
pub fn validate_payload_size(bytes: usize, limit: usize) -> bool {
    bytes <= limit
}

/// Check that every scope in `approved` was actually requested.
///
/// Approval may narrow a request but never widen it; the session store
/// refuses an approval that fails this check.
#[must_use]
pub fn is_scope_subset(approved: &[Scope], requested: &[Scope]) -> bool {
    approved.iter().all(|scope| requested.contains(scope))
}
