//! Filesystem root confinement.
//!
//! A session is confined to a set of approved root directories. Paths
//! are canonicalized (symlinks and `..` segments resolved) *before* the
//! prefix check, so a symlink pointing outside a root cannot smuggle an
//! escape past a naive string-prefix comparison.

use std::path::{Path, PathBuf};

/// Check whether `path` is equal to, or a descendant of, at least one
/// entry in `allowed_roots`.
///
/// Both sides are canonicalized before comparison. A path (or root) that
/// cannot be canonicalized fails closed: unresolvable input is never
/// allowed. For a path whose final component does not exist yet (a file
/// about to be created), the parent directory is canonicalized and the
/// final component re-appended, so writes that create files inside a
/// root still validate. Deeper missing components do not get that
/// leniency.
#[must_use]
pub fn validate_path(path: &Path, allowed_roots: &[PathBuf]) -> bool {
    let Some(canonical) = canonicalize_lenient(path) else {
        return false;
    };

    allowed_roots
        .iter()
        .filter_map(|root| root.canonicalize().ok())
        .any(|root| canonical.starts_with(&root))
}

/// Canonicalize a path, tolerating a missing final component.
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Some(canonical);
    }

    // canonicalize fails on a dangling symlink too. The link exists; a
    // write through it lands at the target, not under the link's name.
    if path.symlink_metadata().is_ok() {
        return None;
    }

    // The file may not exist yet. Resolve the parent and re-append the
    // final component, but only a real file name, never `..` or `/`.
    let parent = path.parent()?;
    let file_name = path.file_name()?;
    let canonical_parent = parent.canonicalize().ok()?;
    Some(canonical_parent.join(file_name))
}
