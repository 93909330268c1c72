//! The closed scope catalog and action classification.
//!
//! One deployment has exactly one catalog. Scopes are a compile-time
//! enum rather than free strings, so a typo in a grant can never
//! silently widen access.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named permission gating one category of command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Read files under the session's approved roots.
    #[serde(rename = "read:files")]
    FilesRead,
    /// Create, modify, or delete files under the approved roots.
    #[serde(rename = "write:files")]
    FilesWrite,
    /// Run terminal commands in the IDE.
    #[serde(rename = "exec:terminal")]
    TerminalExec,
    /// Read editor state: open buffers, selections, diagnostics.
    #[serde(rename = "read:editor")]
    EditorRead,
    /// Modify editor state: apply edits, open/close buffers.
    #[serde(rename = "write:editor")]
    EditorWrite,
}

impl Scope {
    /// Every scope in the catalog.
    pub const CATALOG: [Self; 5] = [
        Self::FilesRead,
        Self::FilesWrite,
        Self::TerminalExec,
        Self::EditorRead,
        Self::EditorWrite,
    ];

    /// The scope's canonical string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FilesRead => "read:files",
            Self::FilesWrite => "write:files",
            Self::TerminalExec => "exec:terminal",
            Self::EditorRead => "read:editor",
            Self::EditorWrite => "write:editor",
        }
    }

    /// Parse a scope string against the catalog.
    ///
    /// Returns `None` for anything not in the catalog; there is no
    /// "custom scope" escape hatch.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::CATALOG.into_iter().find(|scope| scope.as_str() == s)
    }

    /// Parse a full scope set, collecting the strings that are not in
    /// the catalog.
    ///
    /// # Errors
    ///
    /// Returns the subset of `requested` that failed to parse, in input
    /// order, if any string is unknown.
    pub fn parse_all(requested: &[String]) -> Result<Vec<Self>, Vec<String>> {
        let invalid = validate_scopes(requested);
        if invalid.is_empty() {
            Ok(requested.iter().filter_map(|s| Self::parse(s)).collect())
        } else {
            Err(invalid)
        }
    }

    /// Whether this scope touches the filesystem, meaning commands under
    /// it are subject to root-path confinement.
    #[must_use]
    pub fn touches_filesystem(self) -> bool {
        matches!(self, Self::FilesRead | Self::FilesWrite)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Return the subset of `requested` scope strings not present in the
/// catalog. An empty result means every string is valid.
#[must_use]
pub fn validate_scopes(requested: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|s| Scope::parse(s).is_none())
        .cloned()
        .collect()
}

/// Map a command action name to the single scope required to perform it.
///
/// Unclassified actions resolve to `None`, which matches no granted
/// scope: default deny for anything the table does not name.
#[must_use]
pub fn required_scope(action: &str) -> Option<Scope> {
    match action {
        "open_file" | "read_file" | "list_dir" | "stat_file" | "search_files" => {
            Some(Scope::FilesRead)
        },
        "write_file" | "create_file" | "delete_file" | "rename_file" => Some(Scope::FilesWrite),
        "exec_command" | "terminal_input" => Some(Scope::TerminalExec),
        "list_buffers" | "get_buffer" | "get_selection" | "get_diagnostics" => {
            Some(Scope::EditorRead)
        },
        "apply_edit" | "open_buffer" | "close_buffer" => Some(Scope::EditorWrite),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for scope in Scope::CATALOG {
            assert_eq!(Scope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(Scope::parse("read:everything"), None);
        assert_eq!(Scope::parse(""), None);
    }

    #[test]
    fn test_serde_uses_catalog_strings() {
        let json = serde_json::to_string(&Scope::TerminalExec).unwrap();
        assert_eq!(json, "\"exec:terminal\"");
        let back: Scope = serde_json::from_str("\"read:files\"").unwrap();
        assert_eq!(back, Scope::FilesRead);
    }

    #[test]
    fn test_validate_scopes_reports_invalid() {
        let requested = vec![
            "read:files".to_string(),
            "write:disk".to_string(),
            "exec:terminal".to_string(),
            "sudo".to_string(),
        ];
        let invalid = validate_scopes(&requested);
        assert_eq!(invalid, vec!["write:disk".to_string(), "sudo".to_string()]);
    }

    #[test]
    fn test_validate_scopes_all_valid() {
        let requested = vec!["read:files".to_string(), "read:editor".to_string()];
        assert!(validate_scopes(&requested).is_empty());
    }

    #[test]
    fn test_parse_all() {
        let ok = Scope::parse_all(&["read:files".to_string(), "write:files".to_string()]).unwrap();
        assert_eq!(ok, vec![Scope::FilesRead, Scope::FilesWrite]);

        let err = Scope::parse_all(&["read:files".to_string(), "nope".to_string()]).unwrap_err();
        assert_eq!(err, vec!["nope".to_string()]);
    }

    #[test]
    fn test_required_scope_classification() {
        assert_eq!(required_scope("open_file"), Some(Scope::FilesRead));
        assert_eq!(required_scope("write_file"), Some(Scope::FilesWrite));
        assert_eq!(required_scope("exec_command"), Some(Scope::TerminalExec));
        assert_eq!(required_scope("apply_edit"), Some(Scope::EditorWrite));
    }

    #[test]
    fn test_unknown_action_is_default_deny() {
        assert_eq!(required_scope("format_disk"), None);
        assert_eq!(required_scope(""), None);
    }

    #[test]
    fn test_filesystem_scopes() {
        assert!(Scope::FilesRead.touches_filesystem());
        assert!(Scope::FilesWrite.touches_filesystem());
        assert!(!Scope::TerminalExec.touches_filesystem());
    }
}
