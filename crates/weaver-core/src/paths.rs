//! Vault path conventions.
//!
//! Vault paths are relative, forward-slash separated, case preserved. The
//! ignore list is a set of literal prefixes; an ignored path never produces
//! events and never enters the index.

use std::path::Path;

/// Convert a filesystem-relative path to vault form (forward slashes).
pub fn to_vault_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a vault path falls under any ignore prefix.
pub fn is_ignored(path: &str, ignore: &[String]) -> bool {
    ignore.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Whether a vault path is a markdown note.
pub fn is_markdown(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}
