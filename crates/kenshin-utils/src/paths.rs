//! Path identity normalization.
//!
//! ZIP inner paths arrive with either separator and sometimes a leading
//! slash; the ledger keys on the normalized form, so every producer and
//! every consumer must agree on exactly one spelling.

use std::path::Path;

/// Normalize a ZIP inner path: backslashes become forward slashes and
/// leading slashes are stripped.
#[must_use]
pub fn norm_inner_path(p: &str) -> String {
    p.replace('\\', "/").trim_start_matches('/').to_string()
}

/// File name (final component) of a normalized inner path.
#[must_use]
pub fn inner_file_name(inner: &str) -> String {
    inner.rsplit('/').next().unwrap_or(inner).to_string()
}

/// Lowercased extension without the dot, or an empty string.
#[must_use]
pub fn norm_ext(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}
