//! Filesystem helpers for scratch directories.

use std::io;
use std::path::Path;

/// Create a directory and all parents; succeeds when already present.
///
/// # Errors
///
/// Propagates the underlying I/O error.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
}

/// Remove a directory tree if it exists. Errors are swallowed: scratch
/// cleanup must never take down a run that already recorded its results.
pub fn safe_rmtree(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_dir_all(path);
    }
}

/// Recreate a directory empty: remove the old tree, then create it fresh.
///
/// # Errors
///
/// Propagates the creation error; the removal is best-effort.
pub fn recreate_dir(path: &Path) -> io::Result<()> {
    safe_rmtree(path);
    ensure_dir(path)
}

/// Whether any regular file exists anywhere under `root`.
#[must_use]
pub fn has_any_file(root: &Path) -> bool {
    fn walk(dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_file() {
                return true;
            }
            if p.is_dir() && walk(&p) {
                return true;
            }
        }
        false
    }
    root.exists() && walk(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recreate_dir_empties_previous_content() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("scratch");
        ensure_dir(&target).unwrap();
        std::fs::write(target.join("stale.txt"), b"x").unwrap();

        recreate_dir(&target).unwrap();
        assert!(target.exists());
        assert!(!target.join("stale.txt").exists());
    }

    #[test]
    fn has_any_file_sees_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!has_any_file(tmp.path()));
        let nested = tmp.path().join("a/b");
        ensure_dir(&nested).unwrap();
        assert!(!has_any_file(tmp.path()));
        std::fs::write(nested.join("f.xml"), b"<x/>").unwrap();
        assert!(has_any_file(tmp.path()));
    }

    #[test]
    fn safe_rmtree_ignores_missing() {
        let tmp = tempfile::tempdir().unwrap();
        safe_rmtree(&tmp.path().join("nope"));
    }
}
