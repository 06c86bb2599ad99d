//! Password-aware extraction into a scratch directory.
//!
//! Candidate handling: callers pass the resolver's ordered list; this
//! module trims, drops blanks, de-duplicates, and appends a final
//! "no password" attempt (covers misdetected encryption and archives
//! where only some members are encrypted).

use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::Path;

use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

use kenshin_utils::fsops::{ensure_dir, recreate_dir};
use kenshin_utils::text::shorten;

/// Why an extraction failed, mapped 1:1 onto the ZIP-layer error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractFailure {
    /// Every candidate (and the no-password attempt) was rejected.
    Password,
    /// Path-length or path-creation failure under the scratch root.
    LongPath,
    /// Anything else: not a zip, truncated archive, I/O trouble.
    Unexpected,
}

/// Extraction error with its category and a clipped message.
#[derive(Error, Debug)]
#[error("zip extraction failed ({kind:?}): {message}")]
pub struct ExtractError {
    pub kind: ExtractFailure,
    pub message: String,
}

impl ExtractError {
    fn new(kind: ExtractFailure, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: shorten(message.as_ref(), 2000),
        }
    }
}

/// Successful extraction; remembers which candidate opened the archive
/// (None for an unencrypted archive or the sentinel attempt).
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub used_password: Option<String>,
}

/// Outcome of one full-archive attempt with a fixed password.
enum AttemptError {
    /// Wrong password, or password required: try the next candidate.
    TryNext(String),
    /// Destination path could not be created (fatal for this zip).
    LongPath(String),
    /// Anything else; remembered and retried with the next candidate.
    Other(String),
}

/// Extract the whole archive into `temp_dir` (recreated empty first).
///
/// # Errors
///
/// [`ExtractError`] with the failure category; see [`ExtractFailure`].
pub fn extract_zip_to_temp(
    zip_path: &Path,
    temp_dir: &Path,
    password_candidates: &[String],
) -> Result<ExtractOutcome, ExtractError> {
    recreate_dir(temp_dir)
        .map_err(|e| ExtractError::new(ExtractFailure::Unexpected, format!("scratch dir: {e}")))?;

    let file = File::open(zip_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ExtractError::new(ExtractFailure::LongPath, e.to_string()),
        _ => ExtractError::new(ExtractFailure::Unexpected, e.to_string()),
    })?;

    let mut archive = ZipArchive::new(file).map_err(|e| match e {
        ZipError::InvalidArchive(_) => {
            ExtractError::new(ExtractFailure::Unexpected, format!("File is not a zip file: {e}"))
        }
        ZipError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {
            ExtractError::new(ExtractFailure::LongPath, io_err.to_string())
        }
        other => ExtractError::new(ExtractFailure::Unexpected, other.to_string()),
    })?;

    // Plain attempt first; most archives in the wild are unencrypted.
    match extract_all(&mut archive, temp_dir, None) {
        Ok(()) => return Ok(ExtractOutcome::default()),
        Err(AttemptError::LongPath(m)) => {
            return Err(ExtractError::new(ExtractFailure::LongPath, m));
        }
        Err(AttemptError::TryNext(_)) => {}
        Err(AttemptError::Other(m)) => {
            return Err(ExtractError::new(ExtractFailure::Unexpected, m));
        }
    }

    // Encrypted: iterate candidates, then the no-password sentinel.
    let mut candidates: Vec<Option<String>> = Vec::new();
    for pw in password_candidates {
        let pw = pw.trim();
        if pw.is_empty() {
            continue;
        }
        if candidates.iter().any(|c| c.as_deref() == Some(pw)) {
            continue;
        }
        candidates.push(Some(pw.to_string()));
    }
    candidates.push(None);

    let mut last_message = String::from("encrypted zip: password required");
    for candidate in candidates {
        let pwd_bytes = candidate.as_deref().map(str::as_bytes);
        match extract_all(&mut archive, temp_dir, pwd_bytes) {
            Ok(()) => {
                return Ok(ExtractOutcome {
                    used_password: candidate,
                });
            }
            Err(AttemptError::LongPath(m)) => {
                return Err(ExtractError::new(ExtractFailure::LongPath, m));
            }
            Err(AttemptError::TryNext(m)) | Err(AttemptError::Other(m)) => {
                last_message = m;
            }
        }
    }

    Err(ExtractError::new(ExtractFailure::Password, last_message))
}

fn extract_all(
    archive: &mut ZipArchive<File>,
    dest: &Path,
    password: Option<&[u8]>,
) -> Result<(), AttemptError> {
    for index in 0..archive.len() {
        let mut entry = match password {
            Some(pwd) => archive.by_index_decrypt(index, pwd),
            None => archive.by_index(index),
        }
        .map_err(classify_zip_error)?;

        // Members with hostile paths are skipped rather than written
        // outside the scratch root.
        let Some(rel) = entry.enclosed_name() else {
            continue;
        };
        let out_path = dest.join(rel);

        if entry.is_dir() {
            ensure_dir(&out_path).map_err(classify_io_error)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            ensure_dir(parent).map_err(classify_io_error)?;
        }
        let mut out = File::create(&out_path).map_err(classify_io_error)?;
        io::copy(&mut entry, &mut out).map_err(classify_io_error)?;
    }
    Ok(())
}

fn classify_zip_error(e: ZipError) -> AttemptError {
    match e {
        ZipError::InvalidPassword => AttemptError::TryNext("Bad password for file".to_string()),
        ZipError::UnsupportedArchive(msg) if msg.to_ascii_lowercase().contains("password") => {
            AttemptError::TryNext(msg.to_string())
        }
        ZipError::Io(io_err) if io_err.kind() == ErrorKind::NotFound => {
            AttemptError::LongPath(io_err.to_string())
        }
        other => AttemptError::Other(other.to_string()),
    }
}

fn classify_io_error(e: io::Error) -> AttemptError {
    match e.kind() {
        // On long-path-limited filesystems a too-deep destination
        // surfaces as NotFound from the create call.
        ErrorKind::NotFound => AttemptError::LongPath(e.to_string()),
        _ => AttemptError::Other(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;

    fn plain_zip(entries: &[(&str, &[u8])]) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut w = zip::ZipWriter::new(tmp.reopen().unwrap());
        let opts = SimpleFileOptions::default();
        for (name, body) in entries {
            w.start_file(*name, opts).unwrap();
            w.write_all(body).unwrap();
        }
        w.finish().unwrap();
        tmp
    }

    fn encrypted_zip(entries: &[(&str, &[u8])], password: &str) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut w = zip::ZipWriter::new(tmp.reopen().unwrap());
        #[allow(deprecated)]
        let opts = SimpleFileOptions::default().with_deprecated_encryption(password.as_bytes());
        for (name, body) in entries {
            w.start_file(*name, opts).unwrap();
            w.write_all(body).unwrap();
        }
        w.finish().unwrap();
        tmp
    }

    #[test]
    fn unencrypted_extracts_without_candidates() {
        let z = plain_zip(&[("DATA/a.xml", b"<a/>"), ("note.txt", b"n")]);
        let dest = tempfile::tempdir().unwrap();
        let out = extract_zip_to_temp(z.path(), &dest.path().join("t"), &[]).unwrap();
        assert_eq!(out.used_password, None);
        assert_eq!(
            std::fs::read(dest.path().join("t/DATA/a.xml")).unwrap(),
            b"<a/>"
        );
    }

    #[test]
    fn encrypted_extracts_with_matching_candidate() {
        let z = encrypted_zip(&[("DATA/a.xml", b"<a/>")], "p2");
        let dest = tempfile::tempdir().unwrap();
        let out = extract_zip_to_temp(
            z.path(),
            &dest.path().join("t"),
            &["wrong".to_string(), " p2 ".to_string()],
        )
        .unwrap();
        assert_eq!(out.used_password.as_deref(), Some("p2"));
        assert!(dest.path().join("t/DATA/a.xml").exists());
    }

    #[test]
    fn encrypted_with_exhausted_candidates_is_password_failure() {
        let z = encrypted_zip(&[("DATA/a.xml", b"<a/>")], "secret");
        let dest = tempfile::tempdir().unwrap();
        let err = extract_zip_to_temp(
            z.path(),
            &dest.path().join("t"),
            &["nope".to_string(), "also-nope".to_string()],
        )
        .unwrap_err();
        assert_eq!(err.kind, ExtractFailure::Password);
    }

    #[test]
    fn candidate_list_is_trimmed_and_deduplicated() {
        // Duplicates and blanks must not multiply attempts; the archive
        // still opens on the single real candidate.
        let z = encrypted_zip(&[("a.xml", b"<a/>")], "pw");
        let dest = tempfile::tempdir().unwrap();
        let out = extract_zip_to_temp(
            z.path(),
            &dest.path().join("t"),
            &["".to_string(), " pw ".to_string(), "pw".to_string()],
        )
        .unwrap();
        assert_eq!(out.used_password.as_deref(), Some("pw"));
    }

    #[test]
    fn garbage_file_is_unexpected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"not a zip at all").unwrap();
        let dest = tempfile::tempdir().unwrap();
        let err = extract_zip_to_temp(tmp.path(), &dest.path().join("t"), &[]).unwrap_err();
        assert_eq!(err.kind, ExtractFailure::Unexpected);
    }

    #[test]
    fn scratch_dir_is_recreated_empty() {
        let z = plain_zip(&[("a.xml", b"<a/>")]);
        let dest = tempfile::tempdir().unwrap();
        let scratch = dest.path().join("t");
        std::fs::create_dir_all(&scratch).unwrap();
        std::fs::write(scratch.join("stale.bin"), b"old").unwrap();

        extract_zip_to_temp(z.path(), &scratch, &[]).unwrap();
        assert!(!scratch.join("stale.bin").exists());
        assert!(scratch.join("a.xml").exists());
    }
}
