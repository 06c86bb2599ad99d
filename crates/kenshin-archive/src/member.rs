//! Single-member reads by recorded inner path.
//!
//! The receipt stores the inner path as it looked at inventory time.
//! Some producers repackage archives with an extra top-level directory,
//! so an exact miss falls back to suffix matching: one candidate is used
//! outright; two or more are tried in order, capped at five. This is a
//! heuristic — the cap keeps a pathological archive from turning one
//! lookup into thousands.

use std::fs::File;
use std::io::Read as _;

use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

use kenshin_utils::paths::norm_inner_path;
use kenshin_utils::text::shorten;

const SUFFIX_RESCUE_CAP: usize = 5;

/// Why a member read failed.
#[derive(Error, Debug)]
pub enum MemberError {
    /// No member matches the inner path, even after suffix rescue.
    #[error("zip member not found: {inner}")]
    NotFound { inner: String },

    /// The member is encrypted and every candidate was rejected.
    #[error("password candidates exhausted for {inner}: {message}")]
    Password { inner: String, message: String },

    /// Anything else while opening or reading.
    #[error("zip member read failed for {inner}: {message}")]
    Open { inner: String, message: String },
}

/// Resolve the read targets for an inner path: the exact name when
/// present, otherwise suffix matches (capped).
fn resolve_targets(archive: &ZipArchive<File>, norm: &str) -> Vec<String> {
    if archive.index_for_name(norm).is_some() {
        return vec![norm.to_string()];
    }
    let slash_suffix = format!("/{norm}");
    let matches: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(&slash_suffix) || n.ends_with(norm))
        .map(str::to_string)
        .collect();
    match matches.len() {
        0 => vec![norm.to_string()],
        1 => matches,
        _ => matches.into_iter().take(SUFFIX_RESCUE_CAP).collect(),
    }
}

enum OpenOutcome {
    Bytes(Vec<u8>),
    NeedsPassword(String),
    NotFound,
    Failed(String),
}

fn try_read(
    archive: &mut ZipArchive<File>,
    name: &str,
    password: Option<&[u8]>,
) -> OpenOutcome {
    let entry = match password {
        Some(pwd) => archive.by_name_decrypt(name, pwd),
        None => archive.by_name(name),
    };
    match entry {
        Ok(mut file) => {
            let mut buf = Vec::with_capacity(file.size() as usize);
            match file.read_to_end(&mut buf) {
                Ok(_) => OpenOutcome::Bytes(buf),
                Err(e) => OpenOutcome::Failed(e.to_string()),
            }
        }
        Err(ZipError::FileNotFound) => OpenOutcome::NotFound,
        Err(ZipError::InvalidPassword) => {
            OpenOutcome::NeedsPassword("Bad password for file".to_string())
        }
        Err(ZipError::UnsupportedArchive(msg))
            if msg.to_ascii_lowercase().contains("password") =>
        {
            OpenOutcome::NeedsPassword(msg.to_string())
        }
        Err(e) => OpenOutcome::Failed(e.to_string()),
    }
}

/// Read a member's bytes by inner path (normalized first), trying the
/// plain open before the password candidates.
///
/// # Errors
///
/// [`MemberError`] with the category the extract stage maps onto its
/// ZIP-layer error codes.
pub fn read_member_bytes(
    archive: &mut ZipArchive<File>,
    inner_path: &str,
    password_candidates: &[String],
) -> Result<Vec<u8>, MemberError> {
    let norm = norm_inner_path(inner_path);
    let targets = resolve_targets(archive, &norm);

    // Plain pass over every target.
    let mut needs_password: Option<String> = None;
    for target in &targets {
        match try_read(archive, target, None) {
            OpenOutcome::Bytes(b) => return Ok(b),
            OpenOutcome::NotFound => continue,
            OpenOutcome::NeedsPassword(m) => {
                needs_password = Some(m);
                break;
            }
            OpenOutcome::Failed(m) => {
                return Err(MemberError::Open {
                    inner: norm,
                    message: shorten(&m, 1000),
                });
            }
        }
    }

    let Some(first_message) = needs_password else {
        return Err(MemberError::NotFound { inner: norm });
    };

    if password_candidates.is_empty() {
        return Err(MemberError::Password {
            inner: norm,
            message: format!("zip member is encrypted and no password candidates: {first_message}"),
        });
    }

    let mut last_message = first_message;
    for pw in password_candidates {
        let pwd = pw.trim();
        if pwd.is_empty() {
            continue;
        }
        for target in &targets {
            match try_read(archive, target, Some(pwd.as_bytes())) {
                OpenOutcome::Bytes(b) => return Ok(b),
                OpenOutcome::NotFound => continue,
                OpenOutcome::NeedsPassword(m) | OpenOutcome::Failed(m) => {
                    last_message = m;
                }
            }
        }
    }

    Err(MemberError::Password {
        inner: norm,
        message: shorten(&last_message, 1000),
    })
}

/// Open an archive for member reads (the extract stages cache these
/// per `zip_sha256` for the duration of a run).
///
/// # Errors
///
/// [`MemberError::Open`] when the file or central directory is
/// unreadable.
pub fn open_archive(zip_path: &std::path::Path) -> Result<ZipArchive<File>, MemberError> {
    let file = File::open(zip_path).map_err(|e| MemberError::Open {
        inner: zip_path.display().to_string(),
        message: e.to_string(),
    })?;
    ZipArchive::new(file).map_err(|e| MemberError::Open {
        inner: zip_path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::unstable::write::FileOptionsExt;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])], password: Option<&str>) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut w = zip::ZipWriter::new(tmp.reopen().unwrap());
        let opts = match password {
            Some(pw) => {
                #[allow(deprecated)]
                let encrypted = SimpleFileOptions::default().with_deprecated_encryption(pw.as_bytes());
                encrypted
            }
            None => SimpleFileOptions::default(),
        };
        for (name, body) in entries {
            w.start_file(*name, opts).unwrap();
            w.write_all(body).unwrap();
        }
        w.finish().unwrap();
        tmp
    }

    #[test]
    fn exact_path_wins() {
        let z = build_zip(&[("DATA/a.xml", b"<a/>")], None);
        let mut archive = open_archive(z.path()).unwrap();
        let b = read_member_bytes(&mut archive, "DATA/a.xml", &[]).unwrap();
        assert_eq!(b, b"<a/>");
    }

    #[test]
    fn backslash_and_leading_slash_are_normalized() {
        let z = build_zip(&[("DATA/a.xml", b"<a/>")], None);
        let mut archive = open_archive(z.path()).unwrap();
        let b = read_member_bytes(&mut archive, "\\DATA\\a.xml", &[]).unwrap();
        assert_eq!(b, b"<a/>");
    }

    #[test]
    fn single_suffix_match_is_rescued() {
        // Producer added a wrapper directory after inventory.
        let z = build_zip(&[("wrapper/DATA/a.xml", b"<a/>")], None);
        let mut archive = open_archive(z.path()).unwrap();
        let b = read_member_bytes(&mut archive, "DATA/a.xml", &[]).unwrap();
        assert_eq!(b, b"<a/>");
    }

    #[test]
    fn missing_member_is_not_found() {
        let z = build_zip(&[("DATA/a.xml", b"<a/>")], None);
        let mut archive = open_archive(z.path()).unwrap();
        let err = read_member_bytes(&mut archive, "DATA/missing.xml", &[]).unwrap_err();
        assert!(matches!(err, MemberError::NotFound { .. }));
    }

    #[test]
    fn encrypted_member_reads_with_candidate() {
        let z = build_zip(&[("DATA/a.xml", b"<a/>")], Some("pw9"));
        let mut archive = open_archive(z.path()).unwrap();
        let b =
            read_member_bytes(&mut archive, "DATA/a.xml", &["bad".to_string(), "pw9".to_string()])
                .unwrap();
        assert_eq!(b, b"<a/>");
    }

    #[test]
    fn encrypted_member_without_candidates_is_password_error() {
        let z = build_zip(&[("DATA/a.xml", b"<a/>")], Some("pw9"));
        let mut archive = open_archive(z.path()).unwrap();
        let err = read_member_bytes(&mut archive, "DATA/a.xml", &[]).unwrap_err();
        assert!(matches!(err, MemberError::Password { .. }));
    }
}
