//! Content and identity hashing.
//!
//! Two hash families are used throughout the ledger: SHA-1 for the
//! `path_hash` natural key of observed share paths (short, collision
//! risk acceptable for a path identity) and SHA-256 for all content
//! identities (ZIP bytes, XML bytes, normalized inner paths).

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha1::{Digest as _, Sha1};
use sha2::Sha256;

/// Chunk size for streaming file hashes. Share reads are the slow path,
/// so chunks stay at 1 MiB or larger.
const FILE_CHUNK_BYTES: usize = 1024 * 1024;

/// SHA-1 of a UTF-8 string, lowercase hex. Used for `shared_files.path_hash`.
#[must_use]
pub fn sha1_text(s: &str) -> String {
    let mut h = Sha1::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// SHA-256 of a UTF-8 string, lowercase hex. Used for normalized inner paths.
#[must_use]
pub fn sha256_text(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// SHA-256 of a byte slice, lowercase hex.
#[must_use]
pub fn sha256_bytes(b: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(b);
    hex::encode(h.finalize())
}

/// SHA-256 of a file's full contents, streamed in 1 MiB chunks.
///
/// # Errors
///
/// Returns the underlying I/O error when the file cannot be opened or read.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut f = File::open(path)?;
    let mut h = Sha256::new();
    let mut buf = vec![0u8; FILE_CHUNK_BYTES];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    Ok(hex::encode(h.finalize()))
}

/// Placeholder content hash for rows whose bytes could not be read.
/// The ledger requires a non-empty key even for unreadable members.
#[must_use]
pub const fn zero_sha256() -> &'static str {
    "0000000000000000000000000000000000000000000000000000000000000000"
}
