//! SHA-256 content digests.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// The first `len` hex characters of the SHA-256 of `bytes`.
#[must_use]
pub fn short_digest(bytes: &[u8], len: usize) -> String {
    let mut hex = sha256_hex(bytes);
    hex.truncate(len);
    hex
}
