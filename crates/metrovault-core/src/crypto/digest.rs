//! Salted SHA-256 hashing.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Length of the truncated digest carried by legacy anchor events.
pub const ANCHOR_PREFIX_LEN: usize = 16;

/// Salt applied to document, vault and audit-log digests unless configured.
pub const DEFAULT_DOCUMENT_SALT: &str = "METROLOGIA_2024_HASH_SALT_SECURE";

/// Salt applied to the session counter digest unless configured.
pub const DEFAULT_SESSION_SALT: &str = "METROLOGIA_2024_SESSION_SALT_SECURE";

/// Computes `hex(SHA-256(content || salt))`.
///
/// The digester is cheap to clone and carries no state beyond the salt.
#[derive(Clone)]
pub struct Digester {
    salt: Vec<u8>,
}

impl Digester {
    /// Creates a digester with the given salt.
    #[must_use]
    pub fn new(salt: impl Into<Vec<u8>>) -> Self {
        Self { salt: salt.into() }
    }

    /// Digests an in-memory byte slice.
    #[must_use]
    pub fn digest(&self, content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hasher.update(&self.salt);
        hex::encode(hasher.finalize())
    }

    /// Digests a file by streaming its content through the hasher.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be opened or read.
    pub fn digest_file(&self, path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        hasher.update(&self.salt);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl fmt::Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digester")
            .field("salt", &"[REDACTED]")
            .finish()
    }
}

/// Returns `true` if `value` is exactly 64 lowercase hex characters.
#[must_use]
pub fn is_well_formed_digest(value: &str) -> bool {
    value.len() == DIGEST_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Constant-time equality of two digest strings.
#[must_use]
pub fn digests_match(expected: &str, actual: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
}

/// Compares a recorded anchor against the current full digest.
///
/// A 16-character anchor (the legacy truncated form) matches by prefix;
/// any other anchor must equal the full digest.
#[must_use]
pub fn anchor_matches(anchor: &str, current: &str) -> bool {
    let anchor = anchor.trim_end_matches("...");
    if anchor.len() == ANCHOR_PREFIX_LEN {
        return current
            .get(..ANCHOR_PREFIX_LEN)
            .is_some_and(|prefix| digests_match(anchor, prefix));
    }
    digests_match(anchor, current)
}

/// Shortens a digest for human-readable messages.
#[must_use]
pub fn short(digest: &str) -> &str {
    digest.get(..ANCHOR_PREFIX_LEN).unwrap_or(digest)
}
