//! On-disk format of the hash vault.
//!
//! The file is a flat JSON object mapping element id to digest, written with
//! sorted keys and two-space indentation so that identical maps always
//! serialize to identical bytes.

use serde_json::{Map, Value};

use super::VaultMap;
use crate::crypto::is_well_formed_digest;

/// Keys that are never document hashes and never persisted in the vault.
pub const RESERVED_KEYS: &[&str] = &["session_counter"];

/// A parsed vault file.
#[derive(Debug, Default)]
pub(crate) struct ParsedVault {
    /// Entries whose value is a well-formed digest.
    pub entries: VaultMap,
    /// Ids whose value failed the digest shape rule.
    pub malformed: Vec<String>,
}

pub(crate) fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Parses vault bytes, separating valid entries from malformed ones.
///
/// Reserved keys are dropped silently; they are neither entries nor
/// corruption.
pub(crate) fn parse(bytes: &[u8]) -> Result<ParsedVault, serde_json::Error> {
    let object: Map<String, Value> = serde_json::from_slice(bytes)?;
    let mut parsed = ParsedVault::default();
    for (id, value) in object {
        if is_reserved(&id) {
            continue;
        }
        match value {
            Value::String(digest) if is_well_formed_digest(&digest) => {
                parsed.entries.insert(id, digest);
            },
            _ => parsed.malformed.push(id),
        }
    }
    Ok(parsed)
}

/// Serializes the valid, non-reserved entries of `map`.
pub(crate) fn render(map: &VaultMap) -> Result<Vec<u8>, serde_json::Error> {
    let filtered: VaultMap = map
        .iter()
        .filter(|(id, digest)| !is_reserved(id) && is_well_formed_digest(digest))
        .map(|(id, digest)| (id.clone(), digest.clone()))
        .collect();
    serde_json::to_vec_pretty(&filtered)
}
