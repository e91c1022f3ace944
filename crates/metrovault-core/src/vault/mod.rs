//! The hash vault: a persisted `element id -> digest` map covering every
//! managed document.
//!
//! The vault is written only by document saves, the shutdown sequence and
//! the recovery authority. An absent file means "never initialized", which
//! is distinct from a present but empty map.
//!
//! Loading is tolerant: an unparseable file loads as an empty map and an
//! entry whose value is not a 64-character lowercase hex digest is dropped,
//! so one corrupted entry never invalidates the rest. The verifier uses
//! [`HashVault::inspect`] instead, which reports both conditions.

mod storage;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub use storage::RESERVED_KEYS;
use thiserror::Error;

use crate::crypto::{Digester, digests_match, is_well_formed_digest};
use crate::documents::{DocumentStore, StoreError};
use crate::persist::{self, Durability, PersistError};

/// Vault contents, sorted by element id.
pub type VaultMap = BTreeMap<String, String>;

/// Vault errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VaultError {
    /// Reading or writing the vault file failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Serializing the vault failed.
    #[error("vault serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Enumerating managed documents failed.
    #[error("document store error: {0}")]
    Store(#[from] StoreError),

    /// A digest handed to the vault is not 64 lowercase hex characters.
    #[error("refusing malformed digest for {id}")]
    InvalidDigest {
        /// Element id the digest was meant for.
        id: String,
    },

    /// The id is reserved for non-hash data.
    #[error("{id} is a reserved key")]
    ReservedKey {
        /// The rejected id.
        id: String,
    },

    /// Hashing the vault file itself failed.
    #[error("cannot digest vault file {path}: {source}")]
    FileDigest {
        /// Vault path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Structural view of the vault file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultInspection {
    /// No vault file exists.
    Absent,
    /// The file exists but is not a JSON object.
    Unparseable {
        /// Parser message.
        reason: String,
    },
    /// The file parsed.
    Present {
        /// Well-formed entries.
        entries: VaultMap,
        /// Ids whose value failed the digest shape rule.
        malformed: Vec<String>,
    },
}

/// Result of checking one document against the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The document digest matches its vault entry.
    Verified,
    /// The vault has no entry for this id.
    NotInVault,
    /// The document could not be read or hashed.
    DigestError {
        /// I/O failure description.
        reason: String,
    },
    /// The document changed since its digest was recorded.
    Mismatch {
        /// Digest stored in the vault.
        expected: String,
        /// Digest of the current content.
        actual: String,
    },
}

impl Verification {
    /// Returns `true` only for [`Verification::Verified`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => f.write_str("verified"),
            Self::NotInVault => f.write_str("not registered in the hash vault"),
            Self::DigestError { reason } => write!(f, "digest error: {reason}"),
            Self::Mismatch { .. } => f.write_str("content does not match the registered digest"),
        }
    }
}

/// Outcome of [`HashVault::rebuild_full`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Digest of the persisted vault file.
    pub vault_digest: String,
    /// Number of entries written.
    pub entries: usize,
    /// Documents that could not be hashed and were left out.
    pub skipped: Vec<String>,
}

/// The persisted hash vault.
#[derive(Debug, Clone)]
pub struct HashVault {
    path: PathBuf,
    digester: Digester,
}

impl HashVault {
    /// Creates a handle; nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, digester: Digester) -> Self {
        Self {
            path: path.into(),
            digester,
        }
    }

    /// Vault file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Digester used for documents and for the vault file itself.
    #[must_use]
    pub const fn digester(&self) -> &Digester {
        &self.digester
    }

    /// Returns `true` if the vault file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Reports the structural state of the vault file.
    pub fn inspect(&self) -> Result<VaultInspection, VaultError> {
        let Some(bytes) = persist::read_optional(&self.path)? else {
            return Ok(VaultInspection::Absent);
        };
        Ok(match storage::parse(&bytes) {
            Ok(parsed) => VaultInspection::Present {
                entries: parsed.entries,
                malformed: parsed.malformed,
            },
            Err(e) => VaultInspection::Unparseable {
                reason: e.to_string(),
            },
        })
    }

    /// Loads the well-formed entries.
    ///
    /// An absent or unparseable file yields an empty map.
    pub fn load(&self) -> Result<VaultMap, VaultError> {
        match self.inspect()? {
            VaultInspection::Present { entries, malformed } => {
                if !malformed.is_empty() {
                    tracing::warn!(count = malformed.len(), "dropping malformed vault entries");
                }
                Ok(entries)
            },
            VaultInspection::Unparseable { reason } => {
                tracing::warn!(path = %self.path.display(), %reason, "vault unparseable, loading as empty");
                Ok(VaultMap::new())
            },
            VaultInspection::Absent => Ok(VaultMap::new()),
        }
    }

    /// Persists `map`, dropping reserved keys and malformed values.
    pub fn save(&self, map: &VaultMap) -> Result<(), VaultError> {
        self.save_with(map, Durability::Standard)
    }

    fn save_with(&self, map: &VaultMap, durability: Durability) -> Result<(), VaultError> {
        let bytes = storage::render(map)?;
        persist::atomic_write(&self.path, &bytes, durability)?;
        Ok(())
    }

    /// Records one digest, keeping every other entry.
    pub fn record(&self, id: &str, digest: &str) -> Result<(), VaultError> {
        if storage::is_reserved(id) {
            return Err(VaultError::ReservedKey { id: id.to_string() });
        }
        if !is_well_formed_digest(digest) {
            return Err(VaultError::InvalidDigest { id: id.to_string() });
        }
        let mut map = self.load()?;
        map.insert(id.to_string(), digest.to_string());
        self.save(&map)
    }

    /// Digest of the vault file bytes, or `None` if the file is absent.
    pub fn file_digest(&self) -> Result<Option<String>, VaultError> {
        if !self.exists() {
            return Ok(None);
        }
        self.digester
            .digest_file(&self.path)
            .map(Some)
            .map_err(|source| VaultError::FileDigest {
                path: self.path.clone(),
                source,
            })
    }

    /// Re-hashes every managed document and replaces the vault with the
    /// result.
    ///
    /// Documents that cannot be hashed are skipped with a warning and
    /// reported in [`RebuildSummary::skipped`]. The vault is written with
    /// forced durability before its own digest is computed.
    pub fn rebuild_full(&self, store: &dyn DocumentStore) -> Result<RebuildSummary, VaultError> {
        let mut map = VaultMap::new();
        let mut skipped = Vec::new();
        for (id, path) in store.index()? {
            match self.digester.digest_file(&path) {
                Ok(digest) => {
                    map.insert(id, digest);
                },
                Err(reason) => {
                    tracing::warn!(id = %id, %reason, "skipping document during vault rebuild");
                    skipped.push(id);
                },
            }
        }

        self.save_with(&map, Durability::Forced)?;
        let vault_digest = self.file_digest()?.ok_or_else(|| VaultError::FileDigest {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "vault vanished after save"),
        })?;
        tracing::info!(entries = map.len(), skipped = skipped.len(), "vault rebuilt");
        Ok(RebuildSummary {
            vault_digest,
            entries: map.len(),
            skipped,
        })
    }

    /// Re-hashes only the listed documents. Returns the ids that were
    /// re-signed; ids that cannot be hashed are left untouched.
    pub fn regenerate_entries(
        &self,
        store: &dyn DocumentStore,
        ids: &[String],
    ) -> Result<Vec<String>, VaultError> {
        let mut map = self.load()?;
        let mut regenerated = Vec::new();
        for id in ids {
            match self.digest_document(store, id) {
                Ok(digest) => {
                    map.insert(id.clone(), digest);
                    regenerated.push(id.clone());
                },
                Err(reason) => {
                    tracing::warn!(id = %id, %reason, "cannot re-sign document");
                },
            }
        }
        self.save_with(&map, Durability::Forced)?;
        Ok(regenerated)
    }

    /// Checks one document against the vault.
    pub fn verify_one(&self, id: &str, path: &Path) -> Result<Verification, VaultError> {
        let map = self.load()?;
        Ok(self.verify_against(&map, id, path))
    }

    /// Checks one document against an already loaded map.
    #[must_use]
    pub fn verify_against(&self, map: &VaultMap, id: &str, path: &Path) -> Verification {
        let Some(expected) = map.get(id) else {
            return Verification::NotInVault;
        };
        match self.digester.digest_file(path) {
            Ok(actual) if digests_match(expected, &actual) => Verification::Verified,
            Ok(actual) => Verification::Mismatch {
                expected: expected.clone(),
                actual,
            },
            Err(e) => Verification::DigestError {
                reason: e.to_string(),
            },
        }
    }

    fn digest_document(&self, store: &dyn DocumentStore, id: &str) -> Result<String, String> {
        let path = store.path(id).map_err(|e| e.to_string())?;
        self.digester.digest_file(&path).map_err(|e| e.to_string())
    }
}
