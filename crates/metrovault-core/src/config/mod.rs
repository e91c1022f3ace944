//! Configuration parsing and management.
//!
//! This module handles the `metrovault.toml` file that locates the four
//! integrity artifacts, the managed document tree, the digest salts and the
//! identity of the privileged recovery principal.
//!
//! ```toml
//! [integrity]
//! data_dir = "/var/lib/metrovault"
//! categories = ["standards", "instruments"]
//! privileged_principal = "admin"
//! anchor_digest = "full"
//!
//! [[users]]
//! id = "admin"
//! role = "operator"
//! password_sha256 = "…"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Role;
use crate::crypto::{DEFAULT_DOCUMENT_SALT, DEFAULT_SESSION_SALT, Digester};

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field failed validation.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetrovaultConfig {
    /// Integrity layer settings.
    #[serde(default)]
    pub integrity: IntegrityConfig,

    /// Accounts known to the bundled authentication provider.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

impl MetrovaultConfig {
    /// Load configuration from a TOML file.
    ///
    /// Relative paths inside `[integrity]` stay relative; they are resolved
    /// against `data_dir` by [`IntegrityConfig::paths`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.integrity.validate()?;
        for user in &config.users {
            if user.id.trim().is_empty() {
                return Err(ConfigError::Validation("user id must not be empty".into()));
            }
        }
        Ok(config)
    }

    /// Serialize configuration to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Width of the vault digest recorded in anchor events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorDigest {
    /// The full 64-character digest.
    #[default]
    Full,
    /// The legacy 16-character prefix (64-bit collision resistance).
    Prefix16,
}

/// Integrity layer settings (`[integrity]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Base directory; every relative path below is resolved against it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Hash vault file.
    #[serde(default = "default_vault_file")]
    pub vault_file: PathBuf,

    /// Session counter file.
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,

    /// Audit log file.
    #[serde(default = "default_audit_log_file")]
    pub audit_log_file: PathBuf,

    /// External seal of the audit log.
    #[serde(default = "default_audit_seal_file")]
    pub audit_seal_file: PathBuf,

    /// Plain-text fallback for incidents that could not be written to the
    /// audit log.
    #[serde(default = "default_emergency_log_file")]
    pub emergency_log_file: PathBuf,

    /// Root of the managed document tree.
    #[serde(default = "default_documents_root")]
    pub documents_root: PathBuf,

    /// Document categories (subdirectories of `documents_root`).
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// The only principal allowed to authorize recovery.
    #[serde(default = "default_privileged_principal")]
    pub privileged_principal: String,

    /// Maximum number of compromised documents reported per scan.
    #[serde(default = "default_max_reported_compromised")]
    pub max_reported_compromised: usize,

    /// Width of the digest stored in new anchor events.
    #[serde(default)]
    pub anchor_digest: AnchorDigest,

    /// Salt for document, vault and audit-log digests.
    #[serde(default = "default_document_salt")]
    pub document_salt: String,

    /// Salt for the session counter digest.
    #[serde(default = "default_session_salt")]
    pub session_salt: String,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            vault_file: default_vault_file(),
            session_file: default_session_file(),
            audit_log_file: default_audit_log_file(),
            audit_seal_file: default_audit_seal_file(),
            emergency_log_file: default_emergency_log_file(),
            documents_root: default_documents_root(),
            categories: default_categories(),
            privileged_principal: default_privileged_principal(),
            max_reported_compromised: default_max_reported_compromised(),
            anchor_digest: AnchorDigest::default(),
            document_salt: default_document_salt(),
            session_salt: default_session_salt(),
        }
    }
}

impl IntegrityConfig {
    /// Default configuration rooted at `data_dir`.
    #[must_use]
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Fail-closed validation of the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::Validation(
                "integrity.categories must name at least one category".into(),
            ));
        }
        if let Some(bad) = self
            .categories
            .iter()
            .find(|c| c.is_empty() || c.contains(['/', '\\']) || c.as_str() == "..")
        {
            return Err(ConfigError::Validation(format!(
                "integrity.categories contains invalid entry {bad:?}"
            )));
        }
        if self.privileged_principal.trim().is_empty() {
            return Err(ConfigError::Validation(
                "integrity.privileged_principal must not be empty".into(),
            ));
        }
        if self.max_reported_compromised == 0 {
            return Err(ConfigError::Validation(
                "integrity.max_reported_compromised must be at least 1".into(),
            ));
        }
        if self.document_salt.is_empty() || self.session_salt.is_empty() {
            return Err(ConfigError::Validation("digest salts must not be empty".into()));
        }
        Ok(())
    }

    /// Resolves every artifact path against `data_dir`.
    #[must_use]
    pub fn paths(&self) -> ArtifactPaths {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.data_dir.join(p)
            }
        };
        ArtifactPaths {
            vault: resolve(&self.vault_file),
            session: resolve(&self.session_file),
            audit_log: resolve(&self.audit_log_file),
            audit_seal: resolve(&self.audit_seal_file),
            emergency_log: resolve(&self.emergency_log_file),
            documents_root: resolve(&self.documents_root),
        }
    }

    /// Digester for documents, the vault file and the audit log.
    #[must_use]
    pub fn document_digester(&self) -> Digester {
        Digester::new(self.document_salt.as_bytes())
    }

    /// Digester for the session counter value.
    #[must_use]
    pub fn session_digester(&self) -> Digester {
        Digester::new(self.session_salt.as_bytes())
    }
}

/// Fully resolved artifact locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Hash vault file.
    pub vault: PathBuf,
    /// Session counter file.
    pub session: PathBuf,
    /// Audit log file.
    pub audit_log: PathBuf,
    /// Audit log seal file.
    pub audit_seal: PathBuf,
    /// Emergency plain-text incident log.
    pub emergency_log: PathBuf,
    /// Managed document tree.
    pub documents_root: PathBuf,
}

/// An account for the bundled authentication provider (`[[users]]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserConfig {
    /// Login identifier.
    pub id: String,

    /// Role granted on login.
    #[serde(default = "default_user_role")]
    pub role: Role,

    /// Hex SHA-256 of the password.
    pub password_sha256: String,

    /// Display name used in audit messages.
    #[serde(default)]
    pub display_name: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_vault_file() -> PathBuf {
    PathBuf::from("hashes_vault.json")
}

fn default_session_file() -> PathBuf {
    PathBuf::from("data/session_counter.json")
}

fn default_audit_log_file() -> PathBuf {
    PathBuf::from("metrovault_log.json")
}

fn default_audit_seal_file() -> PathBuf {
    PathBuf::from("metrovault_log.seal")
}

fn default_emergency_log_file() -> PathBuf {
    PathBuf::from("emergency_security.log")
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_categories() -> Vec<String> {
    vec!["standards".to_string(), "instruments".to_string()]
}

fn default_privileged_principal() -> String {
    "admin".to_string()
}

const fn default_max_reported_compromised() -> usize {
    5
}

fn default_document_salt() -> String {
    DEFAULT_DOCUMENT_SALT.to_string()
}

fn default_session_salt() -> String {
    DEFAULT_SESSION_SALT.to_string()
}

const fn default_user_role() -> Role {
    Role::Viewer
}
