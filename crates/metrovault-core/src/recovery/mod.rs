//! The privileged gate in front of every trust-restoring operation.
//!
//! Regenerating the vault, resealing the audit log and overwriting the
//! session counter all require an [`AuthorizedPrincipal`], which only
//! [`RecoveryAuthority::authorize`] can mint, and only for the configured
//! privileged identity. Every authorization attempt is an AUTH event; every
//! successful regeneration is exactly one SECURITY event naming the
//! principal.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditEvent, AuditLogError, EventCategory};
use crate::auth::{Authenticator, Credentials};
use crate::crypto::short;
use crate::installation::Installation;
use crate::persist::Durability;
use crate::session::SessionSealError;
use crate::vault::{RebuildSummary, VaultError};

/// Recovery errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecoveryError {
    /// Authentication failed or the principal is not privileged.
    #[error("authorization denied for {username}: {reason}")]
    AuthDenied {
        /// Username presented.
        username: String,
        /// Why it was refused.
        reason: String,
    },

    /// Vault repair failed.
    #[error("vault repair failed: {0}")]
    Vault(#[from] VaultError),

    /// Counter repair failed.
    #[error("session counter repair failed: {0}")]
    SessionSeal(#[from] SessionSealError),

    /// Recording or resealing the audit log failed.
    #[error("audit log repair failed: {0}")]
    AuditLog(#[from] AuditLogError),
}

/// Proof that the privileged principal re-authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPrincipal {
    id: String,
    authorized_at: DateTime<Utc>,
}

impl AuthorizedPrincipal {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authorized_at: Utc::now(),
        }
    }

    /// Principal id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When authorization was granted.
    #[must_use]
    pub const fn authorized_at(&self) -> DateTime<Utc> {
        self.authorized_at
    }
}

/// An artifact the authority can regenerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// Overwrite the session counter with `number`.
    SessionCounter {
        /// Value to restore.
        number: u64,
    },
    /// Reseal the audit log from its current content.
    LogSeal,
    /// Rebuild the whole vault and anchor it.
    Vault,
    /// Re-sign only the listed documents.
    VaultEntries(Vec<String>),
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionCounter { number } => write!(f, "session counter (to {number})"),
            Self::LogSeal => f.write_str("audit log seal"),
            Self::Vault => f.write_str("hash vault"),
            Self::VaultEntries(ids) => write!(f, "vault entries [{}]", ids.join(", ")),
        }
    }
}

/// What a regeneration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerationReport {
    /// Counter now holds `number`.
    SessionCounter {
        /// Restored value.
        number: u64,
    },
    /// Audit log resealed.
    LogSeal {
        /// New seal digest.
        seal: String,
    },
    /// Vault rebuilt and anchored.
    Vault {
        /// Rebuild result.
        summary: RebuildSummary,
        /// Digest text stored in the anchor event.
        anchor: String,
    },
    /// Documents re-signed.
    VaultEntries {
        /// Ids that were re-hashed.
        regenerated: Vec<String>,
    },
}

/// Gate for privileged repairs on one installation.
pub struct RecoveryAuthority<'a> {
    installation: &'a Installation,
    authenticator: &'a dyn Authenticator,
}

impl<'a> RecoveryAuthority<'a> {
    /// Creates the gate.
    #[must_use]
    pub fn new(installation: &'a Installation, authenticator: &'a dyn Authenticator) -> Self {
        Self {
            installation,
            authenticator,
        }
    }

    fn auth_event(&self, message: String) -> Result<(), RecoveryError> {
        self.installation
            .audit()
            .append(AuditEvent::new(EventCategory::Auth, message), Durability::Forced)?;
        Ok(())
    }

    /// Re-authenticates and accepts only the privileged principal.
    pub fn authorize(&self, credentials: &Credentials) -> Result<AuthorizedPrincipal, RecoveryError> {
        let privileged = &self.installation.config().privileged_principal;
        let username = credentials.username.clone();

        match self.authenticator.authenticate(credentials) {
            Ok(principal) if principal.id == *privileged => {
                self.auth_event(format!(
                    "recovery authorization granted to {}",
                    principal.id
                ))?;
                tracing::info!(principal = %principal.id, "recovery authorized");
                Ok(AuthorizedPrincipal::new(principal.id))
            },
            Ok(principal) => {
                let reason = "not the privileged principal".to_string();
                self.auth_event(format!(
                    "recovery authorization denied for {}: {reason}",
                    principal.id
                ))?;
                tracing::warn!(principal = %principal.id, "recovery authorization denied");
                Err(RecoveryError::AuthDenied {
                    username: principal.id,
                    reason,
                })
            },
            Err(e) => {
                let reason = e.to_string();
                self.auth_event(format!(
                    "recovery authorization failed for {username}: {reason}"
                ))?;
                tracing::warn!(%username, %reason, "recovery authentication failed");
                Err(RecoveryError::AuthDenied { username, reason })
            },
        }
    }

    /// Regenerates `artifact`. On failure an ERROR event is recorded and
    /// the error returned; on success exactly one SECURITY event names the
    /// principal.
    pub fn regenerate(
        &self,
        artifact: &Artifact,
        by: &AuthorizedPrincipal,
    ) -> Result<RegenerationReport, RecoveryError> {
        match self.regenerate_inner(artifact, by) {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(%artifact, err = %e, "regeneration failed");
                if let Err(log_err) = self
                    .installation
                    .audit()
                    .record_error(&format!("regeneration of {artifact} failed"), &e.to_string())
                {
                    tracing::error!(err = %log_err, "could not record regeneration failure");
                }
                Err(e)
            },
        }
    }

    fn regenerate_inner(
        &self,
        artifact: &Artifact,
        by: &AuthorizedPrincipal,
    ) -> Result<RegenerationReport, RecoveryError> {
        let installation = self.installation;
        let audit = installation.audit();
        let stamp = format!("by {} at {}", by.id(), by.authorized_at().to_rfc3339());

        match artifact {
            Artifact::SessionCounter { number } => {
                installation.counter().restore(*number, by)?;
                audit.record_security(format!("session counter restored to {number} {stamp}"))?;
                Ok(RegenerationReport::SessionCounter { number: *number })
            },
            Artifact::LogSeal => {
                // The event goes in first so the new seal covers it.
                audit.record_security(format!("audit log seal regenerated {stamp}"))?;
                let seal = audit.seal()?;
                Ok(RegenerationReport::LogSeal { seal })
            },
            Artifact::Vault => {
                let summary = installation.vault().rebuild_full(installation.store())?;
                let anchor = audit.record_anchor(
                    &summary.vault_digest,
                    summary.entries,
                    installation.config().anchor_digest,
                )?;
                audit.record_security(format!(
                    "hash vault rebuilt {stamp}: {} entries, digest {}...",
                    summary.entries,
                    short(&summary.vault_digest)
                ))?;
                Ok(RegenerationReport::Vault { summary, anchor })
            },
            Artifact::VaultEntries(ids) => {
                let regenerated = installation
                    .vault()
                    .regenerate_entries(installation.store(), ids)?;
                audit.record_admin_action(
                    "re-sign documents",
                    &format!("{} [{}]", stamp, regenerated.join(", ")),
                )?;
                Ok(RegenerationReport::VaultEntries { regenerated })
            },
        }
    }
}
