//! Startup verification and the three-way recovery decision.
//!
//! The checks run in a fixed order because later stages rely on earlier
//! ones having re-synchronized the audit log seal:
//!
//! | Stage | Check                                   | Discrepancy              |
//! |-------|-----------------------------------------|--------------------------|
//! | 1     | create log and seal if absent           | none                     |
//! | 2     | log digest vs seal file                 | `LogTampered`            |
//! | 3     | counter hash vs counter number          | `SessionCounterTampered` |
//! | 4     | vault present when documents exist      | `VaultMissing`           |
//! | 5     | every vault value is a 64-hex digest    | `VaultCorrupt`           |
//! | 6     | vault file digest vs last log anchor    | `VaultTampered`          |
//! | 7     | every document vs its vault entry       | `ElementsCompromised`    |
//!
//! Stages 1 to 6 run from [`IntegrityVerifier::run_startup`] before login;
//! stage 7 runs from [`IntegrityVerifier::check_documents`] after login.
//!
//! Every discrepancy goes to the [`OperatorPrompt`], which answers
//! [`Resolution::Abort`], [`Resolution::ContinueDegraded`] or
//! [`Resolution::Restore`]:
//!
//! - **Abort** records an incident and returns [`StartupOutcome::Aborted`]
//! - **ContinueDegraded** records a SECURITY event and, for vault and
//!   document discrepancies, demotes the session to read-only
//! - **Restore** re-authenticates the privileged principal through the
//!   [`RecoveryAuthority`] and regenerates the affected artifact; after
//!   [`MAX_RESTORE_ATTEMPTS`] failed attempts the discrepancy is aborted

mod discrepancy;
pub mod stages;

#[cfg(test)]
mod tests;

pub use discrepancy::{Discrepancy, DiscrepancyKind};
use thiserror::Error;

use crate::audit::{AuditLogError, InitOutcome, SessionKind};
use crate::auth::{AuthError, Authenticator, Credentials};
use crate::config::ConfigError;
use crate::documents::StoreError;
use crate::installation::Installation;
use crate::recovery::{Artifact, RecoveryAuthority, RecoveryError};
use crate::session::{SessionContext, SessionSealError};
use crate::vault::VaultError;

/// Failed restore attempts tolerated per discrepancy before aborting.
pub const MAX_RESTORE_ATTEMPTS: u32 = 3;

/// Errors from the integrity layer's orchestration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntegrityError {
    /// Vault I/O failed.
    #[error(transparent)]
    Vault(#[from] VaultError),

    /// Counter I/O failed.
    #[error(transparent)]
    SessionSeal(#[from] SessionSealError),

    /// Audit log I/O failed.
    #[error(transparent)]
    AuditLog(#[from] AuditLogError),

    /// Document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A privileged repair failed.
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    /// Login failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Configuration invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session is read-only.
    #[error("session is read-only: {reason}")]
    ReadOnlySession {
        /// Why the session is read-only.
        reason: String,
    },

    /// The operation needs a signed-in principal.
    #[error("no principal is signed in")]
    NotSignedIn,
}

/// The operator's answer to a discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Stop; the process should exit with a failure code.
    Abort,
    /// Carry on, read-only where the discrepancy demands it.
    ContinueDegraded,
    /// Re-authenticate as the privileged principal and repair.
    Restore,
}

/// The UI seam that resolves discrepancies. Calls block until answered.
pub trait OperatorPrompt {
    /// Chooses how to resolve `discrepancy`.
    fn decide(&mut self, discrepancy: &Discrepancy) -> Resolution;

    /// Privileged credentials for a restore, or `None` to cancel.
    fn credentials(&mut self) -> Option<Credentials>;

    /// Counter value to restore, given the stored one if readable.
    /// `None` cancels.
    fn session_number_to_restore(&mut self, stored: Option<u64>) -> Option<u64>;
}

/// A discrepancy and how it was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The discrepancy.
    pub discrepancy: Discrepancy,
    /// The applied resolution.
    pub resolution: Resolution,
}

/// Summary of a completed verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// What stage 1 found; `None` for document checks.
    pub log_init: Option<InitOutcome>,
    /// Discrepancies met and resolved, in stage order.
    pub resolved: Vec<Resolved>,
}

impl StartupReport {
    /// Returns `true` if every check passed silently.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Result of a verification run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Verification finished; the application may proceed.
    Ready(StartupReport),
    /// The operator aborted on this discrepancy.
    Aborted(Discrepancy),
}

#[derive(Clone, Copy)]
enum VaultStage {
    Existence,
    EntryShape,
    Anchor,
}

enum Applied {
    Continued,
    Restored,
    Aborted(Discrepancy),
}

/// Drives the startup checks against one installation.
pub struct IntegrityVerifier<'a> {
    installation: &'a Installation,
    authenticator: &'a dyn Authenticator,
}

impl<'a> IntegrityVerifier<'a> {
    /// Creates a verifier. The authenticator is used only for restores.
    #[must_use]
    pub fn new(installation: &'a Installation, authenticator: &'a dyn Authenticator) -> Self {
        Self {
            installation,
            authenticator,
        }
    }

    /// Runs stages 1 to 6.
    pub fn run_startup(
        &self,
        ctx: &mut SessionContext,
        prompt: &mut dyn OperatorPrompt,
    ) -> Result<StartupOutcome, IntegrityError> {
        let installation = self.installation;
        let audit = installation.audit();
        let vault = installation.vault();
        let mut report = StartupReport {
            log_init: Some(stages::init_or_load_seal(audit)?),
            resolved: Vec::new(),
        };

        if let Some(d) = stages::check_log_seal(audit)? {
            if let Applied::Aborted(d) = self.resolve(ctx, prompt, d, &mut report)? {
                return Ok(StartupOutcome::Aborted(d));
            }
        }

        if let Some(d) = stages::check_session_seal(installation.counter())? {
            if let Applied::Aborted(d) = self.resolve(ctx, prompt, d, &mut report)? {
                return Ok(StartupOutcome::Aborted(d));
            }
        }

        for stage in [VaultStage::Existence, VaultStage::EntryShape, VaultStage::Anchor] {
            let found = match stage {
                VaultStage::Existence => stages::check_vault_existence(vault, installation.store())?,
                VaultStage::EntryShape => stages::check_vault_entry_shape(vault)?,
                VaultStage::Anchor => stages::check_vault_anchor(vault, audit)?,
            };
            let Some(d) = found else {
                continue;
            };
            match self.resolve(ctx, prompt, d, &mut report)? {
                Applied::Aborted(d) => return Ok(StartupOutcome::Aborted(d)),
                // A degraded vault cannot be meaningfully checked further.
                Applied::Continued => break,
                Applied::Restored => {},
            }
        }

        tracing::info!(discrepancies = report.resolved.len(), "startup verification finished");
        Ok(StartupOutcome::Ready(report))
    }

    /// Runs stage 7, after login.
    pub fn check_documents(
        &self,
        ctx: &mut SessionContext,
        prompt: &mut dyn OperatorPrompt,
    ) -> Result<StartupOutcome, IntegrityError> {
        let installation = self.installation;
        let mut report = StartupReport {
            log_init: None,
            resolved: Vec::new(),
        };
        let found = stages::check_documents(
            installation.vault(),
            installation.store(),
            installation.config().max_reported_compromised,
        )?;
        if let Some(d) = found {
            if let Applied::Aborted(d) = self.resolve(ctx, prompt, d, &mut report)? {
                return Ok(StartupOutcome::Aborted(d));
            }
        }
        Ok(StartupOutcome::Ready(report))
    }

    fn resolve(
        &self,
        ctx: &mut SessionContext,
        prompt: &mut dyn OperatorPrompt,
        discrepancy: Discrepancy,
        report: &mut StartupReport,
    ) -> Result<Applied, IntegrityError> {
        let audit = self.installation.audit();
        tracing::warn!(kind = %discrepancy.kind, message = %discrepancy.message, "integrity discrepancy");
        let mut failed_attempts = 0u32;

        loop {
            let resolution = prompt.decide(&discrepancy);
            match resolution {
                Resolution::Abort => {
                    self.abort(&discrepancy, "startup aborted by operator")?;
                    return Ok(Applied::Aborted(discrepancy));
                },
                Resolution::ContinueDegraded => {
                    audit.record_security(format!(
                        "operator continued despite {}: {}",
                        discrepancy.kind, discrepancy.message
                    ))?;
                    if discrepancy.kind.demotes_session() {
                        ctx.demote(discrepancy.kind.title());
                        if ctx.principal().is_some() {
                            audit.set_active_kind(SessionKind::Viewer)?;
                        }
                    }
                    report.resolved.push(Resolved {
                        discrepancy,
                        resolution,
                    });
                    return Ok(Applied::Continued);
                },
                Resolution::Restore => {
                    if self.try_restore(prompt, &discrepancy)? {
                        report.resolved.push(Resolved {
                            discrepancy,
                            resolution,
                        });
                        return Ok(Applied::Restored);
                    }
                    failed_attempts += 1;
                    if failed_attempts >= MAX_RESTORE_ATTEMPTS {
                        self.abort(&discrepancy, "aborted after repeated failed restore attempts")?;
                        return Ok(Applied::Aborted(discrepancy));
                    }
                },
            }
        }
    }

    /// Returns `Ok(false)` when the attempt was cancelled, denied or the
    /// repair failed; the operator is asked again.
    fn try_restore(
        &self,
        prompt: &mut dyn OperatorPrompt,
        discrepancy: &Discrepancy,
    ) -> Result<bool, IntegrityError> {
        let Some(credentials) = prompt.credentials() else {
            tracing::info!("restore cancelled at credential prompt");
            return Ok(false);
        };
        let authority = RecoveryAuthority::new(self.installation, self.authenticator);
        let grant = match authority.authorize(&credentials) {
            Ok(grant) => grant,
            Err(RecoveryError::AuthDenied { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let artifact = match &discrepancy.kind {
            DiscrepancyKind::LogTampered => Artifact::LogSeal,
            DiscrepancyKind::SessionCounterTampered => {
                let stored = self.installation.counter().read()?.number();
                let Some(number) = prompt.session_number_to_restore(stored) else {
                    return Ok(false);
                };
                Artifact::SessionCounter { number }
            },
            DiscrepancyKind::VaultMissing
            | DiscrepancyKind::VaultCorrupt
            | DiscrepancyKind::VaultTampered => Artifact::Vault,
            DiscrepancyKind::ElementsCompromised { ids } => Artifact::VaultEntries(ids.clone()),
        };

        match authority.regenerate(&artifact, &grant) {
            Ok(_) => Ok(true),
            Err(RecoveryError::AuditLog(e)) => Err(e.into()),
            Err(e) => {
                tracing::error!(%artifact, err = %e, "restore failed");
                Ok(false)
            },
        }
    }

    fn abort(&self, discrepancy: &Discrepancy, action: &str) -> Result<(), IntegrityError> {
        self.installation.audit().record_incident(
            discrepancy.kind.title(),
            &discrepancy.message,
            action,
        )?;
        tracing::error!(kind = %discrepancy.kind, "integrity verification aborted");
        Ok(())
    }
}
