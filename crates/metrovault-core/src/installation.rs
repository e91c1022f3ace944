//! One data directory: its four integrity artifacts, its document store and
//! the login, save and shutdown sequences that keep them consistent.

use crate::audit::{AuditLog, EventCategory, SessionId, SessionKind};
use crate::auth::{Authenticator, Credentials, Principal};
use crate::config::{ArtifactPaths, ConfigError, IntegrityConfig};
use crate::crypto::short;
use crate::documents::{DocumentStore, FsDocumentStore};
use crate::session::{SessionContext, SessionSeal, SessionSealError};
use crate::vault::{HashVault, Verification};
use crate::verifier::IntegrityError;

/// Per-document result of [`Installation::scan_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Element id.
    pub id: String,
    /// Verification outcome.
    pub verification: Verification,
}

/// Result of a full scan of the document tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// One entry per document found on disk, in store order.
    pub entries: Vec<ScanEntry>,
}

impl ScanReport {
    /// Entries that did not verify.
    pub fn failures(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|e| !e.verification.is_ok())
    }

    /// Number of verified documents.
    #[must_use]
    pub fn verified(&self) -> usize {
        self.entries.len() - self.failures().count()
    }

    /// Returns `true` if every document verified.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// What [`Installation::close`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The session closed read-only: only the log was resealed.
    pub read_only: bool,
    /// Digest text stored in the closing anchor event.
    pub anchor: Option<String>,
    /// Vault entries at close.
    pub entries: Option<usize>,
    /// New audit log seal.
    pub seal: String,
    /// Session number after the counter step, if it succeeded.
    pub session_number: Option<u64>,
}

/// An opened installation.
pub struct Installation {
    config: IntegrityConfig,
    paths: ArtifactPaths,
    vault: HashVault,
    counter: SessionSeal,
    audit: AuditLog,
    store: Box<dyn DocumentStore>,
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl Installation {
    /// Opens the installation described by `config` over the filesystem
    /// document store.
    pub fn open(config: &IntegrityConfig) -> Result<Self, ConfigError> {
        let paths = config.paths();
        let store = FsDocumentStore::new(&paths.documents_root, config.categories.clone());
        Self::with_store(config, Box::new(store))
    }

    /// Opens the installation with a caller-supplied document store.
    pub fn with_store(
        config: &IntegrityConfig,
        store: Box<dyn DocumentStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let paths = config.paths();
        Ok(Self {
            vault: HashVault::new(&paths.vault, config.document_digester()),
            counter: SessionSeal::new(&paths.session, config.session_digester()),
            audit: AuditLog::from_paths(&paths, config.document_digester()),
            config: config.clone(),
            paths,
            store,
        })
    }

    /// Settings in force.
    #[must_use]
    pub const fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    /// Resolved artifact paths.
    #[must_use]
    pub const fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// The hash vault.
    #[must_use]
    pub const fn vault(&self) -> &HashVault {
        &self.vault
    }

    /// The session counter.
    #[must_use]
    pub const fn counter(&self) -> &SessionSeal {
        &self.counter
    }

    /// The audit sink.
    #[must_use]
    pub const fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// The document store.
    #[must_use]
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Authenticates, advances the session counter once and opens the
    /// login's audit session.
    ///
    /// A tampered counter does not block the login; the session is tagged
    /// `UNCOUNTED_<timestamp>` instead of receiving a number.
    pub fn login(
        &self,
        ctx: &mut SessionContext,
        authenticator: &dyn Authenticator,
        credentials: &Credentials,
    ) -> Result<Principal, IntegrityError> {
        let principal = match authenticator.authenticate(credentials) {
            Ok(principal) => principal,
            Err(e) => {
                self.audit.record(
                    EventCategory::Auth,
                    format!("login failed for {}: {e}", credentials.username),
                )?;
                return Err(e.into());
            },
        };

        let id = match self.counter.increment(ctx) {
            Ok(outcome) => SessionId::Number(outcome.number),
            Err(SessionSealError::Tampered { .. }) => {
                tracing::warn!("session counter tampered, login recorded without a number");
                self.audit.record(
                    EventCategory::Security,
                    "session counter not advanced: stored counter failed verification",
                )?;
                SessionId::uncounted(chrono::Utc::now())
            },
            Err(e) => return Err(e.into()),
        };

        let read_only = principal.role.is_read_only() || ctx.read_only_reason().is_some();
        let kind = if read_only {
            SessionKind::Viewer
        } else {
            SessionKind::Normal
        };
        self.audit.begin_session(id.clone(), &principal.id, kind)?;
        ctx.sign_in(principal.clone());
        if let Some(role) = ctx.effective_role() {
            self.audit.record_login(&principal.id, role)?;
        }
        if let Some(reason) = ctx.read_only_reason() {
            self.audit.record(
                EventCategory::Security,
                format!("session opened read-only: {reason}"),
            )?;
        }
        tracing::info!(session = %id, user = %principal.id, read_only, "signed in");
        Ok(principal)
    }

    /// Writes a document and records its fresh digest in the vault.
    ///
    /// Refused in a read-only session; the refusal is audited.
    pub fn save_document(
        &self,
        ctx: &SessionContext,
        category: &str,
        id: &str,
        content: &[u8],
    ) -> Result<String, IntegrityError> {
        if ctx.principal().is_none() {
            return Err(IntegrityError::NotSignedIn);
        }
        if ctx.is_read_only() {
            let reason = ctx
                .read_only_reason()
                .unwrap_or("signed in as viewer")
                .to_string();
            self.audit.record_security(format!(
                "refused to save {id}: session is read-only ({reason})"
            ))?;
            return Err(IntegrityError::ReadOnlySession { reason });
        }

        self.store.write(category, id, content)?;
        let digest = self.vault.digester().digest(content);
        self.vault.record(id, &digest)?;
        self.audit
            .record_data_change("saved", id, &format!("digest {}...", short(&digest)))?;
        Ok(digest)
    }

    /// Verifies every document on disk against the vault. Touches no
    /// artifact.
    pub fn scan_all(&self) -> Result<ScanReport, IntegrityError> {
        let map = self.vault.load()?;
        let mut report = ScanReport::default();
        for (id, path) in self.store.index()? {
            let verification = self.vault.verify_against(&map, &id, &path);
            report.entries.push(ScanEntry { id, verification });
        }
        Ok(report)
    }

    /// The shutdown sequence.
    ///
    /// A read-only or signed-out session records a viewer close, ends its
    /// audit session and reseals the log. Otherwise the vault is rebuilt,
    /// anchored into the log, the log is resealed and the counter step runs
    /// (a no-op after login). A failed rebuild is recorded as an ERROR
    /// event and the log is still sealed.
    pub fn close(&self, ctx: &mut SessionContext) -> Result<ShutdownReport, IntegrityError> {
        if ctx.is_read_only() || ctx.principal().is_none() {
            self.audit.record_viewer_close()?;
            self.audit.end_session()?;
            let seal = self.audit.seal()?;
            tracing::info!("read-only shutdown, audit log resealed");
            return Ok(ShutdownReport {
                read_only: true,
                anchor: None,
                entries: None,
                seal,
                session_number: ctx.session_number(),
            });
        }

        let (anchor, entries) = match self.vault.rebuild_full(self.store.as_ref()) {
            Ok(summary) => {
                let anchor = self.audit.record_anchor(
                    &summary.vault_digest,
                    summary.entries,
                    self.config.anchor_digest,
                )?;
                (Some(anchor), Some(summary.entries))
            },
            Err(e) => {
                tracing::error!(err = %e, "vault rebuild failed at shutdown");
                self.audit.record_error("vault rebuild at shutdown", &e.to_string())?;
                (None, None)
            },
        };
        self.audit.end_session()?;
        let seal = self.audit.seal()?;

        let session_number = match self.counter.increment(ctx) {
            Ok(outcome) => Some(outcome.number),
            Err(e) => {
                tracing::warn!(err = %e, "session counter not advanced at shutdown");
                None
            },
        };
        tracing::info!(?session_number, "shutdown complete");
        Ok(ShutdownReport {
            read_only: false,
            anchor,
            entries,
            seal,
            session_number,
        })
    }
}
