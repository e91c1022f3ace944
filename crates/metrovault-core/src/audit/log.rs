//! The sealed, append-only audit log.
//!
//! The log file is a JSON array of [`AuditSession`]s. Every append parses
//! the whole file (or reinitializes it when it cannot be parsed, after
//! preserving the unreadable copy), appends in memory and rewrites the file
//! atomically. The seal file holds `digest(log bytes)` and is rewritten by
//! [`AuditLog::seal`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::AuditLogError;
use super::model::{AuditEvent, AuditSession, EventCategory, EventMarker, SessionId, SessionKind};
use crate::auth::Role;
use crate::config::{AnchorDigest, ArtifactPaths};
use crate::crypto::{Digester, digests_match, short};
use crate::persist::{self, Durability, MAX_ARTIFACT_FILE_SIZE};

/// User recorded on sessions nobody signed in to.
pub const SYSTEM_USER: &str = "SYSTEM";

/// What [`AuditLog::initialize`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// No log existed; an empty log and its seal were created.
    Created,
    /// The log existed without a seal; the seal was created from it.
    SealCreated,
    /// Log and seal both existed.
    Existing,
}

/// Result of comparing the log against its seal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealStatus {
    /// The seal matches the log.
    Intact,
    /// The seal did not match, but the last event is a viewer close; the
    /// seal was regenerated.
    ResealedAfterViewerClose,
    /// The log changed since it was sealed.
    Mismatch {
        /// Digest stored in the seal file.
        expected: String,
        /// Digest of the current log.
        actual: String,
    },
    /// No seal file.
    SealMissing,
    /// No log file.
    LogMissing,
}

/// Where an incident record ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncidentSink {
    /// Written as a standalone session in the audit log.
    AuditLog(SessionId),
    /// The audit log was unwritable; a plain-text line went to the
    /// emergency log.
    EmergencyLog,
}

#[derive(Debug, Clone)]
struct ActiveSession {
    id: SessionId,
    user: String,
    kind: SessionKind,
}

#[derive(Debug, Default)]
struct LogState {
    active: Option<ActiveSession>,
    pending: Vec<AuditEvent>,
    actor: Option<String>,
}

/// The audit sink. Constructed once per process and shared by reference.
#[derive(Debug)]
pub struct AuditLog {
    log_path: PathBuf,
    seal_path: PathBuf,
    emergency_path: PathBuf,
    digester: Digester,
    state: Mutex<LogState>,
}

impl AuditLog {
    /// Creates the sink over the given files.
    #[must_use]
    pub fn new(
        log_path: impl Into<PathBuf>,
        seal_path: impl Into<PathBuf>,
        emergency_path: impl Into<PathBuf>,
        digester: Digester,
    ) -> Self {
        Self {
            log_path: log_path.into(),
            seal_path: seal_path.into(),
            emergency_path: emergency_path.into(),
            digester,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Creates the sink over the configured artifact paths.
    #[must_use]
    pub fn from_paths(paths: &ArtifactPaths, digester: Digester) -> Self {
        Self::new(
            &paths.audit_log,
            &paths.audit_seal,
            &paths.emergency_log,
            digester,
        )
    }

    /// Log file location.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Seal file location.
    #[must_use]
    pub fn seal_path(&self) -> &Path {
        &self.seal_path
    }

    /// Emergency log location.
    #[must_use]
    pub fn emergency_path(&self) -> &Path {
        &self.emergency_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, LogState>, AuditLogError> {
        self.state.lock().map_err(|_| AuditLogError::LockPoisoned)
    }

    // ------------------------------------------------------------------
    // Initialization and reading
    // ------------------------------------------------------------------

    /// Creates an empty log and its seal if the log is absent, or a seal
    /// for an existing log if only the seal is absent.
    pub fn initialize(&self) -> Result<InitOutcome, AuditLogError> {
        if !self.log_path.exists() {
            self.write_sessions(&[], Durability::Forced)?;
            self.seal()?;
            self.lock()?
                .pending
                .push(AuditEvent::new(EventCategory::System, "audit log initialized"));
            tracing::info!(path = %self.log_path.display(), "audit log created");
            return Ok(InitOutcome::Created);
        }
        if !self.seal_path.exists() {
            self.seal()?;
            tracing::warn!(path = %self.seal_path.display(), "audit seal missing, created from current log");
            return Ok(InitOutcome::SealCreated);
        }
        Ok(InitOutcome::Existing)
    }

    /// Parses the log. An absent log is empty; an unparseable one is an
    /// error.
    pub fn read_sessions(&self) -> Result<Vec<AuditSession>, AuditLogError> {
        let Some(bytes) = persist::read_optional(&self.log_path)? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes).map_err(|e| AuditLogError::Corrupt {
            path: self.log_path.clone(),
            reason: e.to_string(),
        })
    }

    /// Parses the log for appending. An unparseable log is copied aside and
    /// replaced by a fresh one that opens with an incident session naming
    /// the preserved copy.
    fn load_or_reinitialize(&self) -> Result<Vec<AuditSession>, AuditLogError> {
        match self.read_sessions() {
            Ok(sessions) => Ok(sessions),
            Err(AuditLogError::Corrupt { reason, .. }) => {
                let now = Utc::now();
                let mut preserved = OsString::from(self.log_path.as_os_str());
                preserved.push(format!(".corrupt-{}", now.format("%Y%m%dT%H%M%S")));
                let preserved = PathBuf::from(preserved);

                let bytes = persist::read_bounded(&self.log_path, MAX_ARTIFACT_FILE_SIZE)?;
                persist::atomic_write(&preserved, &bytes, Durability::Forced)?;
                tracing::error!(
                    path = %self.log_path.display(),
                    preserved = %preserved.display(),
                    %reason,
                    "audit log unreadable, reinitializing"
                );

                let mut session =
                    AuditSession::new(SessionId::incident(now), SYSTEM_USER, SessionKind::Incident);
                session.events.push(AuditEvent::new(
                    EventCategory::Error,
                    format!(
                        "audit log was unreadable ({reason}); previous content preserved at {}",
                        preserved.display()
                    ),
                ));
                Ok(vec![session])
            },
            Err(e) => Err(e),
        }
    }

    fn write_sessions(
        &self,
        sessions: &[AuditSession],
        durability: Durability,
    ) -> Result<(), AuditLogError> {
        let bytes = serde_json::to_vec_pretty(sessions)?;
        persist::atomic_write(&self.log_path, &bytes, durability)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Sets the user recorded on synthesized administrative sessions.
    ///
    /// Used before anyone has signed in, for example to attribute a
    /// recovery attempt to the principal it claims.
    pub fn set_actor(&self, actor: Option<String>) -> Result<(), AuditLogError> {
        self.lock()?.actor = actor;
        Ok(())
    }

    /// Opens a session and makes it the target of subsequent appends.
    /// Events recorded before any session existed are moved into it.
    ///
    /// A session that was still active, typically one synthesized for
    /// startup discrepancies, is closed first.
    pub fn begin_session(
        &self,
        id: SessionId,
        user: &str,
        kind: SessionKind,
    ) -> Result<(), AuditLogError> {
        let mut state = self.lock()?;
        let mut sessions = self.load_or_reinitialize()?;
        if let Some(previous) = state.active.take() {
            if let Some(session) = sessions
                .iter_mut()
                .rev()
                .find(|s| s.session_number == previous.id)
            {
                session.end_time.get_or_insert_with(Utc::now);
            }
            tracing::debug!(session = %previous.id, "audit session superseded");
        }
        let mut session = AuditSession::new(id.clone(), user, kind);
        session.events.append(&mut state.pending);
        sessions.push(session);
        self.write_sessions(&sessions, Durability::Standard)?;
        tracing::debug!(session = %id, %user, "audit session opened");
        state.active = Some(ActiveSession {
            id,
            user: user.to_string(),
            kind,
        });
        state.actor = Some(user.to_string());
        Ok(())
    }

    /// The session appends currently go to.
    pub fn active_session(&self) -> Result<Option<SessionId>, AuditLogError> {
        Ok(self.lock()?.active.as_ref().map(|a| a.id.clone()))
    }

    /// Changes the kind of the active session.
    pub fn set_active_kind(&self, kind: SessionKind) -> Result<(), AuditLogError> {
        let mut state = self.lock()?;
        let Some(active) = state.active.as_mut() else {
            return Ok(());
        };
        active.kind = kind;
        let active = active.clone();
        let mut sessions = self.load_or_reinitialize()?;
        if let Some(session) = sessions
            .iter_mut()
            .rev()
            .find(|s| s.session_number == active.id)
        {
            session.kind = kind;
            self.write_sessions(&sessions, Durability::Standard)?;
        }
        Ok(())
    }

    /// Stamps `end_time` on the active session and clears it.
    pub fn end_session(&self) -> Result<(), AuditLogError> {
        let mut state = self.lock()?;
        let Some(active) = state.active.take() else {
            return Ok(());
        };
        let mut sessions = self.load_or_reinitialize()?;
        if let Some(session) = sessions
            .iter_mut()
            .rev()
            .find(|s| s.session_number == active.id)
        {
            session.end_time = Some(Utc::now());
        }
        self.write_sessions(&sessions, Durability::Standard)?;
        tracing::debug!(session = %active.id, "audit session closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Appending
    // ------------------------------------------------------------------

    /// Appends `event` to the last session named `id`, creating that
    /// session for `user` if it does not exist.
    pub fn append_to(
        &self,
        id: &SessionId,
        user: &str,
        event: AuditEvent,
        durability: Durability,
    ) -> Result<(), AuditLogError> {
        let _state = self.lock()?;
        let mut sessions = self.load_or_reinitialize()?;
        match sessions.iter_mut().rev().find(|s| &s.session_number == id) {
            Some(session) => session.events.push(event),
            None => {
                let mut session = AuditSession::new(id.clone(), user, SessionKind::Administrative);
                session.events.push(event);
                sessions.push(session);
            },
        }
        self.write_sessions(&sessions, durability)
    }

    /// Appends `event` to the active session. With no active session an
    /// administrative session tagged `ADMIN_<timestamp>` is synthesized and
    /// becomes active.
    pub fn append(&self, event: AuditEvent, durability: Durability) -> Result<(), AuditLogError> {
        let mut state = self.lock()?;
        self.append_locked(&mut state, event, durability)
    }

    fn append_locked(
        &self,
        state: &mut LogState,
        event: AuditEvent,
        durability: Durability,
    ) -> Result<(), AuditLogError> {
        let mut sessions = self.load_or_reinitialize()?;
        let active = match &state.active {
            Some(active) => active.clone(),
            None => {
                let user = state.actor.clone().unwrap_or_else(|| SYSTEM_USER.to_string());
                let active = ActiveSession {
                    id: SessionId::admin(Utc::now()),
                    user,
                    kind: SessionKind::Administrative,
                };
                tracing::debug!(session = %active.id, "synthesized administrative session");
                state.active = Some(active.clone());
                active
            },
        };

        let index = match sessions
            .iter()
            .rposition(|s| s.session_number == active.id)
        {
            Some(index) => index,
            None => {
                sessions.push(AuditSession::new(
                    active.id.clone(),
                    &active.user,
                    active.kind,
                ));
                sessions.len() - 1
            },
        };
        let session = &mut sessions[index];
        session.kind = active.kind;
        session.events.append(&mut state.pending);
        session.events.push(event);
        self.write_sessions(&sessions, durability)
    }

    /// Records an event in the active session, or queues it until a
    /// session is opened.
    pub fn record(&self, category: EventCategory, message: impl Into<String>) -> Result<(), AuditLogError> {
        let event = AuditEvent::new(category, message);
        let mut state = self.lock()?;
        if state.active.is_none() {
            state.pending.push(event);
            return Ok(());
        }
        self.append_locked(&mut state, event, Durability::Standard)
    }

    /// Records a SECURITY event with forced durability, synthesizing an
    /// administrative session if needed.
    pub fn record_security(&self, message: impl Into<String>) -> Result<(), AuditLogError> {
        self.append(
            AuditEvent::new(EventCategory::Security, message),
            Durability::Forced,
        )
    }

    /// Records an AUTH event for a successful login.
    pub fn record_login(&self, user: &str, role: Role) -> Result<(), AuditLogError> {
        self.record(EventCategory::Auth, format!("login: {user} (role: {role})"))
    }

    /// Records a NAV event.
    pub fn record_navigation(&self, screen: &str) -> Result<(), AuditLogError> {
        self.record(EventCategory::Nav, format!("opened {screen}"))
    }

    /// Records a DATA event for a document change.
    pub fn record_data_change(&self, action: &str, id: &str, detail: &str) -> Result<(), AuditLogError> {
        let message = if detail.is_empty() {
            format!("{action}: {id}")
        } else {
            format!("{action}: {id} - {detail}")
        };
        self.record(EventCategory::Data, message)
    }

    /// Records an ERROR event.
    pub fn record_error(&self, context: &str, error: &str) -> Result<(), AuditLogError> {
        self.record(EventCategory::Error, format!("{context}: {error}"))
    }

    /// Records a privileged action as a SECURITY event.
    pub fn record_admin_action(&self, action: &str, detail: &str) -> Result<(), AuditLogError> {
        self.record_security(format!("administrative action: {action} - {detail}"))
    }

    /// Records an anchor event for the current vault digest and returns
    /// the digest text that was stored.
    pub fn record_anchor(
        &self,
        vault_digest: &str,
        entries: usize,
        width: AnchorDigest,
    ) -> Result<String, AuditLogError> {
        let stored = match width {
            AnchorDigest::Full => vault_digest.to_string(),
            AnchorDigest::Prefix16 => short(vault_digest).to_string(),
        };
        let event = AuditEvent::new(
            EventCategory::System,
            format!("Hash vault: {}... ({entries} entries)", short(vault_digest)),
        )
        .with_marker(EventMarker::VaultAnchor {
            vault_digest: stored.clone(),
            entries,
        });
        self.append(event, Durability::Forced)?;
        Ok(stored)
    }

    /// Marks the active session as a viewer session and records the
    /// viewer-close event.
    pub fn record_viewer_close(&self) -> Result<(), AuditLogError> {
        let mut state = self.lock()?;
        if let Some(active) = state.active.as_mut() {
            active.kind = SessionKind::Viewer;
        }
        let event = AuditEvent::new(EventCategory::System, "viewer session closed")
            .with_marker(EventMarker::ViewerClose);
        self.append_locked(&mut state, event, Durability::Standard)
    }

    /// Writes a standalone incident session with forced durability.
    ///
    /// If the audit log cannot be written, a plain-text line is appended to
    /// the emergency log instead. Fails only when both sinks fail.
    pub fn record_incident(
        &self,
        description: &str,
        reason: &str,
        action: &str,
    ) -> Result<IncidentSink, AuditLogError> {
        let now = Utc::now();
        let message = format!("SECURITY INCIDENT: {description} | reason: {reason} | action: {action}");
        let id = SessionId::incident(now);

        let written = {
            let _state = self.lock()?;
            self.load_or_reinitialize().and_then(|mut sessions| {
                let mut session =
                    AuditSession::new(id.clone(), SYSTEM_USER, SessionKind::Incident);
                session
                    .events
                    .push(AuditEvent::new(EventCategory::Security, message.clone()));
                sessions.push(session);
                self.write_sessions(&sessions, Durability::Forced)
            })
        };

        match written {
            Ok(()) => {
                tracing::warn!(session = %id, %description, "security incident recorded");
                Ok(IncidentSink::AuditLog(id))
            },
            Err(audit_error) => {
                tracing::error!(err = %audit_error, "audit log unwritable, using emergency log");
                let line = format!("{} {message}", now.to_rfc3339());
                persist::append_line_durable(&self.emergency_path, &line)
                    .map(|()| IncidentSink::EmergencyLog)
                    .map_err(|emergency_error| AuditLogError::IncidentUnrecorded {
                        audit_error: audit_error.to_string(),
                        emergency_error: emergency_error.to_string(),
                    })
            },
        }
    }

    // ------------------------------------------------------------------
    // Sealing
    // ------------------------------------------------------------------

    /// Digest of the current log bytes, or `None` if there is no log.
    pub fn current_digest(&self) -> Result<Option<String>, AuditLogError> {
        Ok(persist::read_optional(&self.log_path)?.map(|bytes| self.digester.digest(&bytes)))
    }

    /// Digest stored in the seal file, if present.
    pub fn stored_seal(&self) -> Result<Option<String>, AuditLogError> {
        Ok(persist::read_optional(&self.seal_path)?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string()))
    }

    /// Rewrites the seal file from the current log and returns the digest.
    pub fn seal(&self) -> Result<String, AuditLogError> {
        let _state = self.lock()?;
        let bytes = persist::read_bounded(&self.log_path, MAX_ARTIFACT_FILE_SIZE)?;
        let digest = self.digester.digest(&bytes);
        persist::atomic_write(&self.seal_path, digest.as_bytes(), Durability::Forced)?;
        tracing::debug!(seal = %short(&digest), "audit log sealed");
        Ok(digest)
    }

    /// Compares the log against its seal, regenerating the seal when the
    /// only change is a trailing viewer close.
    pub fn verify_seal(&self) -> Result<SealStatus, AuditLogError> {
        let Some(actual) = self.current_digest()? else {
            return Ok(SealStatus::LogMissing);
        };
        let Some(expected) = self.stored_seal()? else {
            return Ok(SealStatus::SealMissing);
        };
        if digests_match(&expected, &actual) {
            return Ok(SealStatus::Intact);
        }

        let viewer_close = self
            .read_sessions()
            .ok()
            .and_then(|sessions| sessions.last().map(AuditSession::is_viewer_close))
            .unwrap_or(false);
        if viewer_close {
            self.seal()?;
            tracing::info!("audit seal regenerated after viewer close");
            return Ok(SealStatus::ResealedAfterViewerClose);
        }
        Ok(SealStatus::Mismatch { expected, actual })
    }

    /// The most recent anchor digest, scanning newest to oldest.
    pub fn last_anchor(&self) -> Result<Option<String>, AuditLogError> {
        let sessions = self.read_sessions()?;
        Ok(sessions
            .iter()
            .rev()
            .flat_map(|s| s.events.iter().rev())
            .find_map(|e| match &e.marker {
                Some(EventMarker::VaultAnchor { vault_digest, .. }) => Some(vault_digest.clone()),
                _ => None,
            }))
    }
}
