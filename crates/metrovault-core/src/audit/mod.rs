//! Append-only audit trail with an external seal.
//!
//! The log is the forensic record of everything the integrity layer did:
//! logins, detected discrepancies, operator decisions and privileged
//! repairs. Two structured event shapes are read back by the verifier:
//!
//! - the **anchor** ([`EventMarker::VaultAnchor`]), recorded at session
//!   close, chains the log to the vault digest of that moment
//! - the **viewer close** ([`EventMarker::ViewerClose`]), which explains an
//!   expected seal mismatch after a read-only session
//!
//! `tracing` output is diagnostic only and never substitutes for this log.

mod log;
mod model;


use std::path::PathBuf;

pub use log::{AuditLog, IncidentSink, InitOutcome, SYSTEM_USER, SealStatus};
pub use model::{AuditEvent, AuditSession, EventCategory, EventMarker, SessionId, SessionKind};
use thiserror::Error;

use crate::persist::PersistError;

/// Audit log errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuditLogError {
    /// Reading or writing a log file failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Serializing the log failed.
    #[error("audit log serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The log file is not a valid session array.
    #[error("audit log {path} is corrupt: {reason}")]
    Corrupt {
        /// Log path.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// Neither the audit log nor the emergency log accepted an incident.
    #[error("incident not recorded (audit log: {audit_error}; emergency log: {emergency_error})")]
    IncidentUnrecorded {
        /// Audit log failure.
        audit_error: String,
        /// Emergency log failure.
        emergency_error: String,
    },

    /// Internal lock poisoned.
    #[error("audit log lock poisoned")]
    LockPoisoned,
}
