//! metrovault-core - tamper-evident integrity layer for calibration records.
//!
//! This crate detects unauthorized modification of persisted calibration
//! documents between application runs. It never interprets document content;
//! it only hashes it and chains those hashes into a one-directional trust
//! chain:
//!
//! ```text
//! document ──► hash vault ──► audit-log anchor event ──► audit-log seal file
//! ```
//!
//! Breaking any link is independently detectable at the next startup.
//!
//! # Components
//!
//! - [`crypto`]: salted SHA-256 digests shared by every artifact
//! - [`vault`]: the persisted `element id -> digest` map
//! - [`session`]: the rollback-resistant session counter and the
//!   per-process [`session::SessionContext`]
//! - [`audit`]: the append-only audit log and its external seal
//! - [`recovery`]: the privileged gate in front of every trust-restoring
//!   operation
//! - [`verifier`]: the ordered startup checks and the three-way
//!   abort / continue-degraded / restore decision
//! - [`installation`]: login, document save and shutdown sequencing
//!
//! # Concurrency
//!
//! The crate assumes a single writer per data directory. Every artifact is
//! fully rewritten on save (temp file + rename), so an external reader sees
//! either the old or the new version, but two concurrent writers are not
//! detected.

pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod documents;
pub mod installation;
pub mod persist;
pub mod recovery;
pub mod session;
pub mod vault;
pub mod verifier;

pub use audit::{AuditEvent, AuditLog, AuditSession, EventCategory, SessionId, SessionKind};
pub use auth::{AuthError, Authenticator, Credentials, Principal, Role};
pub use config::{ArtifactPaths, IntegrityConfig, MetrovaultConfig};
pub use crypto::Digester;
pub use documents::{DocumentStore, FsDocumentStore};
pub use installation::{Installation, ScanReport, ShutdownReport};
pub use recovery::{Artifact, AuthorizedPrincipal, RecoveryAuthority};
pub use session::{SessionContext, SessionSeal};
pub use vault::{HashVault, Verification};
pub use verifier::{
    Discrepancy, DiscrepancyKind, IntegrityError, IntegrityVerifier, OperatorPrompt, Resolution,
    StartupOutcome,
};
