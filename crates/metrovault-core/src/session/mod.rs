//! Session numbering and per-process session state.
//!
//! [`SessionSeal`] owns the persisted counter. [`SessionContext`] is the
//! explicit per-process object that carries the "already incremented"
//! guard, the signed-in principal and any read-only demotion. It is created
//! once at startup and passed by `&mut` to every operation that needs it.

mod seal;


pub use seal::{CounterReading, IncrementOutcome, SessionRecord, SessionSeal};
use thiserror::Error;

use crate::auth::{Principal, Role};
use crate::persist::PersistError;

/// Session counter errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionSealError {
    /// Reading or writing the counter file failed.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Serializing the counter record failed.
    #[error("counter serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The stored hash does not recompute from the stored number.
    #[error("session counter is tampered (stored number: {number:?})")]
    Tampered {
        /// Stored number, if readable.
        number: Option<u64>,
    },

    /// The counter cannot advance past `u64::MAX`.
    #[error("session counter overflow")]
    Overflow,
}

/// Per-process session state.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    incremented: bool,
    session_number: Option<u64>,
    principal: Option<Principal>,
    read_only_reason: Option<String>,
}

impl SessionContext {
    /// A fresh context with the increment guard cleared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the increment guard so the next increment advances the
    /// counter again.
    pub fn reset_guard(&mut self) {
        self.incremented = false;
    }

    /// Returns `true` once the counter was advanced under this guard.
    #[must_use]
    pub const fn is_incremented(&self) -> bool {
        self.incremented
    }

    pub(crate) const fn guarded_number(&self) -> Option<u64> {
        if self.incremented {
            self.session_number
        } else {
            None
        }
    }

    pub(crate) fn mark_incremented(&mut self, number: u64) {
        self.incremented = true;
        self.session_number = Some(number);
    }

    /// Session number obtained at login, if any.
    #[must_use]
    pub const fn session_number(&self) -> Option<u64> {
        self.session_number
    }

    /// Records the signed-in principal.
    pub fn sign_in(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// The signed-in principal.
    #[must_use]
    pub const fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Downgrades the rest of this session to read-only. The first reason
    /// is kept.
    pub fn demote(&mut self, reason: impl Into<String>) {
        if self.read_only_reason.is_none() {
            let reason = reason.into();
            tracing::warn!(%reason, "session demoted to read-only");
            self.read_only_reason = Some(reason);
        }
    }

    /// Why the session was demoted, if it was.
    #[must_use]
    pub fn read_only_reason(&self) -> Option<&str> {
        self.read_only_reason.as_deref()
    }

    /// Returns `true` if the session was demoted or signed in as a viewer.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only_reason.is_some()
            || self.principal.as_ref().is_some_and(|p| p.role.is_read_only())
    }

    /// Role in force for the rest of the session, after any demotion.
    #[must_use]
    pub fn effective_role(&self) -> Option<Role> {
        self.principal.as_ref().map(|p| {
            if self.read_only_reason.is_some() {
                Role::Viewer
            } else {
                p.role
            }
        })
    }
}
