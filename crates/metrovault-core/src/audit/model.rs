//! Audit log records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    /// Lifecycle of the integrity layer itself.
    System,
    /// Login and authorization attempts.
    Auth,
    /// Document changes.
    Data,
    /// Detected compromise, operator decisions, privileged actions.
    Security,
    /// Failures.
    Error,
    /// Navigation within the surrounding application.
    Nav,
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "SYSTEM",
            Self::Auth => "AUTH",
            Self::Data => "DATA",
            Self::Security => "SECURITY",
            Self::Error => "ERROR",
            Self::Nav => "NAV",
        })
    }
}

/// Structured payload for the few events the integrity layer reads back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMarker {
    /// Chains the log to the vault: the vault digest at session close.
    VaultAnchor {
        /// Full digest, or the legacy 16-character prefix.
        vault_digest: String,
        /// Number of vault entries.
        entries: usize,
    },
    /// A read-only session closed without resealing the vault.
    ViewerClose,
}

/// A single timestamped event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event happened.
    pub time: DateTime<Utc>,
    /// Event category.
    pub category: EventCategory,
    /// Human-readable message.
    pub message: String,
    /// Typed payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<EventMarker>,
}

impl AuditEvent {
    /// A plain event stamped now.
    #[must_use]
    pub fn new(category: EventCategory, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            category,
            message: message.into(),
            marker: None,
        }
    }

    /// Attaches a marker.
    #[must_use]
    pub fn with_marker(mut self, marker: EventMarker) -> Self {
        self.marker = Some(marker);
        self
    }
}

/// Identifies a session: a login number or a generated tag for
/// administrative and incident sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionId {
    /// Numbered login session.
    Number(u64),
    /// `ADMIN_…`, `INCIDENT_…` or `UNCOUNTED_…`.
    Tag(String),
}

impl SessionId {
    /// Tag for a synthesized administrative session.
    #[must_use]
    pub fn admin(now: DateTime<Utc>) -> Self {
        Self::Tag(format!("ADMIN_{}", now.format("%Y%m%d_%H%M%S")))
    }

    /// Tag for a standalone incident session.
    #[must_use]
    pub fn incident(now: DateTime<Utc>) -> Self {
        Self::Tag(format!("INCIDENT_{}", now.format("%Y%m%dT%H%M%S")))
    }

    /// Tag for a login whose counter could not be advanced.
    #[must_use]
    pub fn uncounted(now: DateTime<Utc>) -> Self {
        Self::Tag(format!("UNCOUNTED_{}", now.format("%Y%m%d_%H%M%S")))
    }
}

impl From<u64> for SessionId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Tag(tag) => f.write_str(tag),
        }
    }
}

/// How a session was opened, fixed at creation time except for a
/// demotion to [`SessionKind::Viewer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Full-access login.
    #[default]
    Normal,
    /// Read-only login or demoted session.
    Viewer,
    /// Synthesized for an action outside any login.
    Administrative,
    /// Standalone security incident.
    Incident,
}

/// One session record in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSession {
    /// Login number or generated tag.
    pub session_number: SessionId,
    /// Session kind.
    #[serde(default)]
    pub kind: SessionKind,
    /// Creation time.
    pub start_time: DateTime<Utc>,
    /// Set once at close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// User the session belongs to.
    pub user: String,
    /// Events in append order.
    #[serde(default)]
    pub events: Vec<AuditEvent>,
}

impl AuditSession {
    /// An empty open session.
    #[must_use]
    pub fn new(session_number: SessionId, user: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            session_number,
            kind,
            start_time: Utc::now(),
            end_time: None,
            user: user.into(),
            events: Vec::new(),
        }
    }

    /// Returns `true` if this session was closed by a viewer.
    #[must_use]
    pub fn is_viewer_close(&self) -> bool {
        self.kind == SessionKind::Viewer
            && self
                .events
                .last()
                .is_some_and(|e| e.marker == Some(EventMarker::ViewerClose))
    }
}
