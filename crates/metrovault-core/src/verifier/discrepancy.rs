//! Detected integrity problems.

use std::fmt;

/// What kind of integrity failure was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscrepancyKind {
    /// The audit log no longer matches its seal.
    LogTampered,
    /// The session counter hash does not recompute from its number.
    SessionCounterTampered,
    /// The vault is empty or absent while documents exist.
    VaultMissing,
    /// The vault file is unparseable or holds malformed digests.
    VaultCorrupt,
    /// The vault file changed since its last anchor.
    VaultTampered,
    /// Documents whose content no longer matches the vault.
    ElementsCompromised {
        /// Failing ids, capped by configuration.
        ids: Vec<String>,
    },
}

impl DiscrepancyKind {
    /// Short title for prompts and audit messages.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::LogTampered => "audit log tampered",
            Self::SessionCounterTampered => "session counter tampered",
            Self::VaultMissing => "hash vault missing",
            Self::VaultCorrupt => "hash vault corrupt",
            Self::VaultTampered => "hash vault tampered",
            Self::ElementsCompromised { .. } => "documents compromised",
        }
    }

    /// Whether continuing past this discrepancy downgrades the session to
    /// read-only.
    #[must_use]
    pub const fn demotes_session(&self) -> bool {
        matches!(
            self,
            Self::VaultMissing
                | Self::VaultCorrupt
                | Self::VaultTampered
                | Self::ElementsCompromised { .. }
        )
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A failed check with a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    /// Failure kind.
    pub kind: DiscrepancyKind,
    /// Explanation for the operator.
    pub message: String,
}

impl Discrepancy {
    /// Creates a discrepancy.
    #[must_use]
    pub fn new(kind: DiscrepancyKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
