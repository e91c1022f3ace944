//! The authentication provider seam.
//!
//! Credential storage lives outside this crate. The integrity layer only
//! asks an [`Authenticator`] to turn [`Credentials`] into a [`Principal`].

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Access level granted to a signed-in principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access: may save documents and reseal artifacts at shutdown.
    Operator,
    /// Read-only access.
    Viewer,
}

impl Role {
    /// Returns `true` for [`Role::Viewer`].
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Viewer)
    }

    /// Lowercase name used in audit messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Login identifier.
    pub id: String,
    /// Granted role.
    pub role: Role,
}

/// A username/password pair. The password is never printed.
#[derive(Debug)]
pub struct Credentials {
    /// Login identifier.
    pub username: String,
    /// Password, zeroized on drop.
    pub password: SecretString,
}

impl Credentials {
    /// Builds credentials from plain strings.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Authentication failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No such user.
    #[error("unknown user: {username}")]
    UnknownUser {
        /// The rejected username.
        username: String,
    },

    /// The password did not match.
    #[error("invalid password for {username}")]
    InvalidPassword {
        /// The rejected username.
        username: String,
    },

    /// The provider could not be reached.
    #[error("authentication provider unavailable: {0}")]
    Unavailable(String),
}

/// Verifies credentials.
pub trait Authenticator: Send + Sync {
    /// Returns the principal for valid credentials.
    fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError>;
}
