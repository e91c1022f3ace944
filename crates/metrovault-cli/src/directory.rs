//! Authentication provider backed by the `[[users]]` table of the
//! configuration file.
//!
//! Passwords are never stored; each account carries the hex SHA-256 of its
//! password and logins compare digests in constant time.

use std::collections::HashMap;

use metrovault_core::config::UserConfig;
use metrovault_core::{AuthError, Authenticator, Credentials, Principal, Role};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex SHA-256 of `password`, the form stored in `password_sha256`.
#[must_use]
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

struct Account {
    role: Role,
    password_sha256: String,
}

/// Accounts loaded from configuration.
pub struct ConfigDirectory {
    accounts: HashMap<String, Account>,
}

impl ConfigDirectory {
    /// Builds the directory. Later duplicates of an id replace earlier ones.
    #[must_use]
    pub fn new(users: &[UserConfig]) -> Self {
        if users.is_empty() {
            tracing::warn!("no [[users]] configured, every login will be refused");
        }
        let accounts = users
            .iter()
            .map(|user| {
                (
                    user.id.clone(),
                    Account {
                        role: user.role,
                        password_sha256: user.password_sha256.to_ascii_lowercase(),
                    },
                )
            })
            .collect();
        Self { accounts }
    }
}

impl Authenticator for ConfigDirectory {
    fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        let Some(account) = self.accounts.get(&credentials.username) else {
            return Err(AuthError::UnknownUser {
                username: credentials.username.clone(),
            });
        };
        let offered = password_digest(credentials.password.expose_secret());
        if !bool::from(offered.as_bytes().ct_eq(account.password_sha256.as_bytes())) {
            return Err(AuthError::InvalidPassword {
                username: credentials.username.clone(),
            });
        }
        Ok(Principal {
            id: credentials.username.clone(),
            role: account.role,
        })
    }
}
