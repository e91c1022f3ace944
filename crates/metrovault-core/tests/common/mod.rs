//! Shared fixtures for the integration tests: an in-memory authentication
//! provider and a scripted operator prompt.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use metrovault_core::{
    AuthError, Authenticator, Credentials, Discrepancy, Installation, IntegrityConfig,
    OperatorPrompt, Principal, Resolution, Role, SessionContext, StartupOutcome,
    IntegrityVerifier,
};
use secrecy::ExposeSecret;

pub const ADMIN: (&str, &str) = ("admin", "admin-password");
pub const TECH: (&str, &str) = ("tech", "tech-password");
pub const GUEST: (&str, &str) = ("guest", "guest-password");

/// Fixed user table standing in for the credential store.
pub struct TestDirectory {
    users: HashMap<&'static str, (&'static str, Role)>,
}

impl TestDirectory {
    pub fn new() -> Self {
        let mut users = HashMap::new();
        users.insert(ADMIN.0, (ADMIN.1, Role::Operator));
        users.insert(TECH.0, (TECH.1, Role::Operator));
        users.insert(GUEST.0, (GUEST.1, Role::Viewer));
        Self { users }
    }
}

impl Authenticator for TestDirectory {
    fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        let Some((password, role)) = self.users.get(credentials.username.as_str()) else {
            return Err(AuthError::UnknownUser {
                username: credentials.username.clone(),
            });
        };
        if credentials.password.expose_secret() != *password {
            return Err(AuthError::InvalidPassword {
                username: credentials.username.clone(),
            });
        }
        Ok(Principal {
            id: credentials.username.clone(),
            role: *role,
        })
    }
}

/// Operator prompt that replays scripted answers and records what it saw.
#[derive(Default)]
pub struct ScriptedPrompt {
    pub decisions: VecDeque<Resolution>,
    pub logins: VecDeque<(&'static str, &'static str)>,
    pub seen: Vec<Discrepancy>,
}

impl ScriptedPrompt {
    pub fn answering(decisions: &[Resolution]) -> Self {
        Self {
            decisions: decisions.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn with_login(mut self, login: (&'static str, &'static str)) -> Self {
        self.logins.push_back(login);
        self
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn decide(&mut self, discrepancy: &Discrepancy) -> Resolution {
        self.seen.push(discrepancy.clone());
        self.decisions.pop_front().unwrap_or(Resolution::Abort)
    }

    fn credentials(&mut self) -> Option<Credentials> {
        self.logins.pop_front().map(|(u, p)| Credentials::new(u, p))
    }

    fn session_number_to_restore(&mut self, stored: Option<u64>) -> Option<u64> {
        stored
    }
}

pub fn open(dir: &Path) -> Installation {
    Installation::open(&IntegrityConfig::rooted_at(dir)).unwrap()
}

pub fn login_as(
    inst: &Installation,
    ctx: &mut SessionContext,
    who: (&'static str, &'static str),
) -> Principal {
    inst.login(ctx, &TestDirectory::new(), &Credentials::new(who.0, who.1))
        .unwrap()
}

pub fn startup(
    inst: &Installation,
    ctx: &mut SessionContext,
    prompt: &mut ScriptedPrompt,
) -> StartupOutcome {
    let directory = TestDirectory::new();
    IntegrityVerifier::new(inst, &directory)
        .run_startup(ctx, prompt)
        .unwrap()
}

pub fn check_documents(
    inst: &Installation,
    ctx: &mut SessionContext,
    prompt: &mut ScriptedPrompt,
) -> StartupOutcome {
    let directory = TestDirectory::new();
    IntegrityVerifier::new(inst, &directory)
        .check_documents(ctx, prompt)
        .unwrap()
}

/// A full clean operator session that saves `docs` and closes.
pub fn operator_session(inst: &Installation, docs: &[(&str, &str, &str)]) {
    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::default();
    assert!(matches!(
        startup(inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    login_as(inst, &mut ctx, TECH);
    assert!(matches!(
        check_documents(inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    for (category, id, content) in docs {
        inst.save_document(&ctx, category, id, content.as_bytes())
            .unwrap();
    }
    inst.close(&mut ctx).unwrap();
    assert!(prompt.seen.is_empty(), "unexpected discrepancies: {:?}", prompt.seen);
}
