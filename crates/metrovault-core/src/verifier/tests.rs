//! Tests for the startup stages and the resolution loop.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use super::*;
use crate::audit::{EventCategory, SessionId};
use crate::auth::{Principal, Role};
use crate::config::{AnchorDigest, IntegrityConfig};
use crate::session::CounterReading;

// ============================================================================
// Test doubles
// ============================================================================

struct StaticAuthenticator {
    users: HashMap<String, (String, Role)>,
}

impl StaticAuthenticator {
    fn new() -> Self {
        let mut users = HashMap::new();
        users.insert("admin".to_string(), ("root-pw".to_string(), Role::Operator));
        users.insert("tech".to_string(), ("tech-pw".to_string(), Role::Operator));
        users.insert("guest".to_string(), ("guest-pw".to_string(), Role::Viewer));
        Self { users }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<Principal, AuthError> {
        use secrecy::ExposeSecret;
        let Some((password, role)) = self.users.get(&credentials.username) else {
            return Err(AuthError::UnknownUser {
                username: credentials.username.clone(),
            });
        };
        if credentials.password.expose_secret() != password.as_str() {
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

#[derive(Default)]
struct ScriptedPrompt {
    decisions: VecDeque<Resolution>,
    logins: VecDeque<(&'static str, &'static str)>,
    restore_number: Option<u64>,
    seen: Vec<Discrepancy>,
}

impl ScriptedPrompt {
    fn answering(decisions: &[Resolution]) -> Self {
        Self {
            decisions: decisions.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn with_logins(mut self, logins: &[(&'static str, &'static str)]) -> Self {
        self.logins = logins.iter().copied().collect();
        self
    }
}

impl OperatorPrompt for ScriptedPrompt {
    fn decide(&mut self, discrepancy: &Discrepancy) -> Resolution {
        self.seen.push(discrepancy.clone());
        self.decisions.pop_front().unwrap_or(Resolution::Abort)
    }

    fn credentials(&mut self) -> Option<Credentials> {
        self.logins
            .pop_front()
            .map(|(user, password)| Credentials::new(user, password))
    }

    fn session_number_to_restore(&mut self, stored: Option<u64>) -> Option<u64> {
        self.restore_number.or(stored)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn open(dir: &Path) -> Installation {
    Installation::open(&IntegrityConfig::rooted_at(dir)).unwrap()
}

fn startup(inst: &Installation, ctx: &mut SessionContext, prompt: &mut ScriptedPrompt) -> StartupOutcome {
    let auth = StaticAuthenticator::new();
    IntegrityVerifier::new(inst, &auth)
        .run_startup(ctx, prompt)
        .unwrap()
}

/// One full operator session: startup, login, save the given documents,
/// close.
fn operator_session(inst: &Installation, docs: &[(&str, &str, &str)]) {
    let auth = StaticAuthenticator::new();
    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::default();
    assert!(matches!(
        startup(inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    inst.login(&mut ctx, &auth, &Credentials::new("tech", "tech-pw"))
        .unwrap();
    for (category, id, content) in docs {
        inst.save_document(&ctx, category, id, content.as_bytes())
            .unwrap();
    }
    inst.close(&mut ctx).unwrap();
}

fn security_messages(inst: &Installation) -> Vec<String> {
    inst.audit()
        .read_sessions()
        .unwrap()
        .into_iter()
        .flat_map(|s| s.events)
        .filter(|e| e.category == EventCategory::Security)
        .map(|e| e.message)
        .collect()
}

// ============================================================================
// Stages 1-3
// ============================================================================

#[test]
fn test_first_run_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    let mut prompt = ScriptedPrompt::default();

    let StartupOutcome::Ready(report) = startup(&inst, &mut SessionContext::new(), &mut prompt)
    else {
        panic!("first run must not abort");
    };
    assert!(report.is_clean());
    assert_eq!(report.log_init, Some(InitOutcome::Created));
    assert!(inst.vault().exists());
    assert!(prompt.seen.is_empty());
}

#[test]
fn test_tampered_log_abort_records_incident() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[]);

    let log_path = inst.audit().log_path().to_path_buf();
    let raw = fs::read_to_string(&log_path).unwrap();
    fs::write(&log_path, raw.replace("tech", "mallory")).unwrap();

    let mut prompt = ScriptedPrompt::answering(&[Resolution::Abort]);
    let outcome = startup(&inst, &mut SessionContext::new(), &mut prompt);
    let StartupOutcome::Aborted(d) = outcome else {
        panic!("expected abort");
    };
    assert_eq!(d.kind, DiscrepancyKind::LogTampered);

    let sessions = inst.audit().read_sessions().unwrap();
    let last = sessions.last().unwrap();
    assert_eq!(last.kind, SessionKind::Incident);
    assert!(last.events[0].message.contains("audit log tampered"));
}

#[test]
fn test_tampered_log_restore_reseals() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[]);
    let log_path = inst.audit().log_path().to_path_buf();
    let raw = fs::read_to_string(&log_path).unwrap();
    fs::write(&log_path, raw.replace("tech", "mallory")).unwrap();

    let mut prompt =
        ScriptedPrompt::answering(&[Resolution::Restore]).with_logins(&[("admin", "root-pw")]);
    assert!(matches!(
        startup(&inst, &mut SessionContext::new(), &mut prompt),
        StartupOutcome::Ready(_)
    ));
    assert_eq!(
        inst.audit().verify_seal().unwrap(),
        crate::audit::SealStatus::Intact
    );
    assert!(
        security_messages(&inst)
            .iter()
            .any(|m| m.contains("audit log seal regenerated by admin"))
    );
}

#[test]
fn test_counter_restore_with_privileged_principal() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[]);
    fs::write(inst.counter().path(), b"{\"number\": 40, \"hash\": \"forged\", \"timestamp\": \"2024-01-01T00:00:00Z\"}").unwrap();

    let mut prompt =
        ScriptedPrompt::answering(&[Resolution::Restore]).with_logins(&[("admin", "root-pw")]);
    prompt.restore_number = Some(1);
    assert!(matches!(
        startup(&inst, &mut SessionContext::new(), &mut prompt),
        StartupOutcome::Ready(_)
    ));
    assert_eq!(prompt.seen[0].kind, DiscrepancyKind::SessionCounterTampered);
    assert_eq!(inst.counter().read().unwrap(), CounterReading::Valid(1));
}

#[test]
fn test_restore_aborts_after_repeated_denials() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[]);
    fs::write(inst.counter().path(), b"not json").unwrap();

    let mut prompt = ScriptedPrompt::answering(&[Resolution::Restore; 5]).with_logins(&[
        ("admin", "wrong"),
        ("tech", "tech-pw"),
        ("nobody", "x"),
    ]);
    let outcome = startup(&inst, &mut SessionContext::new(), &mut prompt);
    assert!(matches!(outcome, StartupOutcome::Aborted(ref d) if d.kind == DiscrepancyKind::SessionCounterTampered));
    assert_eq!(prompt.seen.len(), MAX_RESTORE_ATTEMPTS as usize);

    let auth_events: Vec<_> = inst
        .audit()
        .read_sessions()
        .unwrap()
        .into_iter()
        .flat_map(|s| s.events)
        .filter(|e| e.category == EventCategory::Auth && e.message.contains("recovery authorization"))
        .collect();
    assert_eq!(auth_events.len(), 3);
    assert!(auth_events[1].message.contains("not the privileged principal"));
    // The counter was not touched.
    assert_eq!(
        inst.counter().read().unwrap(),
        CounterReading::Tampered { number: None }
    );
}

// ============================================================================
// Stages 4-6
// ============================================================================

#[test]
fn test_vault_missing_with_documents_demotes_on_continue() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("instruments", "MI-1", "{}")]);
    fs::remove_file(inst.vault().path()).unwrap();

    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::answering(&[Resolution::ContinueDegraded]);
    let StartupOutcome::Ready(report) = startup(&inst, &mut ctx, &mut prompt) else {
        panic!("continue must not abort");
    };
    // Remaining vault stages were skipped after the degraded decision.
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(report.resolved[0].discrepancy.kind, DiscrepancyKind::VaultMissing);
    assert!(ctx.is_read_only());
    assert!(
        security_messages(&inst)
            .iter()
            .any(|m| m.contains("operator continued despite hash vault missing"))
    );
}

#[test]
fn test_malformed_vault_entry_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("instruments", "MI-1", "{}")]);

    let raw = fs::read_to_string(inst.vault().path()).unwrap();
    let digest = inst.vault().load().unwrap()["MI-1"].clone();
    fs::write(inst.vault().path(), raw.replace(&digest, "deadbeef")).unwrap();

    let found = stages::check_vault_entry_shape(inst.vault()).unwrap().unwrap();
    assert_eq!(found.kind, DiscrepancyKind::VaultCorrupt);
    assert!(found.message.contains("MI-1"));
}

#[test]
fn test_vault_of_only_malformed_entries_is_corrupt_not_missing() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("instruments", "MI-0001", "{}")]);
    fs::write(inst.vault().path(), br#"{"MI-0001": "not-a-digest"}"#).unwrap();

    assert_eq!(
        stages::check_vault_existence(inst.vault(), inst.store()).unwrap(),
        None
    );
    let mut prompt = ScriptedPrompt::answering(&[Resolution::ContinueDegraded]);
    let mut ctx = SessionContext::new();
    assert!(matches!(
        startup(&inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    let kinds: Vec<_> = prompt.seen.iter().map(|d| d.kind.clone()).collect();
    assert_eq!(kinds, vec![DiscrepancyKind::VaultCorrupt]);
    assert!(ctx.is_read_only());
}

#[test]
fn test_vault_byte_flip_is_tampered_and_reverting_passes() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("standards", "PT-1", "{\"v\":1}")]);
    assert!(stages::check_vault_anchor(inst.vault(), inst.audit()).unwrap().is_none());

    let path = inst.vault().path().to_path_buf();
    let original = fs::read(&path).unwrap();
    let mut flipped = original.clone();
    let last = flipped.len() - 1;
    flipped[last] ^= 0x20;
    fs::write(&path, &flipped).unwrap();

    let found = stages::check_vault_anchor(inst.vault(), inst.audit()).unwrap().unwrap();
    assert_eq!(found.kind, DiscrepancyKind::VaultTampered);

    fs::write(&path, &original).unwrap();
    assert!(stages::check_vault_anchor(inst.vault(), inst.audit()).unwrap().is_none());
}

#[test]
fn test_legacy_prefix_anchor_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = IntegrityConfig::rooted_at(dir.path());
    config.anchor_digest = AnchorDigest::Prefix16;
    let inst = Installation::open(&config).unwrap();
    operator_session(&inst, &[("standards", "PT-1", "{}")]);

    let anchor = inst.audit().last_anchor().unwrap().unwrap();
    assert_eq!(anchor.len(), 16);
    assert!(stages::check_vault_anchor(inst.vault(), inst.audit()).unwrap().is_none());
}

#[test]
fn test_vault_deleted_after_anchor_is_tampered() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[]);
    fs::remove_file(inst.vault().path()).unwrap();

    let found = stages::check_vault_anchor(inst.vault(), inst.audit()).unwrap().unwrap();
    assert_eq!(found.kind, DiscrepancyKind::VaultTampered);
}

// ============================================================================
// Stage 7
// ============================================================================

#[test]
fn test_document_check_caps_reported_ids() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    let ids: Vec<String> = (0..8).map(|i| format!("MI-{i}")).collect();
    let docs: Vec<(&str, &str, &str)> = ids
        .iter()
        .map(|id| ("instruments", id.as_str(), "{}"))
        .collect();
    operator_session(&inst, &docs);

    for id in &ids {
        inst.store().write("instruments", id, b"{\"edited\":true}").unwrap();
    }
    let found = stages::check_documents(inst.vault(), inst.store(), 5)
        .unwrap()
        .unwrap();
    let DiscrepancyKind::ElementsCompromised { ids: reported } = &found.kind else {
        panic!("expected compromised documents");
    };
    assert_eq!(reported.len(), 5);
    assert!(found.message.contains("and 3 more"));
}

#[test]
fn test_document_restore_resigns_entries() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    let auth = StaticAuthenticator::new();
    operator_session(&inst, &[("instruments", "MI-1", "{}")]);
    inst.store().write("instruments", "MI-1", b"{\"fixed\":1}").unwrap();

    let mut ctx = SessionContext::new();
    let mut prompt =
        ScriptedPrompt::answering(&[Resolution::Restore]).with_logins(&[("admin", "root-pw")]);
    assert!(matches!(
        startup(&inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    inst.login(&mut ctx, &auth, &Credentials::new("tech", "tech-pw"))
        .unwrap();
    let outcome = IntegrityVerifier::new(&inst, &auth)
        .check_documents(&mut ctx, &mut prompt)
        .unwrap();
    assert!(matches!(outcome, StartupOutcome::Ready(ref r) if r.resolved.len() == 1));
    assert!(!ctx.is_read_only());
    assert!(
        stages::check_documents(inst.vault(), inst.store(), 5)
            .unwrap()
            .is_none()
    );
    assert_eq!(
        inst.audit().active_session().unwrap(),
        Some(SessionId::Number(2))
    );
}
