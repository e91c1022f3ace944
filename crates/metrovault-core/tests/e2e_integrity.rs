//! End-to-end scenarios for the integrity layer.
//!
//! Each test drives a real data directory through startup, login, work and
//! shutdown, then tampers with artifacts from outside the API the way an
//! operator with file access would:
//!
//! ```text
//! document ──► vault ──► anchor event ──► seal file
//! ```
//!
//! # Properties Verified
//!
//! - A fresh installation bootstraps every artifact
//! - An unchanged installation verifies silently
//! - Edited documents are reported and continuing demotes the session
//! - Restoring a tampered vault rebuilds it and records one SECURITY event
//! - Viewer sessions do not raise false log-tamper alerts

mod common;

use std::fs;

use common::{
    ADMIN, GUEST, ScriptedPrompt, TECH, check_documents, login_as, open, operator_session,
    startup,
};
use metrovault_core::audit::{EventCategory, SealStatus, SessionId, SessionKind};
use metrovault_core::installation::ScanEntry;
use metrovault_core::session::CounterReading;
use metrovault_core::{
    DiscrepancyKind, IntegrityError, Resolution, Role, SessionContext, StartupOutcome,
    Verification,
};

// ============================================================================
// Bootstrap
// ============================================================================

#[test]
fn test_fresh_install_bootstraps_all_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    assert!(!inst.audit().log_path().exists());

    operator_session(&inst, &[]);

    // Empty vault file.
    assert!(inst.vault().exists());
    assert!(inst.vault().load().unwrap().is_empty());

    // Counter at 1 after one login.
    assert_eq!(inst.counter().read().unwrap(), CounterReading::Valid(1));

    // One session holding the initialization event.
    let sessions = inst.audit().read_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_number, SessionId::Number(1));
    assert!(sessions[0].events.iter().any(|e| {
        e.category == EventCategory::System && e.message == "audit log initialized"
    }));

    // Seal matches the log.
    assert_eq!(
        inst.audit().stored_seal().unwrap(),
        inst.audit().current_digest().unwrap()
    );
}

#[test]
fn test_second_run_without_changes_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("instruments", "MI-0001", "{\"range\": 10}")]);

    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::default();
    let StartupOutcome::Ready(report) = startup(&inst, &mut ctx, &mut prompt) else {
        panic!("second run aborted");
    };
    assert!(report.is_clean());
    login_as(&inst, &mut ctx, TECH);
    assert!(matches!(
        check_documents(&inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(ref r) if r.is_clean()
    ));
    assert!(prompt.seen.is_empty());
    assert_eq!(ctx.session_number(), Some(2));
}

#[test]
fn test_reopening_installation_keeps_counting() {
    let dir = tempfile::tempdir().unwrap();
    operator_session(&open(dir.path()), &[]);
    operator_session(&open(dir.path()), &[]);
    operator_session(&open(dir.path()), &[]);
    assert_eq!(
        open(dir.path()).counter().read().unwrap(),
        CounterReading::Valid(3)
    );
}

// ============================================================================
// Document tampering
// ============================================================================

#[test]
fn test_edited_document_is_reported_and_continue_demotes() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(
        &inst,
        &[
            ("instruments", "MI-0001", "{\"range\": 10}"),
            ("instruments", "MI-0002", "{\"range\": 20}"),
            ("standards", "PT-0001", "{\"class\": 1}"),
        ],
    );

    // Edit outside the application.
    let path = inst.store().path("MI-0002").unwrap();
    fs::write(&path, b"{\"range\": 25}").unwrap();

    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::answering(&[Resolution::ContinueDegraded]);
    assert!(matches!(
        startup(&inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    login_as(&inst, &mut ctx, TECH);
    assert!(!ctx.is_read_only());

    assert!(matches!(
        check_documents(&inst, &mut ctx, &mut prompt),
        StartupOutcome::Ready(_)
    ));
    assert_eq!(prompt.seen.len(), 1);
    assert_eq!(
        prompt.seen[0].kind,
        DiscrepancyKind::ElementsCompromised {
            ids: vec!["MI-0002".to_string()]
        }
    );

    // Read-only for the rest of the session.
    assert!(ctx.is_read_only());
    assert_eq!(ctx.effective_role(), Some(Role::Viewer));
    let vault_before = fs::read(inst.vault().path()).unwrap();
    let err = inst
        .save_document(&ctx, "instruments", "MI-0001", b"{\"range\": 11}")
        .unwrap_err();
    assert!(matches!(err, IntegrityError::ReadOnlySession { .. }));
    assert_eq!(fs::read(inst.vault().path()).unwrap(), vault_before);

    // A demoted close does not reseal the vault over the tampered document.
    let report = inst.close(&mut ctx).unwrap();
    assert!(report.read_only);
    assert_eq!(fs::read(inst.vault().path()).unwrap(), vault_before);
    assert_eq!(inst.audit().verify_seal().unwrap(), SealStatus::Intact);
}

#[test]
fn test_scan_reports_unregistered_document() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("standards", "PT-0001", "{}")]);

    // Dropped into the tree without going through the application.
    inst.store()
        .write("standards", "PT-0099", b"{\"smuggled\": true}")
        .unwrap();

    let report = inst.scan_all().unwrap();
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.verified(), 1);
    let failures: Vec<&ScanEntry> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, "PT-0099");
    assert_eq!(failures[0].verification, Verification::NotInVault);
}

// ============================================================================
// Vault tampering
// ============================================================================

#[test]
fn test_restore_tampered_vault_rebuilds_and_records_one_security_event() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(
        &inst,
        &[
            ("instruments", "MI-0001", "{\"range\": 10}"),
            ("standards", "PT-0001", "{\"class\": 1}"),
        ],
    );

    // Keep the file well-formed: swap one hex digit of an entry.
    let raw = fs::read_to_string(inst.vault().path()).unwrap();
    let digest = inst.vault().load().unwrap()["MI-0001"].clone();
    let mut forged = digest.clone();
    let replacement = if forged.ends_with('0') { "1" } else { "0" };
    forged.replace_range(63.., replacement);
    fs::write(inst.vault().path(), raw.replace(&digest, &forged)).unwrap();

    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::answering(&[Resolution::Restore]).with_login(ADMIN);
    let StartupOutcome::Ready(report) = startup(&inst, &mut ctx, &mut prompt) else {
        panic!("restore must not abort");
    };
    assert_eq!(report.resolved.len(), 1);
    assert_eq!(
        report.resolved[0].discrepancy.kind,
        DiscrepancyKind::VaultTampered
    );

    // Fresh digests for every document.
    let vault = inst.vault().load().unwrap();
    assert_eq!(vault.len(), 2);
    assert_eq!(vault["MI-0001"], digest);

    // Exactly one SECURITY event names the authorizing principal.
    let naming_admin = inst
        .audit()
        .read_sessions()
        .unwrap()
        .into_iter()
        .flat_map(|s| s.events)
        .filter(|e| e.category == EventCategory::Security && e.message.contains("by admin"))
        .count();
    assert_eq!(naming_admin, 1);

    // The rebuilt vault is anchored, so the next run passes.
    assert_eq!(
        inst.audit().last_anchor().unwrap(),
        inst.vault().file_digest().unwrap()
    );
    assert!(!ctx.is_read_only());
}

#[test]
fn test_abort_on_tampered_vault_leaves_vault_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("instruments", "MI-0001", "{}")]);

    let mut bytes = fs::read(inst.vault().path()).unwrap();
    let last = bytes.len() - 1;
    bytes.push(b'\n');
    bytes.swap(last, last + 1);
    fs::write(inst.vault().path(), &bytes).unwrap();

    let mut prompt = ScriptedPrompt::answering(&[Resolution::Abort]);
    let outcome = startup(&inst, &mut SessionContext::new(), &mut prompt);
    assert!(matches!(
        outcome,
        StartupOutcome::Aborted(ref d) if d.kind == DiscrepancyKind::VaultTampered
    ));
    assert_eq!(fs::read(inst.vault().path()).unwrap(), bytes);

    let sessions = inst.audit().read_sessions().unwrap();
    assert_eq!(sessions.last().unwrap().kind, SessionKind::Incident);
}

// ============================================================================
// Viewer sessions
// ============================================================================

#[test]
fn test_viewer_session_does_not_raise_log_tampered() {
    let dir = tempfile::tempdir().unwrap();
    let inst = open(dir.path());
    operator_session(&inst, &[("instruments", "MI-0001", "{}")]);
    let vault_before = fs::read(inst.vault().path()).unwrap();

    let mut ctx = SessionContext::new();
    let mut prompt = ScriptedPrompt::default();
    startup(&inst, &mut ctx, &mut prompt);
    login_as(&inst, &mut ctx, GUEST);
    assert!(ctx.is_read_only());
    let report = inst.close(&mut ctx).unwrap();
    assert!(report.read_only);
    assert_eq!(fs::read(inst.vault().path()).unwrap(), vault_before);

    let sessions = inst.audit().read_sessions().unwrap();
    let last = sessions.last().unwrap();
    assert_eq!(last.kind, SessionKind::Viewer);
    assert!(last.is_viewer_close());

    // Next startup verifies silently.
    let mut prompt = ScriptedPrompt::default();
    assert!(matches!(
        startup(&inst, &mut SessionContext::new(), &mut prompt),
        StartupOutcome::Ready(ref r) if r.is_clean()
    ));
    assert!(prompt.seen.is_empty());
}
