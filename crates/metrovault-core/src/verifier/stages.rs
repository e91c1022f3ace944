//! The individual startup checks, in execution order.
//!
//! Each check either passes (`Ok(None)`) or reports a [`Discrepancy`].
//! `Err` is reserved for I/O failures that prevent the check from running.

use super::{Discrepancy, DiscrepancyKind, IntegrityError};
use crate::audit::{AuditLog, InitOutcome, SealStatus};
use crate::crypto::{anchor_matches, short};
use crate::documents::{DocumentStore, StoreError};
use crate::session::{CounterReading, SessionSeal};
use crate::vault::{HashVault, VaultInspection, VaultMap};

/// Stage 1: create the log and seal on first run, or a missing seal.
pub fn init_or_load_seal(audit: &AuditLog) -> Result<InitOutcome, IntegrityError> {
    Ok(audit.initialize()?)
}

/// Stage 2: the log must match its seal, except after a viewer close.
pub fn check_log_seal(audit: &AuditLog) -> Result<Option<Discrepancy>, IntegrityError> {
    Ok(match audit.verify_seal()? {
        SealStatus::Intact | SealStatus::ResealedAfterViewerClose => None,
        SealStatus::Mismatch { expected, actual } => Some(Discrepancy::new(
            DiscrepancyKind::LogTampered,
            format!(
                "the audit log changed since it was sealed (seal {}..., log {}...)",
                short(&expected),
                short(&actual)
            ),
        )),
        SealStatus::SealMissing => Some(Discrepancy::new(
            DiscrepancyKind::LogTampered,
            "the audit log seal file disappeared",
        )),
        SealStatus::LogMissing => Some(Discrepancy::new(
            DiscrepancyKind::LogTampered,
            "the audit log file disappeared",
        )),
    })
}

/// Stage 3: the counter hash must recompute. An absent counter is a first
/// run.
pub fn check_session_seal(counter: &SessionSeal) -> Result<Option<Discrepancy>, IntegrityError> {
    Ok(match counter.read()? {
        CounterReading::Absent | CounterReading::Valid(_) => None,
        CounterReading::Tampered { number } => Some(Discrepancy::new(
            DiscrepancyKind::SessionCounterTampered,
            match number {
                Some(n) => format!("the stored session number {n} does not match its digest"),
                None => "the session counter file is unreadable".to_string(),
            },
        )),
    })
}

/// Stage 4: an empty or absent vault is only acceptable before any
/// document exists. On that first run an empty vault file is created.
///
/// A vault holding only malformed entries is not empty; stage 5 reports it.
pub fn check_vault_existence(
    vault: &HashVault,
    store: &dyn DocumentStore,
) -> Result<Option<Discrepancy>, IntegrityError> {
    let (absent, empty) = match vault.inspect()? {
        VaultInspection::Absent => (true, true),
        VaultInspection::Present { entries, malformed } => {
            (false, entries.is_empty() && malformed.is_empty())
        },
        // Shape problems belong to the next stage.
        VaultInspection::Unparseable { .. } => return Ok(None),
    };
    if !empty {
        return Ok(None);
    }

    let documents = store.list_all()?;
    if documents.is_empty() {
        if absent {
            vault.save(&VaultMap::new())?;
            tracing::info!(path = %vault.path().display(), "first run, empty vault created");
        }
        return Ok(None);
    }
    Ok(Some(Discrepancy::new(
        DiscrepancyKind::VaultMissing,
        format!(
            "the hash vault is {} but {} managed documents exist",
            if absent { "absent" } else { "empty" },
            documents.len()
        ),
    )))
}

/// Stage 5: every entry must be a well-formed digest.
pub fn check_vault_entry_shape(vault: &HashVault) -> Result<Option<Discrepancy>, IntegrityError> {
    Ok(match vault.inspect()? {
        VaultInspection::Absent => None,
        VaultInspection::Unparseable { reason } => Some(Discrepancy::new(
            DiscrepancyKind::VaultCorrupt,
            format!("the hash vault cannot be parsed: {reason}"),
        )),
        VaultInspection::Present { malformed, .. } if malformed.is_empty() => None,
        VaultInspection::Present { malformed, .. } => Some(Discrepancy::new(
            DiscrepancyKind::VaultCorrupt,
            format!("malformed digests for: {}", malformed.join(", ")),
        )),
    })
}

/// Stage 6: the vault file must match the last anchor recorded in the log.
pub fn check_vault_anchor(
    vault: &HashVault,
    audit: &AuditLog,
) -> Result<Option<Discrepancy>, IntegrityError> {
    let Some(anchor) = audit.last_anchor()? else {
        return Ok(None);
    };
    let Some(current) = vault.file_digest()? else {
        return Ok(Some(Discrepancy::new(
            DiscrepancyKind::VaultTampered,
            "the hash vault file is gone although the audit log anchors it",
        )));
    };
    if anchor_matches(&anchor, &current) {
        return Ok(None);
    }
    Ok(Some(Discrepancy::new(
        DiscrepancyKind::VaultTampered,
        format!(
            "the hash vault changed since the last session closed (anchor {}..., vault {}...)",
            short(&anchor),
            short(&current)
        ),
    )))
}

/// Stage 7: every vault entry must verify. At most `cap` failing ids are
/// reported.
pub fn check_documents(
    vault: &HashVault,
    store: &dyn DocumentStore,
    cap: usize,
) -> Result<Option<Discrepancy>, IntegrityError> {
    let map = vault.load()?;
    let index = store.index()?;
    let mut failing = Vec::new();
    let mut total = 0usize;
    for id in map.keys() {
        let verification = match index.get(id) {
            Some(path) => vault.verify_against(&map, id, path),
            None => crate::vault::Verification::DigestError {
                reason: StoreError::NotFound { id: id.clone() }.to_string(),
            },
        };
        if verification.is_ok() {
            continue;
        }
        tracing::warn!(id = %id, reason = %verification, "document failed verification");
        total += 1;
        if failing.len() < cap {
            failing.push(id.clone());
        }
    }
    if failing.is_empty() {
        return Ok(None);
    }

    let mut message = format!("{} document(s) failed verification: {}", total, failing.join(", "));
    if total > failing.len() {
        message.push_str(&format!(" (and {} more)", total - failing.len()));
    }
    Ok(Some(Discrepancy::new(
        DiscrepancyKind::ElementsCompromised { ids: failing },
        message,
    )))
}
