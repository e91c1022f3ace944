//! Tests for the hash vault.

use std::fs;

use proptest::prelude::*;

use super::*;
use crate::crypto::DEFAULT_DOCUMENT_SALT;
use crate::documents::FsDocumentStore;

// ============================================================================
// Helpers
// ============================================================================

fn vault_in(dir: &Path) -> HashVault {
    HashVault::new(dir.join("hashes_vault.json"), Digester::new(DEFAULT_DOCUMENT_SALT))
}

fn store_in(dir: &Path) -> FsDocumentStore {
    FsDocumentStore::new(dir.join("data"), vec!["standards".into(), "instruments".into()])
}

fn digest_of(byte: u8) -> String {
    Digester::new("t").digest(&[byte])
}

// ============================================================================
// Load / save
// ============================================================================

#[test]
fn test_absent_vault_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    assert_eq!(vault.inspect().unwrap(), VaultInspection::Absent);
    assert!(vault.load().unwrap().is_empty());
    assert!(vault.file_digest().unwrap().is_none());
}

#[test]
fn test_unparseable_vault_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    fs::write(vault.path(), b"{not json").unwrap();
    assert!(matches!(
        vault.inspect().unwrap(),
        VaultInspection::Unparseable { .. }
    ));
    assert!(vault.load().unwrap().is_empty());
}

#[test]
fn test_malformed_entry_dropped_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    let good = digest_of(1);
    let content = format!(
        r#"{{"MI-0001": "{good}", "MI-0002": "abc123", "MI-0003": 7, "session_counter": {{"n": 1}}}}"#
    );
    fs::write(vault.path(), content).unwrap();

    let VaultInspection::Present { entries, malformed } = vault.inspect().unwrap() else {
        panic!("expected a parsed vault");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(malformed, vec!["MI-0002", "MI-0003"]);

    let loaded = vault.load().unwrap();
    assert_eq!(loaded.get("MI-0001"), Some(&good));
    assert!(!loaded.contains_key("MI-0002"));
    assert!(!loaded.contains_key("session_counter"));
}

#[test]
fn test_save_excludes_reserved_and_sorts_keys() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    let mut map = VaultMap::new();
    map.insert("zeta".into(), digest_of(1));
    map.insert("alpha".into(), digest_of(2));
    map.insert("session_counter".into(), digest_of(3));
    vault.save(&map).unwrap();

    let raw = fs::read_to_string(vault.path()).unwrap();
    assert!(!raw.contains("session_counter"));
    assert!(raw.find("alpha").unwrap() < raw.find("zeta").unwrap());
    assert_eq!(vault.load().unwrap().len(), 2);
}

#[test]
fn test_record_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    assert!(matches!(
        vault.record("MI-1", "short"),
        Err(VaultError::InvalidDigest { .. })
    ));
    assert!(matches!(
        vault.record("session_counter", &digest_of(1)),
        Err(VaultError::ReservedKey { .. })
    ));
    vault.record("MI-1", &digest_of(1)).unwrap();
    vault.record("MI-2", &digest_of(2)).unwrap();
    assert_eq!(vault.load().unwrap().len(), 2);
}

// ============================================================================
// Verification
// ============================================================================

#[test]
fn test_verify_one_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    let doc = dir.path().join("doc.json");
    fs::write(&doc, b"{\"reading\": 1.0}").unwrap();

    assert_eq!(vault.verify_one("doc", &doc).unwrap(), Verification::NotInVault);

    let digest = vault.digester().digest_file(&doc).unwrap();
    vault.record("doc", &digest).unwrap();
    assert!(vault.verify_one("doc", &doc).unwrap().is_ok());

    fs::write(&doc, b"{\"reading\": 2.0}").unwrap();
    let outcome = vault.verify_one("doc", &doc).unwrap();
    assert!(matches!(outcome, Verification::Mismatch { ref expected, .. } if *expected == digest));
    assert!(!outcome.is_ok());

    fs::remove_file(&doc).unwrap();
    assert!(matches!(
        vault.verify_one("doc", &doc).unwrap(),
        Verification::DigestError { .. }
    ));
}

// ============================================================================
// Rebuild
// ============================================================================

#[test]
fn test_rebuild_full_covers_every_document() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    let store = store_in(dir.path());
    store.write("standards", "PT-01", b"{\"s\":1}").unwrap();
    store.write("instruments", "MI-01", b"{\"i\":1}").unwrap();
    store.write("instruments", "MI-02", b"{\"i\":2}").unwrap();

    // A stale entry for a deleted document disappears.
    vault.record("GONE", &digest_of(9)).unwrap();

    let summary = vault.rebuild_full(&store).unwrap();
    assert_eq!(summary.entries, 3);
    assert!(summary.skipped.is_empty());
    assert_eq!(Some(summary.vault_digest), vault.file_digest().unwrap());

    let map = vault.load().unwrap();
    assert_eq!(
        map.keys().cloned().collect::<Vec<_>>(),
        vec!["MI-01", "MI-02", "PT-01"]
    );
}

#[test]
fn test_rebuild_is_byte_stable() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    let store = store_in(dir.path());
    store.write("standards", "PT-01", b"{}").unwrap();

    let first = vault.rebuild_full(&store).unwrap();
    let bytes = fs::read(vault.path()).unwrap();
    let second = vault.rebuild_full(&store).unwrap();
    assert_eq!(first, second);
    assert_eq!(bytes, fs::read(vault.path()).unwrap());
}

#[test]
fn test_regenerate_entries_only_touches_listed_ids() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    let store = store_in(dir.path());
    store.write("standards", "PT-01", b"{}").unwrap();
    store.write("standards", "PT-02", b"{}").unwrap();
    vault.rebuild_full(&store).unwrap();
    let before = vault.load().unwrap();

    store.write("standards", "PT-01", b"{\"edited\":true}").unwrap();
    store.write("standards", "PT-02", b"{\"edited\":true}").unwrap();
    let done = vault
        .regenerate_entries(&store, &["PT-01".to_string(), "MISSING".to_string()])
        .unwrap();
    assert_eq!(done, vec!["PT-01"]);

    let after = vault.load().unwrap();
    assert_ne!(after["PT-01"], before["PT-01"]);
    assert_eq!(after["PT-02"], before["PT-02"]);
}

#[test]
fn test_flipping_a_vault_byte_changes_file_digest() {
    let dir = tempfile::tempdir().unwrap();
    let vault = vault_in(dir.path());
    vault.record("MI-1", &digest_of(1)).unwrap();
    let original = vault.file_digest().unwrap().unwrap();

    let mut bytes = fs::read(vault.path()).unwrap();
    bytes[0] ^= 0x01;
    fs::write(vault.path(), &bytes).unwrap();
    assert_ne!(vault.file_digest().unwrap().unwrap(), original);

    bytes[0] ^= 0x01;
    fs::write(vault.path(), &bytes).unwrap();
    assert_eq!(vault.file_digest().unwrap().unwrap(), original);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_save_load_round_trip(
        entries in proptest::collection::btree_map("[A-Za-z0-9-]{1,12}", any::<u8>(), 0..16)
    ) {
        let dir = tempfile::tempdir().unwrap();
        let vault = vault_in(dir.path());
        let map: VaultMap = entries
            .into_iter()
            .filter(|(id, _)| id != "session_counter")
            .map(|(id, b)| (id, digest_of(b)))
            .collect();
        vault.save(&map).unwrap();
        prop_assert_eq!(vault.load().unwrap(), map);
    }
}
