//! Digest primitives for the integrity layer.
//!
//! Every artifact (calibration documents, the vault file, the audit log and
//! the session counter value) is fingerprinted with the same construction:
//!
//! ```text
//! digest(bytes) = hex(SHA-256(bytes || salt))
//! ```
//!
//! The salt is a shared installation secret. It does not turn the digest
//! into a signature; it only stops a casual editor from recomputing a
//! matching digest with a stock `sha256sum`.
//!
//! # Example
//!
//! ```rust
//! use metrovault_core::crypto::{Digester, is_well_formed_digest};
//!
//! let digester = Digester::new(b"installation-salt".to_vec());
//! let digest = digester.digest(b"calibration record");
//!
//! assert!(is_well_formed_digest(&digest));
//! assert_eq!(digest, digester.digest(b"calibration record"));
//! ```

mod digest;

pub use digest::{
    ANCHOR_PREFIX_LEN, DEFAULT_DOCUMENT_SALT, DEFAULT_SESSION_SALT, DIGEST_HEX_LEN, Digester,
    anchor_matches, digests_match, is_well_formed_digest, short,
};
