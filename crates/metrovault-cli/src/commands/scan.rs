//! `metrovault scan`: verify every document on disk against the vault.
//!
//! Read-only. Documents present on disk but missing from the vault are
//! reported too.
//!
//! # Exit Codes
//!
//! - 0: Every document verified
//! - 1: Error
//! - 3: At least one document failed verification

use clap::Args;
use metrovault_core::{MetrovaultConfig, Verification};
use serde::Serialize;

use super::{exit_codes, open_installation, output_error, output_failure, print_json};

/// Arguments for `metrovault scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Only list documents that failed.
    #[arg(long)]
    pub failures_only: bool,

    /// Output format (text or json).
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct EntryView {
    id: String,
    status: &'static str,
    detail: String,
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    total: usize,
    verified: usize,
    entries: Vec<EntryView>,
}

const fn status_name(verification: &Verification) -> &'static str {
    match verification {
        Verification::Verified => "verified",
        Verification::NotInVault => "not_in_vault",
        Verification::DigestError { .. } => "digest_error",
        Verification::Mismatch { .. } => "mismatch",
    }
}

/// Runs `metrovault scan`.
pub fn run(args: &ScanArgs, config: &MetrovaultConfig) -> u8 {
    let json_output = args.json;
    let installation = match open_installation(config) {
        Ok(installation) => installation,
        Err(e) => return output_failure(json_output, "config_error", &e),
    };
    let report = match installation.scan_all() {
        Ok(report) => report,
        Err(e) => {
            return output_error(json_output, "scan_failed", &e.to_string(), exit_codes::ERROR);
        },
    };

    let response = ScanResponse {
        total: report.entries.len(),
        verified: report.verified(),
        entries: report
            .entries
            .iter()
            .filter(|e| !args.failures_only || !e.verification.is_ok())
            .map(|e| EntryView {
                id: e.id.clone(),
                status: status_name(&e.verification),
                detail: e.verification.to_string(),
            })
            .collect(),
    };

    if json_output {
        print_json(&response);
    } else {
        for entry in &response.entries {
            println!("{:<14} {:<24} {}", entry.status, entry.id, entry.detail);
        }
        println!("{} of {} documents verified", response.verified, response.total);
    }

    if report.is_clean() {
        exit_codes::SUCCESS
    } else {
        exit_codes::COMPROMISED
    }
}
