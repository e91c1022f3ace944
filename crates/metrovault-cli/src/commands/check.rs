//! `metrovault check`: run the startup verification without signing in.
//!
//! Runs the audit log, session counter and vault checks, resolves any
//! discrepancy through the chosen policy, then closes the way a viewer
//! would: the log is resealed and nothing else is written.
//!
//! # Exit Codes
//!
//! - 0: Verification finished
//! - 1: Error (configuration, I/O)
//! - 2: Aborted on a discrepancy

use clap::Args;
use metrovault_core::{IntegrityVerifier, MetrovaultConfig, SessionContext, StartupOutcome};
use serde::Serialize;

use super::{
    OnDiscrepancy, ResolvedView, build_prompt, exit_codes, open_installation, output_error,
    output_failure, print_json, resolved_views,
};
use crate::directory::ConfigDirectory;

/// Arguments for `metrovault check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// How to resolve discrepancies.
    #[arg(long, value_enum, default_value_t = OnDiscrepancy::Ask)]
    pub on_discrepancy: OnDiscrepancy,

    /// Privileged user for restores (defaults to the configured principal).
    #[arg(long)]
    pub admin: Option<String>,

    /// Output format (text or json).
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    status: &'static str,
    read_only: bool,
    discrepancies: Vec<ResolvedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aborted_on: Option<String>,
}

/// Runs `metrovault check`.
pub fn run(args: &CheckArgs, config: &MetrovaultConfig) -> u8 {
    let json_output = args.json;
    let installation = match open_installation(config) {
        Ok(installation) => installation,
        Err(e) => return output_failure(json_output, "config_error", &e),
    };
    let directory = ConfigDirectory::new(&config.users);
    let admin = args
        .admin
        .as_deref()
        .unwrap_or(&config.integrity.privileged_principal);
    let mut prompt = build_prompt(args.on_discrepancy, admin);
    let mut ctx = SessionContext::new();

    let verifier = IntegrityVerifier::new(&installation, &directory);
    let report = match verifier.run_startup(&mut ctx, prompt.as_mut()) {
        Ok(StartupOutcome::Ready(report)) => report,
        Ok(StartupOutcome::Aborted(discrepancy)) => {
            if json_output {
                print_json(&CheckResponse {
                    status: "aborted",
                    read_only: ctx.is_read_only(),
                    discrepancies: Vec::new(),
                    aborted_on: Some(discrepancy.to_string()),
                });
            } else {
                eprintln!("Verification aborted: {discrepancy}");
            }
            return exit_codes::ABORTED;
        },
        Err(e) => {
            return output_error(
                json_output,
                "verification_failed",
                &e.to_string(),
                exit_codes::ERROR,
            );
        },
    };

    if let Err(e) = installation.close(&mut ctx) {
        return output_error(json_output, "close_failed", &e.to_string(), exit_codes::ERROR);
    }

    let response = CheckResponse {
        status: "ready",
        read_only: ctx.is_read_only(),
        discrepancies: resolved_views(&report),
        aborted_on: None,
    };
    if json_output {
        print_json(&response);
    } else if response.discrepancies.is_empty() {
        println!("All integrity checks passed");
    } else {
        println!(
            "Verification finished with {} resolved discrepancies",
            response.discrepancies.len()
        );
        for d in &response.discrepancies {
            println!("  {:<26} {} ({})", d.kind, d.message, d.resolution);
        }
        if response.read_only {
            println!("Continued read-only");
        }
    }
    exit_codes::SUCCESS
}
