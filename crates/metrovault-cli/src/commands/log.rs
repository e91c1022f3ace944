//! `metrovault log`: print the audit log.
//!
//! Read-only: the seal is compared, never rewritten.
//!
//! # Exit Codes
//!
//! - 0: Log printed
//! - 1: Error (unreadable or corrupt log)

use clap::Args;
use metrovault_core::crypto::digests_match;
use metrovault_core::{AuditSession, MetrovaultConfig};
use serde::Serialize;

use super::{exit_codes, open_installation, output_error, output_failure, print_json};

/// Arguments for `metrovault log`.
#[derive(Debug, Args)]
pub struct LogArgs {
    /// Show only the last N sessions.
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Output format (text or json).
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct LogResponse<'a> {
    seal: &'static str,
    total_sessions: usize,
    sessions: &'a [AuditSession],
}

/// Runs `metrovault log`.
pub fn run(args: &LogArgs, config: &MetrovaultConfig) -> u8 {
    let json_output = args.json;
    let installation = match open_installation(config) {
        Ok(installation) => installation,
        Err(e) => return output_failure(json_output, "config_error", &e),
    };
    let audit = installation.audit();
    let sessions = match audit.read_sessions() {
        Ok(sessions) => sessions,
        Err(e) => {
            return output_error(json_output, "log_unreadable", &e.to_string(), exit_codes::ERROR);
        },
    };
    let seal = match (audit.stored_seal(), audit.current_digest()) {
        (Ok(Some(stored)), Ok(Some(current))) if digests_match(&stored, &current) => "intact",
        (Ok(None), _) => "missing",
        (Ok(_), Ok(_)) => "mismatch",
        (Err(e), _) | (_, Err(e)) => {
            return output_error(json_output, "seal_unreadable", &e.to_string(), exit_codes::ERROR);
        },
    };

    let start = args
        .limit
        .map_or(0, |limit| sessions.len().saturating_sub(limit));
    let shown = &sessions[start..];

    if json_output {
        print_json(&LogResponse {
            seal,
            total_sessions: sessions.len(),
            sessions: shown,
        });
        return exit_codes::SUCCESS;
    }

    println!(
        "audit log: {} ({} sessions, seal {seal})",
        audit.log_path().display(),
        sessions.len()
    );
    for session in shown {
        let end = session
            .end_time
            .map_or_else(|| "open".to_string(), |t| t.to_rfc3339());
        println!(
            "\n[{}] {:?} user={} {} .. {}",
            session.session_number,
            session.kind,
            session.user,
            session.start_time.to_rfc3339(),
            end
        );
        for event in &session.events {
            println!(
                "  {} {:<8} {}",
                event.time.format("%Y-%m-%d %H:%M:%S"),
                event.category.to_string(),
                event.message
            );
        }
    }
    exit_codes::SUCCESS
}
