//! Subcommand implementations.
//!
//! Every command returns a process exit code from [`exit_codes`] and
//! accepts `--json` for machine-readable output. Errors go to stderr.

pub mod admin;
pub mod check;
pub mod hash_password;
pub mod log;
pub mod scan;
pub mod session;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use metrovault_core::verifier::StartupReport;
use metrovault_core::{Installation, MetrovaultConfig, OperatorPrompt, Resolution};
use secrecy::SecretString;
use serde::Serialize;

use crate::prompt::{LinePrompt, PolicyPrompt};

/// Environment variable holding the login password.
pub const PASSWORD_ENV: &str = "METROVAULT_PASSWORD";

/// Environment variable holding the privileged password used for
/// unattended restores.
pub const ADMIN_PASSWORD_ENV: &str = "METROVAULT_ADMIN_PASSWORD";

/// Exit codes shared by all commands.
pub mod exit_codes {
    /// Success exit code.
    pub const SUCCESS: u8 = 0;
    /// General error exit code.
    pub const ERROR: u8 = 1;
    /// Verification aborted on a discrepancy.
    pub const ABORTED: u8 = 2;
    /// A scan found documents that do not verify.
    pub const COMPROMISED: u8 = 3;
}

/// How discrepancies found during verification are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnDiscrepancy {
    /// Ask on the terminal.
    Ask,
    /// Abort on the first discrepancy.
    Abort,
    /// Continue, read-only where required.
    Continue,
    /// Repair as the privileged principal.
    Restore,
}

/// Builds the operator prompt for `policy`.
///
/// Unattended restores authenticate `admin` with the password from
/// [`ADMIN_PASSWORD_ENV`].
pub fn build_prompt(policy: OnDiscrepancy, admin: &str) -> Box<dyn OperatorPrompt> {
    match policy {
        OnDiscrepancy::Ask => Box::new(LinePrompt::new(io::stdin().lock(), io::stderr())),
        OnDiscrepancy::Abort => Box::new(PolicyPrompt::new(Resolution::Abort, None)),
        OnDiscrepancy::Continue => {
            Box::new(PolicyPrompt::new(Resolution::ContinueDegraded, None))
        },
        OnDiscrepancy::Restore => {
            let login = std::env::var(ADMIN_PASSWORD_ENV)
                .ok()
                .map(|password| (admin.to_string(), SecretString::from(password)));
            if login.is_none() {
                tracing::warn!(
                    env = ADMIN_PASSWORD_ENV,
                    "no privileged password set, restores will be cancelled"
                );
            }
            Box::new(PolicyPrompt::new(Resolution::Restore, login))
        },
    }
}

/// Reads a password from `env_var`, or from one line of stdin.
pub fn read_password(env_var: &str, user: &str) -> Result<SecretString> {
    if let Ok(password) = std::env::var(env_var) {
        return Ok(SecretString::from(password));
    }
    eprint!("password for {user}: ");
    io::stderr().flush().context("failed to flush stderr")?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    if read == 0 {
        bail!("no password given (set {env_var} or pipe it on stdin)");
    }
    Ok(SecretString::from(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Opens the installation configured in `config`.
pub fn open_installation(config: &MetrovaultConfig) -> Result<Installation> {
    Installation::open(&config.integrity).with_context(|| {
        format!(
            "failed to open installation at {}",
            config.integrity.data_dir.display()
        )
    })
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

/// Prints `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    );
}

/// Reports an error and returns `exit_code`.
pub fn output_error(json_output: bool, code: &str, message: &str, exit_code: u8) -> u8 {
    if json_output {
        let error = ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
        };
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&error).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        eprintln!("Error: {message}");
    }
    exit_code
}

/// Reports an `anyhow` error with its full context chain.
pub fn output_failure(json_output: bool, code: &str, err: &anyhow::Error) -> u8 {
    output_error(json_output, code, &format!("{err:#}"), exit_codes::ERROR)
}

/// JSON view of one resolved discrepancy.
#[derive(Debug, Serialize)]
pub struct ResolvedView {
    /// Discrepancy title.
    pub kind: String,
    /// Explanation shown to the operator.
    pub message: String,
    /// How it was resolved.
    pub resolution: String,
}

/// Flattens a verification report for output.
#[must_use]
pub fn resolved_views(report: &StartupReport) -> Vec<ResolvedView> {
    report
        .resolved
        .iter()
        .map(|r| ResolvedView {
            kind: r.discrepancy.kind.title().to_string(),
            message: r.discrepancy.message.clone(),
            resolution: resolution_name(r.resolution).to_string(),
        })
        .collect()
}

/// Stable name of a resolution.
#[must_use]
pub const fn resolution_name(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Abort => "abort",
        Resolution::ContinueDegraded => "continue_degraded",
        Resolution::Restore => "restore",
    }
}
