//! Privileged repair commands.
//!
//! # Commands
//!
//! - `metrovault regenerate vault` - Rebuild the whole hash vault and anchor it
//! - `metrovault regenerate log-seal` - Reseal the audit log as it stands
//! - `metrovault regenerate entries <ID>...` - Re-sign the listed documents
//! - `metrovault restore-counter <NUMBER>` - Overwrite the session counter
//!
//! Every command authenticates the privileged principal first (password
//! from `METROVAULT_PASSWORD` or stdin). Each attempt, granted or denied,
//! is written to the audit log. The log is resealed before exit when the
//! command succeeded, or when its seal already matched before the attempt.
//! A refused command never turns a tampered log into a sealed one.
//!
//! # Exit Codes
//!
//! - 0: Artifact regenerated
//! - 1: Error (authorization denied, regeneration failed)

use clap::{Args, ValueEnum};
use metrovault_core::audit::{AuditLogError, SealStatus};
use metrovault_core::recovery::RegenerationReport;
use metrovault_core::{
    Artifact, Credentials, Installation, MetrovaultConfig, RecoveryAuthority,
};
use secrecy::ExposeSecret;
use serde::Serialize;

use super::{
    PASSWORD_ENV, exit_codes, open_installation, output_error, output_failure, print_json,
    read_password,
};
use crate::directory::ConfigDirectory;

/// Artifact selector for `metrovault regenerate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ArtifactKind {
    /// The whole hash vault.
    Vault,
    /// The audit log seal file.
    LogSeal,
    /// Selected vault entries.
    Entries,
}

/// Arguments for `metrovault regenerate`.
#[derive(Debug, Args)]
pub struct RegenerateArgs {
    /// Artifact to regenerate.
    #[arg(value_enum)]
    pub artifact: ArtifactKind,

    /// Element ids to re-sign (only with `entries`).
    pub ids: Vec<String>,

    /// Privileged user (defaults to the configured principal).
    #[arg(short, long)]
    pub user: Option<String>,

    /// Output format (text or json).
    #[arg(long, default_value = "false")]
    pub json: bool,
}

/// Arguments for `metrovault restore-counter`.
#[derive(Debug, Args)]
pub struct RestoreCounterArgs {
    /// Session number to store.
    pub number: u64,

    /// Privileged user (defaults to the configured principal).
    #[arg(short, long)]
    pub user: Option<String>,

    /// Output format (text or json).
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct RegenerateResponse {
    artifact: String,
    authorized_by: String,
    #[serde(flatten)]
    detail: DetailView,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum DetailView {
    Counter { number: u64 },
    Seal { seal: String },
    Vault { entries: usize, skipped: Vec<String>, anchor: String },
    Entries { regenerated: Vec<String> },
}

impl From<RegenerationReport> for DetailView {
    fn from(report: RegenerationReport) -> Self {
        match report {
            RegenerationReport::SessionCounter { number } => Self::Counter { number },
            RegenerationReport::LogSeal { seal } => Self::Seal { seal },
            RegenerationReport::Vault { summary, anchor } => Self::Vault {
                entries: summary.entries,
                skipped: summary.skipped,
                anchor,
            },
            RegenerationReport::VaultEntries { regenerated } => Self::Entries { regenerated },
        }
    }
}

/// Runs `metrovault regenerate`.
pub fn run_regenerate(args: &RegenerateArgs, config: &MetrovaultConfig) -> u8 {
    let artifact = match args.artifact {
        ArtifactKind::Vault => Artifact::Vault,
        ArtifactKind::LogSeal => Artifact::LogSeal,
        ArtifactKind::Entries if args.ids.is_empty() => {
            return output_error(
                args.json,
                "invalid_arguments",
                "regenerate entries needs at least one element id",
                exit_codes::ERROR,
            );
        },
        ArtifactKind::Entries => Artifact::VaultEntries(args.ids.clone()),
    };
    if !matches!(artifact, Artifact::VaultEntries(_)) && !args.ids.is_empty() {
        return output_error(
            args.json,
            "invalid_arguments",
            "element ids are only accepted with `entries`",
            exit_codes::ERROR,
        );
    }
    run_privileged(&artifact, args.user.as_deref(), config, args.json)
}

/// Runs `metrovault restore-counter`.
pub fn run_restore_counter(args: &RestoreCounterArgs, config: &MetrovaultConfig) -> u8 {
    let artifact = Artifact::SessionCounter {
        number: args.number,
    };
    run_privileged(&artifact, args.user.as_deref(), config, args.json)
}

fn run_privileged(
    artifact: &Artifact,
    user: Option<&str>,
    config: &MetrovaultConfig,
    json_output: bool,
) -> u8 {
    let installation = match open_installation(config) {
        Ok(installation) => installation,
        Err(e) => return output_failure(json_output, "config_error", &e),
    };
    let user = user.unwrap_or(&config.integrity.privileged_principal);
    let password = match read_password(PASSWORD_ENV, user) {
        Ok(password) => password,
        Err(e) => return output_failure(json_output, "no_password", &e),
    };
    let prior_seal = match installation.audit().verify_seal() {
        Ok(status) => status,
        Err(e) => {
            return output_error(json_output, "seal_unreadable", &e.to_string(), exit_codes::ERROR);
        },
    };
    if let Err(e) = installation.audit().set_actor(Some(user.to_string())) {
        return output_error(json_output, "log_unwritable", &e.to_string(), exit_codes::ERROR);
    }
    let directory = ConfigDirectory::new(&config.users);
    let authority = RecoveryAuthority::new(&installation, &directory);

    let result = authority
        .authorize(&Credentials::new(user, password.expose_secret()))
        .and_then(|grant| {
            authority
                .regenerate(artifact, &grant)
                .map(|report| (grant, report))
        });
    if let Err(e) = finish(&installation, &prior_seal, result.is_ok()) {
        return output_error(json_output, "seal_failed", &e.to_string(), exit_codes::ERROR);
    }

    let (grant, report) = match result {
        Ok(done) => done,
        Err(e) => {
            return output_error(
                json_output,
                "regeneration_failed",
                &e.to_string(),
                exit_codes::ERROR,
            );
        },
    };

    let response = RegenerateResponse {
        artifact: artifact.to_string(),
        authorized_by: grant.id().to_string(),
        detail: report.into(),
    };
    if json_output {
        print_json(&response);
    } else {
        println!("Regenerated {} (authorized by {})", response.artifact, response.authorized_by);
        match &response.detail {
            DetailView::Counter { number } => println!("  session counter: {number}"),
            DetailView::Seal { seal } => println!("  log seal: {seal}"),
            DetailView::Vault {
                entries,
                skipped,
                anchor,
            } => {
                println!("  entries: {entries}");
                println!("  anchor:  {anchor}");
                for id in skipped {
                    println!("  skipped: {id}");
                }
            },
            DetailView::Entries { regenerated } => {
                for id in regenerated {
                    println!("  re-signed: {id}");
                }
            },
        }
    }
    exit_codes::SUCCESS
}

/// Whether the log may be resealed after a privileged attempt.
///
/// A granted command has re-authenticated the privileged principal. A
/// refused one may only keep a seal that already matched.
const fn may_reseal(prior: &SealStatus, succeeded: bool) -> bool {
    succeeded || matches!(prior, SealStatus::Intact | SealStatus::ResealedAfterViewerClose)
}

/// Closes the synthesized session and reseals the log when allowed.
fn finish(
    installation: &Installation,
    prior: &SealStatus,
    succeeded: bool,
) -> Result<(), AuditLogError> {
    let audit = installation.audit();
    audit.end_session()?;
    if may_reseal(prior, succeeded) {
        audit.seal()?;
        return Ok(());
    }
    tracing::warn!(?prior, "privileged command refused, audit log seal left unchanged");
    audit.record_incident(
        "privileged command refused while the audit log seal did not match",
        &format!("{prior:?}"),
        "seal left unchanged",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mismatch() -> SealStatus {
        SealStatus::Mismatch {
            expected: "a".repeat(64),
            actual: "b".repeat(64),
        }
    }

    #[test]
    fn test_refused_command_keeps_only_a_matching_seal() {
        assert!(may_reseal(&SealStatus::Intact, false));
        assert!(may_reseal(&SealStatus::ResealedAfterViewerClose, false));
        assert!(!may_reseal(&mismatch(), false));
        assert!(!may_reseal(&SealStatus::SealMissing, false));
        assert!(!may_reseal(&SealStatus::LogMissing, false));
    }

    #[test]
    fn test_granted_command_always_reseals() {
        assert!(may_reseal(&mismatch(), true));
        assert!(may_reseal(&SealStatus::SealMissing, true));
    }
}
