//! `metrovault session`: one complete operator session.
//!
//! Runs the startup checks, signs in, verifies every registered document,
//! saves the documents given with `--save` and runs the shutdown sequence
//! (vault rebuild, anchor, log seal and counter step).
//!
//! The login password is read from `METROVAULT_PASSWORD`, or from stdin
//! when unset.
//!
//! # Exit Codes
//!
//! - 0: Session closed normally
//! - 1: Error (login, I/O, or a save was refused)
//! - 2: Aborted on a discrepancy

use std::path::Path;

use clap::Args;
use metrovault_core::persist::{MAX_ARTIFACT_FILE_SIZE, read_bounded};
use metrovault_core::{
    Credentials, Installation, IntegrityVerifier, MetrovaultConfig, SessionContext,
    StartupOutcome,
};
use secrecy::ExposeSecret;
use serde::Serialize;

use super::{
    OnDiscrepancy, PASSWORD_ENV, ResolvedView, build_prompt, exit_codes, open_installation,
    output_error, output_failure, print_json, read_password, resolved_views,
};
use crate::directory::ConfigDirectory;

/// Arguments for `metrovault session`.
#[derive(Debug, Args)]
pub struct SessionArgs {
    /// User to sign in as.
    #[arg(short, long)]
    pub user: String,

    /// Save a document: category, element id and the file holding its
    /// content. Repeatable.
    #[arg(
        long,
        num_args = 3,
        value_names = ["CATEGORY", "ID", "FILE"],
        action = clap::ArgAction::Append
    )]
    pub save: Vec<String>,

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
struct SavedView {
    id: String,
    digest: String,
}

#[derive(Debug, Serialize)]
struct RefusedView {
    id: String,
    reason: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    user: String,
    role: String,
    session_number: Option<u64>,
    read_only: bool,
    startup: Vec<ResolvedView>,
    documents: Vec<ResolvedView>,
    saved: Vec<SavedView>,
    refused: Vec<RefusedView>,
    anchor: Option<String>,
    seal: String,
}

/// Runs `metrovault session`.
#[allow(clippy::too_many_lines)] // Startup, login, work and shutdown in sequence
pub fn run(args: &SessionArgs, config: &MetrovaultConfig) -> u8 {
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
    let verifier = IntegrityVerifier::new(&installation, &directory);
    let mut ctx = SessionContext::new();

    let startup = match verifier.run_startup(&mut ctx, prompt.as_mut()) {
        Ok(StartupOutcome::Ready(report)) => report,
        Ok(StartupOutcome::Aborted(d)) => {
            return output_error(
                json_output,
                "aborted",
                &format!("verification aborted: {d}"),
                exit_codes::ABORTED,
            );
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

    let password = match read_password(PASSWORD_ENV, &args.user) {
        Ok(password) => password,
        Err(e) => return output_failure(json_output, "no_password", &e),
    };
    let credentials = Credentials::new(args.user.as_str(), password.expose_secret());
    let principal = match installation.login(&mut ctx, &directory, &credentials) {
        Ok(principal) => principal,
        Err(e) => {
            // Flush and seal the audited failure.
            if let Err(close_err) = installation.close(&mut ctx) {
                tracing::error!(err = %close_err, "failed to close after login failure");
            }
            return output_error(json_output, "login_failed", &e.to_string(), exit_codes::ERROR);
        },
    };

    let documents = match verifier.check_documents(&mut ctx, prompt.as_mut()) {
        Ok(StartupOutcome::Ready(report)) => report,
        Ok(StartupOutcome::Aborted(d)) => {
            return output_error(
                json_output,
                "aborted",
                &format!("verification aborted: {d}"),
                exit_codes::ABORTED,
            );
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

    let (saved, refused) = save_all(&installation, &ctx, &args.save);

    let shutdown = match installation.close(&mut ctx) {
        Ok(report) => report,
        Err(e) => {
            return output_error(json_output, "close_failed", &e.to_string(), exit_codes::ERROR);
        },
    };

    let response = SessionResponse {
        user: principal.id,
        role: ctx
            .effective_role()
            .map_or_else(String::new, |role| role.to_string()),
        session_number: ctx.session_number(),
        read_only: shutdown.read_only,
        startup: resolved_views(&startup),
        documents: resolved_views(&documents),
        saved,
        refused,
        anchor: shutdown.anchor,
        seal: shutdown.seal,
    };

    if json_output {
        print_json(&response);
    } else {
        let number = response
            .session_number
            .map_or_else(|| "uncounted".to_string(), |n| n.to_string());
        println!("Session {number} closed for {} ({})", response.user, response.role);
        for d in response.startup.iter().chain(&response.documents) {
            println!("  {:<26} {} ({})", d.kind, d.message, d.resolution);
        }
        for s in &response.saved {
            println!("  saved    {:<20} {}", s.id, s.digest);
        }
        for r in &response.refused {
            println!("  refused  {:<20} {}", r.id, r.reason);
        }
        if response.read_only {
            println!("  read-only close: vault left untouched");
        } else if let Some(anchor) = &response.anchor {
            println!("  vault anchor: {anchor}");
        }
        println!("  log seal:     {}", response.seal);
    }

    if response.refused.is_empty() {
        exit_codes::SUCCESS
    } else {
        exit_codes::ERROR
    }
}

fn save_all(
    installation: &Installation,
    ctx: &SessionContext,
    save: &[String],
) -> (Vec<SavedView>, Vec<RefusedView>) {
    let mut saved = Vec::new();
    let mut refused = Vec::new();
    for chunk in save.chunks_exact(3) {
        let [category, id, file] = chunk else {
            continue;
        };
        let result = read_bounded(Path::new(file), MAX_ARTIFACT_FILE_SIZE)
            .map_err(|e| e.to_string())
            .and_then(|content| {
                installation
                    .save_document(ctx, category, id, &content)
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(digest) => saved.push(SavedView {
                id: id.clone(),
                digest,
            }),
            Err(reason) => {
                tracing::warn!(%id, %reason, "document not saved");
                refused.push(RefusedView {
                    id: id.clone(),
                    reason,
                });
            },
        }
    }
    (saved, refused)
}
