//! metrovault - integrity checks for calibration records
//!
//! Operator CLI over `metrovault-core`: startup verification, signed-in
//! sessions, full scans, privileged repairs and audit log inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrovault_core::MetrovaultConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod directory;
mod prompt;

/// metrovault - integrity checks for calibration records
#[derive(Parser, Debug)]
#[command(name = "metrovault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "METROVAULT_CONFIG", default_value = "metrovault.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the startup checks without signing in
    Check(commands::check::CheckArgs),

    /// Run a full operator session: checks, login, saves, shutdown
    Session(commands::session::SessionArgs),

    /// Verify every document on disk against the hash vault
    Scan(commands::scan::ScanArgs),

    /// Regenerate an integrity artifact (privileged)
    Regenerate(commands::admin::RegenerateArgs),

    /// Overwrite the session counter (privileged)
    RestoreCounter(commands::admin::RestoreCounterArgs),

    /// Print the audit log
    Log(commands::log::LogArgs),

    /// Print the SHA-256 of a password for a `[[users]]` entry
    HashPassword(commands::hash_password::HashPasswordArgs),

    /// Print the effective configuration as TOML
    Config,
}

fn load_config(path: &Path) -> Result<MetrovaultConfig> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
        return Ok(MetrovaultConfig::default());
    }
    MetrovaultConfig::from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Commands::HashPassword(args) = &cli.command {
        std::process::exit(i32::from(commands::hash_password::run(args)));
    }

    let config = load_config(&cli.config)?;

    let exit_code = match &cli.command {
        Commands::Check(args) => commands::check::run(args, &config),
        Commands::Session(args) => commands::session::run(args, &config),
        Commands::Scan(args) => commands::scan::run(args, &config),
        Commands::Regenerate(args) => commands::admin::run_regenerate(args, &config),
        Commands::RestoreCounter(args) => commands::admin::run_restore_counter(args, &config),
        Commands::Log(args) => commands::log::run(args, &config),
        Commands::HashPassword(args) => commands::hash_password::run(args),
        Commands::Config => {
            print!("{}", config.to_toml().context("failed to render configuration")?);
            commands::exit_codes::SUCCESS
        },
    };
    std::process::exit(i32::from(exit_code))
}
