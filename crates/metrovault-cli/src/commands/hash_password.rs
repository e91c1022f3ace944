//! `metrovault hash-password`: print the `password_sha256` value for a
//! `[[users]]` entry.
//!
//! The password is read from `METROVAULT_PASSWORD`, or from stdin.

use clap::Args;
use secrecy::ExposeSecret;
use serde::Serialize;

use super::{PASSWORD_ENV, exit_codes, output_failure, print_json, read_password};
use crate::directory::password_digest;

/// Arguments for `metrovault hash-password`.
#[derive(Debug, Args)]
pub struct HashPasswordArgs {
    /// Output format (text or json).
    #[arg(long, default_value = "false")]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct HashResponse {
    password_sha256: String,
}

/// Runs `metrovault hash-password`.
pub fn run(args: &HashPasswordArgs) -> u8 {
    let password = match read_password(PASSWORD_ENV, "new account") {
        Ok(password) => password,
        Err(e) => return output_failure(args.json, "no_password", &e),
    };
    let response = HashResponse {
        password_sha256: password_digest(password.expose_secret()),
    };
    if args.json {
        print_json(&response);
    } else {
        println!("{}", response.password_sha256);
    }
    exit_codes::SUCCESS
}
