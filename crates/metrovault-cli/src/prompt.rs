//! Operator prompts for the verifier.
//!
//! [`LinePrompt`] asks on a terminal (or any line-oriented stream);
//! [`PolicyPrompt`] answers every discrepancy the same way for unattended
//! runs.

use std::io::{BufRead, Write};

use metrovault_core::{Credentials, Discrepancy, OperatorPrompt, Resolution};
use secrecy::{ExposeSecret, SecretString};

/// Interactive prompt over a reader and a writer.
///
/// End of input answers [`Resolution::Abort`] and cancels credential and
/// counter prompts.
pub struct LinePrompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    /// Creates a prompt reading answers from `input`.
    pub const fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Writes `question` and reads one trimmed line. `None` on end of input
    /// or I/O failure.
    fn ask(&mut self, question: &str) -> Option<String> {
        write!(self.output, "{question}").ok()?;
        self.output.flush().ok()?;
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead, W: Write> OperatorPrompt for LinePrompt<R, W> {
    fn decide(&mut self, discrepancy: &Discrepancy) -> Resolution {
        let _ = writeln!(
            self.output,
            "\nINTEGRITY ALERT: {}\n  {}",
            discrepancy.kind.title(),
            discrepancy.message
        );
        loop {
            let Some(answer) = self.ask("[a]bort, [c]ontinue read-only or [r]estore? ") else {
                return Resolution::Abort;
            };
            match answer.to_ascii_lowercase().as_str() {
                "a" | "abort" => return Resolution::Abort,
                "c" | "continue" => return Resolution::ContinueDegraded,
                "r" | "restore" => return Resolution::Restore,
                _ => {
                    let _ = writeln!(self.output, "please answer a, c or r");
                },
            }
        }
    }

    fn credentials(&mut self) -> Option<Credentials> {
        let username = self.ask("privileged user: ")?;
        if username.is_empty() {
            return None;
        }
        let password = self.ask("password: ")?;
        Some(Credentials::new(username, password))
    }

    fn session_number_to_restore(&mut self, stored: Option<u64>) -> Option<u64> {
        let question = stored.map_or_else(
            || "session number to restore: ".to_string(),
            |n| format!("session number to restore [{n}]: "),
        );
        let answer = self.ask(&question)?;
        if answer.is_empty() {
            return stored;
        }
        answer.parse().ok()
    }
}

/// Answers every discrepancy with one fixed resolution.
pub struct PolicyPrompt {
    resolution: Resolution,
    login: Option<(String, SecretString)>,
}

impl PolicyPrompt {
    /// Creates a policy. `login` supplies privileged credentials for
    /// [`Resolution::Restore`]; without it every restore is cancelled.
    #[must_use]
    pub const fn new(resolution: Resolution, login: Option<(String, SecretString)>) -> Self {
        Self { resolution, login }
    }
}

impl OperatorPrompt for PolicyPrompt {
    fn decide(&mut self, discrepancy: &Discrepancy) -> Resolution {
        tracing::warn!(%discrepancy, resolution = ?self.resolution, "resolved by policy");
        self.resolution
    }

    fn credentials(&mut self) -> Option<Credentials> {
        self.login
            .as_ref()
            .map(|(user, password)| Credentials::new(user.as_str(), password.expose_secret()))
    }

    fn session_number_to_restore(&mut self, stored: Option<u64>) -> Option<u64> {
        stored
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use metrovault_core::DiscrepancyKind;

    use super::*;

    fn discrepancy() -> Discrepancy {
        Discrepancy::new(DiscrepancyKind::VaultTampered, "vault changed since its anchor")
    }

    fn prompt(input: &str) -> LinePrompt<Cursor<Vec<u8>>, Vec<u8>> {
        LinePrompt::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn test_decide_maps_answers() {
        assert_eq!(prompt("a\n").decide(&discrepancy()), Resolution::Abort);
        assert_eq!(
            prompt("continue\n").decide(&discrepancy()),
            Resolution::ContinueDegraded
        );
        assert_eq!(prompt("R\n").decide(&discrepancy()), Resolution::Restore);
    }

    #[test]
    fn test_decide_asks_again_on_unknown_answer() {
        let mut p = prompt("maybe\nr\n");
        assert_eq!(p.decide(&discrepancy()), Resolution::Restore);
        let shown = String::from_utf8(p.output).unwrap();
        assert!(shown.contains("hash vault tampered"));
        assert!(shown.contains("please answer a, c or r"));
    }

    #[test]
    fn test_decide_aborts_on_end_of_input() {
        assert_eq!(prompt("").decide(&discrepancy()), Resolution::Abort);
    }

    #[test]
    fn test_credentials_read_user_then_password() {
        let credentials = prompt("admin\npw\n").credentials().unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password.expose_secret(), "pw");
        assert!(prompt("\n").credentials().is_none());
    }

    #[test]
    fn test_session_number_defaults_to_stored() {
        assert_eq!(prompt("\n").session_number_to_restore(Some(7)), Some(7));
        assert_eq!(prompt("12\n").session_number_to_restore(Some(7)), Some(12));
        assert_eq!(prompt("twelve\n").session_number_to_restore(None), None);
    }

    #[test]
    fn test_policy_prompt_repeats_resolution_and_login() {
        let mut policy = PolicyPrompt::new(
            Resolution::Restore,
            Some(("admin".to_string(), SecretString::from("pw".to_string()))),
        );
        assert_eq!(policy.decide(&discrepancy()), Resolution::Restore);
        assert_eq!(policy.credentials().unwrap().username, "admin");
        assert_eq!(policy.credentials().unwrap().username, "admin");
        assert!(PolicyPrompt::new(Resolution::Abort, None).credentials().is_none());
    }
}
