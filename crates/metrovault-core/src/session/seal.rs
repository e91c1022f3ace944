//! The persisted session counter and its digest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SessionContext, SessionSealError};
use crate::crypto::{Digester, digests_match};
use crate::persist::{self, Durability};
use crate::recovery::AuthorizedPrincipal;

/// Contents of the counter file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session number of the last login.
    pub number: u64,
    /// `digest(number)` under the session salt.
    pub hash: String,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
}

/// Result of reading the counter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterReading {
    /// No counter file: first run.
    Absent,
    /// The stored hash recomputes from the stored number.
    Valid(u64),
    /// The file was edited outside this API. `number` is `None` when the
    /// file could not even be parsed.
    Tampered {
        /// Stored number, if readable.
        number: Option<u64>,
    },
}

impl CounterReading {
    /// Stored number, if any.
    #[must_use]
    pub const fn number(self) -> Option<u64> {
        match self {
            Self::Absent => None,
            Self::Valid(n) => Some(n),
            Self::Tampered { number } => number,
        }
    }

    /// `false` only for [`CounterReading::Tampered`].
    #[must_use]
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Tampered { .. })
    }
}

/// Outcome of [`SessionSeal::increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// The current session number.
    pub number: u64,
    /// `false` when the per-process guard turned the call into a no-op.
    pub advanced: bool,
}

/// Rollback-resistant session counter.
///
/// The counter only moves forward by one per process, through
/// [`SessionSeal::increment`]. [`SessionSeal::restore`] is the single way to
/// set an arbitrary value and requires an [`AuthorizedPrincipal`].
#[derive(Debug, Clone)]
pub struct SessionSeal {
    path: PathBuf,
    digester: Digester,
}

impl SessionSeal {
    /// Creates a handle over the counter file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, digester: Digester) -> Self {
        Self {
            path: path.into(),
            digester,
        }
    }

    /// Counter file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn hash_of(&self, number: u64) -> String {
        self.digester.digest(number.to_string().as_bytes())
    }

    /// Reads and validates the counter. Never repairs it.
    pub fn read(&self) -> Result<CounterReading, SessionSealError> {
        let Some(bytes) = persist::read_optional(&self.path)? else {
            return Ok(CounterReading::Absent);
        };
        let record: SessionRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "session counter unreadable");
                return Ok(CounterReading::Tampered { number: None });
            },
        };
        if digests_match(&record.hash, &self.hash_of(record.number)) {
            Ok(CounterReading::Valid(record.number))
        } else {
            Ok(CounterReading::Tampered {
                number: Some(record.number),
            })
        }
    }

    /// Advances the counter by one, at most once per [`SessionContext`]
    /// guard.
    ///
    /// A second call before [`SessionContext::reset_guard`] returns the
    /// same number with `advanced == false`. A tampered counter is refused.
    pub fn increment(&self, ctx: &mut SessionContext) -> Result<IncrementOutcome, SessionSealError> {
        if let Some(number) = ctx.guarded_number() {
            tracing::debug!(number, "session counter already advanced in this process");
            return Ok(IncrementOutcome {
                number,
                advanced: false,
            });
        }

        let next = match self.read()? {
            CounterReading::Absent => 1,
            CounterReading::Valid(n) => n.checked_add(1).ok_or(SessionSealError::Overflow)?,
            CounterReading::Tampered { number } => {
                return Err(SessionSealError::Tampered { number });
            },
        };
        self.write(next)?;
        ctx.mark_incremented(next);
        tracing::info!(number = next, "session counter advanced");
        Ok(IncrementOutcome {
            number: next,
            advanced: true,
        })
    }

    /// Overwrites the counter with `number` and its fresh digest.
    pub fn restore(&self, number: u64, by: &AuthorizedPrincipal) -> Result<(), SessionSealError> {
        self.write(number)?;
        tracing::warn!(number, principal = %by.id(), "session counter restored");
        Ok(())
    }

    fn write(&self, number: u64) -> Result<(), SessionSealError> {
        let record = SessionRecord {
            number,
            hash: self.hash_of(number),
            timestamp: Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        persist::atomic_write(&self.path, &bytes, Durability::Forced)?;
        Ok(())
    }
}
