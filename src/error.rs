use std::path::PathBuf;

use itertools::Itertools;
use thiserror::Error;

/// Problems found before any remote call is made. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no GitHub token configured, set GITHUB_TOKEN or ISSUESYNC__GITHUB__TOKEN")]
    MissingCredential,
    #[error("invalid repository '{0}', expected both github.owner and github.repo")]
    InvalidRepository(String),
    #[error("could not load settings: {0}")]
    Settings(#[from] config::ConfigError),
    #[error("could not read desired-state table {path}: {reason}")]
    Table { path: PathBuf, reason: String },
    #[error("could not build GitHub client: {0}")]
    Client(String),
}

/// Failure of a single call against the issue tracker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network trouble, timeouts, 5xx and rate limiting. Worth retrying.
    #[error("transient remote error: {0}")]
    Transient(String),
    /// Rejected by the remote (validation, permissions, missing resource).
    #[error("permanent remote error: {0}")]
    Permanent(String),
    #[error("remote resource already exists: {0}")]
    AlreadyExists(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Maps an HTTP status and message returned by the tracker onto the taxonomy.
    pub fn from_status(status: u16, message: &str, already_exists: bool) -> Self {
        let detail = format!("HTTP {status}: {message}");
        match status {
            422 if already_exists => Self::AlreadyExists(detail),
            429 => Self::Transient(detail),
            403 if message.to_lowercase().contains("rate limit") => Self::Transient(detail),
            500..=599 => Self::Transient(detail),
            _ => Self::Permanent(detail),
        }
    }
}

/// Why a single desired record ended up `failed`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("ambiguous match: {} remote issues share this title ({})", .ids.len(), format_ids(.ids))]
    AmbiguousMatch { ids: Vec<u64> },
    #[error("duplicate key in desired-state table")]
    DuplicateDesiredKey,
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("issue #{id} was written but not fully reconciled: {source}")]
    PartiallyApplied { id: u64, source: RemoteError },
}

fn format_ids(ids: &[u64]) -> String {
    ids.iter().map(|id| format!("#{id}")).join(", ")
}

/// Failures of the read phase that stop a run before anything is written.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("could not list remote issues: {0}")]
    Index(RemoteError),
    #[error("could not list remote milestones: {0}")]
    Milestones(RemoteError),
}
