use std::fmt;

use serde_derive::Serialize;
use time::OffsetDateTime;

use crate::{error::RecordError, models::issue::IssueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal outcome of one desired record.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub key: String,
    pub action: Action,
    pub remote_id: Option<IssueId>,
    pub error: Option<String>,
    /// Remote write attempts, retries included.
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl ReconciliationResult {
    pub(crate) fn done(
        key: &str,
        action: Action,
        remote_id: Option<IssueId>,
        attempts: u32,
        started_at: OffsetDateTime,
    ) -> Self {
        Self {
            key: key.to_string(),
            action,
            remote_id,
            error: None,
            attempts,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    pub(crate) fn failed(
        key: &str,
        error: &RecordError,
        remote_id: Option<IssueId>,
        attempts: u32,
        started_at: OffsetDateTime,
    ) -> Self {
        Self {
            key: key.to_string(),
            action: Action::Failed,
            remote_id,
            error: Some(error.to_string()),
            attempts,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.action == Action::Failed
    }
}
