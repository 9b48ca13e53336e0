use std::{fmt::Write as _, fs, path::Path};

use anyhow::{Context, Result};
use itertools::Itertools;
use serde_derive::Serialize;
use time::OffsetDateTime;

use crate::models::{Action, ReconciliationResult};

/// Per-action totals of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_results(results: &[ReconciliationResult]) -> Self {
        let counts = results.iter().map(|r| r.action).counts();
        let count = |action| counts.get(&action).copied().unwrap_or(0);
        Self {
            created: count(Action::Created),
            updated: count(Action::Updated),
            skipped: count(Action::Skipped),
            failed: count(Action::Failed),
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Human readable summary: totals, then one line per failed record.
pub fn render(summary: &Summary, results: &[ReconciliationResult], dry_run: bool) -> String {
    let mut out = String::new();
    let title = if dry_run {
        "Reconciliation summary (dry run, nothing was written)"
    } else {
        "Reconciliation summary"
    };
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "-".repeat(title.len()));
    for (name, count) in [
        ("created", summary.created),
        ("updated", summary.updated),
        ("skipped", summary.skipped),
        ("failed", summary.failed),
    ] {
        let _ = writeln!(out, "{name:<10}{count:>6}");
    }
    let _ = writeln!(out, "{:<10}{:>6}", "total", summary.total());

    if summary.has_failures() {
        let _ = writeln!(out, "\nFailed records:");
        for result in results.iter().filter(|r| r.is_failed()) {
            let id = result
                .remote_id
                .map(|id| format!(" ({id})"))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                " - {}{id}: {}",
                result.key,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    out
}

/// Everything a downstream consumer needs about one run.
#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub repository: String,
    pub dry_run: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub summary: Summary,
    pub records: &'a [ReconciliationResult],
}

pub fn write_json(path: impl AsRef<Path>, report: &RunReport<'_>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(report).context("serializing run report")?;
    fs::write(path, json).with_context(|| format!("writing run report to {}", path.display()))?;
    Ok(())
}
