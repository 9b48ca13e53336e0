use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
};

use config::{Config, File};
use serde_derive::Deserialize;
use tracing::info;

use crate::{
    error::ConfigurationError,
    models::{DesiredRecord, IssueFields, IssueState},
    roadmap,
};

#[derive(Debug, Deserialize)]
struct IssueEntry {
    title: String,
    body: Option<String>,
    labels: Option<Vec<String>>,
    milestone: Option<String>,
    state: Option<IssueState>,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MilestoneEntry {
    title: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableFile {
    #[serde(default)]
    issues: Vec<IssueEntry>,
    #[serde(default)]
    milestones: Vec<MilestoneEntry>,
}

impl From<IssueEntry> for DesiredRecord {
    fn from(entry: IssueEntry) -> Self {
        Self {
            key: entry.title,
            fields: IssueFields {
                body: entry.body,
                labels: entry.labels.map(|labels| labels.into_iter().collect::<BTreeSet<_>>()),
                milestone: entry.milestone,
                state: entry.state,
            },
            comment: entry.comment,
        }
    }
}

/// The records a run should bring about, plus descriptions for milestones it may create.
#[derive(Debug, Default)]
pub struct DesiredTable {
    pub records: Vec<DesiredRecord>,
    pub milestone_descriptions: HashMap<String, String>,
}

impl DesiredTable {
    /// Loads a table file. `.md` files are read as roadmaps, anything else goes
    /// through `config` and is picked by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let table_error = |reason: String| ConfigurationError::Table {
            path: path.to_path_buf(),
            reason,
        };

        let is_markdown = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));

        let table = if is_markdown {
            let text = fs::read_to_string(path).map_err(|e| table_error(e.to_string()))?;
            Self {
                records: roadmap::parse(&text),
                milestone_descriptions: HashMap::new(),
            }
        } else {
            let file: TableFile = Config::builder()
                .add_source(File::from(path))
                .build()
                .and_then(Config::try_deserialize)
                .map_err(|e| table_error(e.to_string()))?;
            Self {
                records: file.issues.into_iter().map(DesiredRecord::from).collect(),
                milestone_descriptions: file
                    .milestones
                    .into_iter()
                    .filter_map(|m| m.description.map(|d| (m.title, d)))
                    .collect(),
            }
        };

        info!(
            "table: {} desired records loaded from {}",
            table.records.len(),
            path.display()
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_table(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_toml_table() {
        let file = write_table(
            ".toml",
            r#"
[[issues]]
title = "Migrate credentials to secure storage"
body = "Use flutter_secure_storage for credentials"
labels = ["priority/alta", "status/todo"]
milestone = "Sprint 1: Security"

[[issues]]
title = "Subtitles via Jellyfin"
state = "closed"
comment = "Implemented through the Jellyfin integration."

[[milestones]]
title = "Sprint 1: Security"
description = "Hardening before release"
"#,
        );

        let table = DesiredTable::load(file.path()).unwrap();

        assert_eq!(table.records.len(), 2);
        let first = &table.records[0];
        assert_eq!(first.key, "Migrate credentials to secure storage");
        assert_eq!(
            first.fields.labels,
            Some(BTreeSet::from([
                "priority/alta".to_string(),
                "status/todo".to_string()
            ]))
        );
        assert_eq!(first.fields.milestone.as_deref(), Some("Sprint 1: Security"));
        assert_eq!(first.fields.state, None);

        let second = &table.records[1];
        assert_eq!(second.fields.state, Some(IssueState::Closed));
        assert_eq!(second.fields.labels, None);
        assert!(second.comment.is_some());

        assert_eq!(
            table
                .milestone_descriptions
                .get("Sprint 1: Security")
                .map(String::as_str),
            Some("Hardening before release")
        );
    }

    #[test]
    fn loads_markdown_roadmap() {
        let file = write_table(".md", "### Player\n- [x] 4K playback\n- [ ] Audio track picker\n");

        let table = DesiredTable::load(file.path()).unwrap();

        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].fields.state, Some(IssueState::Closed));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let result = DesiredTable::load("/nonexistent/issues.toml");
        assert!(matches!(result, Err(ConfigurationError::Table { .. })));
    }
}
