//! Turns a Markdown roadmap into desired records.
//!
//! `### Section` headings group items. A line naming `Prioridade Alta`,
//! `Prioridade Média` or `Prioridade Baixa` (or an English `## High Priority`
//! heading) sets the priority of what follows, and checklist items become issues:
//!
//! ```text
//! - [ ] todo    - [x] done    - [~] in progress    - [!] blocked
//! ```

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{DesiredRecord, IssueState};

const DEFAULT_PRIORITY: &str = "média";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Todo,
    InProgress,
    Blocked,
    Done,
}

impl Status {
    fn from_marker(marker: &str) -> Self {
        match marker {
            "x" | "X" => Self::Done,
            "~" => Self::InProgress,
            "!" => Self::Blocked,
            _ => Self::Todo,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Todo => "status/todo",
            Self::InProgress => "status/in-progress",
            Self::Blocked => "status/blocked",
            Self::Done => "status/done",
        }
    }
}

fn slug(text: &str) -> String {
    text.trim().to_lowercase().replace(' ', "-")
}

pub fn parse(markdown: &str) -> Vec<DesiredRecord> {
    lazy_static! {
        static ref ITEM: Regex = Regex::new(r"^\s*- \[([ xX~!])\]\s*(.+?)\s*$").unwrap();
        static ref PRIORIDADE: Regex =
            Regex::new(r"(?i)\bprioridade\s+(alta|m[ée]dia|baixa)\b").unwrap();
        static ref PRIORITY: Regex =
            Regex::new(r"(?i)^##\s+(?:.*?\bpriority\W+(\w+)|.*?(\w+)\s+priority\b)").unwrap();
    }

    let mut section: Option<&str> = None;
    let mut priority = DEFAULT_PRIORITY.to_string();
    let mut records = Vec::new();

    for line in markdown.lines() {
        let level = PRIORIDADE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .or_else(|| {
                PRIORITY
                    .captures(line)
                    .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
            });
        if let Some(level) = level {
            priority = level.as_str().to_lowercase();
        }
        if let Some(heading) = line.strip_prefix("### ") {
            section = Some(heading.trim());
            continue;
        }
        // Items before the first section have nothing to group them under.
        let (Some(section), Some(caps)) = (section, ITEM.captures(line)) else {
            continue;
        };

        let status = Status::from_marker(&caps[1]);
        let text = caps[2].to_string();
        let state = if status == Status::Done {
            IssueState::Closed
        } else {
            IssueState::Open
        };

        records.push(
            DesiredRecord::new(text.clone())
                .body(format!(
                    "**Section:** {section}\n**Priority:** {priority}\n\n{text}"
                ))
                .labels([
                    format!("priority/{priority}"),
                    status.label().to_string(),
                    format!("section/{}", slug(section)),
                ])
                .state(state),
        );
    }

    records
}
