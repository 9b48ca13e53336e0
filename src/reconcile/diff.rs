use std::collections::BTreeSet;

use crate::models::{
    DesiredRecord, IssueId, IssuePatch, IssueState, MilestoneId, NewIssue, RemoteRecord,
};

/// Where a desired milestone title points to on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneTarget {
    Unmanaged,
    Existing(MilestoneId),
    /// Does not exist yet and is not going to be created (dry run).
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// `close` is set when the new issue has to be closed right after creation.
    Create { issue: NewIssue, close: bool },
    Update { id: IssueId, patch: IssuePatch },
    Skip { id: IssueId },
}

/// GitHub hands bodies back with CRLF line endings.
fn normalize_body(body: &str) -> String {
    body.replace("\r\n", "\n").trim().to_string()
}

/// GitHub matches label names case-insensitively and keeps the existing casing.
fn same_labels(desired: &BTreeSet<String>, remote: &BTreeSet<String>) -> bool {
    let fold = |labels: &BTreeSet<String>| {
        labels
            .iter()
            .map(|l| l.to_lowercase())
            .collect::<BTreeSet<_>>()
    };
    fold(desired) == fold(remote)
}

/// Compares every managed field of `desired` against `remote` and decides what to do.
pub fn plan(
    desired: &DesiredRecord,
    remote: Option<&RemoteRecord>,
    milestone: MilestoneTarget,
) -> Plan {
    let fields = &desired.fields;
    let Some(remote) = remote else {
        return Plan::Create {
            issue: NewIssue {
                title: desired.key.clone(),
                body: fields.body.clone(),
                labels: fields
                    .labels
                    .iter()
                    .flatten()
                    .cloned()
                    .collect(),
                milestone: match milestone {
                    MilestoneTarget::Existing(id) => Some(id),
                    _ => None,
                },
            },
            close: fields.state == Some(IssueState::Closed),
        };
    };

    let mut patch = IssuePatch::default();

    if let Some(body) = &fields.body {
        let current = remote.body.as_deref().unwrap_or_default();
        if normalize_body(body) != normalize_body(current) {
            patch.body = Some(body.clone());
        }
    }

    if let Some(labels) = &fields.labels {
        if !same_labels(labels, &remote.labels) {
            patch.labels = Some(labels.iter().cloned().collect());
        }
    }

    let current_milestone = remote.milestone.as_ref().map(|m| m.id);
    // Nothing to point at until the milestone exists, but it is still a change.
    let pending_milestone = milestone == MilestoneTarget::Pending;
    if let MilestoneTarget::Existing(id) = milestone {
        if current_milestone != Some(id) {
            patch.milestone = Some(id);
        }
    }

    if let Some(state) = fields.state {
        if state != remote.state {
            patch.state = Some(state);
        }
    }

    if patch.is_empty() && !pending_milestone {
        Plan::Skip { id: remote.id }
    } else {
        Plan::Update {
            id: remote.id,
            patch,
        }
    }
}
