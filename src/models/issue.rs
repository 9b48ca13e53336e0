use std::{collections::BTreeSet, fmt};

use serde_derive::{Deserialize, Serialize};

/// Issue number as assigned by the tracker. Stable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub u64);

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Milestone number as assigned by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilestoneId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
}

impl fmt::Display for IssueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Open,
    Closed,
    All,
}

/// Attributes a desired record manages. `None` leaves the attribute alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFields {
    pub body: Option<String>,
    pub labels: Option<BTreeSet<String>>,
    pub milestone: Option<String>,
    pub state: Option<IssueState>,
}

/// One issue the operator wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRecord {
    pub key: String,
    pub fields: IssueFields,
    /// Posted whenever this record causes a write.
    pub comment: Option<String>,
}

impl DesiredRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: IssueFields::default(),
            comment: None,
        }
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.fields.body = Some(body.into());
        self
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn milestone(mut self, milestone: impl Into<String>) -> Self {
        self.fields.milestone = Some(milestone.into());
        self
    }

    pub fn state(mut self, state: IssueState) -> Self {
        self.fields.state = Some(state);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub title: String,
    pub description: Option<String>,
    pub state: IssueState,
}

/// An issue as last observed on the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub id: IssueId,
    pub key: String,
    pub body: Option<String>,
    pub labels: BTreeSet<String>,
    pub milestone: Option<Milestone>,
    pub state: IssueState,
}

/// Payload for creating an issue. New issues always start open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewIssue {
    pub title: String,
    pub body: Option<String>,
    pub labels: Vec<String>,
    pub milestone: Option<MilestoneId>,
}

/// Changed fields only; labels replace the whole set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuePatch {
    pub body: Option<String>,
    pub labels: Option<Vec<String>>,
    pub milestone: Option<MilestoneId>,
    pub state: Option<IssueState>,
}

impl IssuePatch {
    pub fn is_empty(&self) -> bool {
        self.body.is_none()
            && self.labels.is_none()
            && self.milestone.is_none()
            && self.state.is_none()
    }

    pub fn state(state: IssueState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }
}
