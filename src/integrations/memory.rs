//! In-memory issue tracker used by the reconciler tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use crate::{
    error::RemoteError,
    integrations::IssueTracker,
    models::{
        IssueId, IssuePatch, IssueState, Milestone, MilestoneId, NewIssue, RemoteRecord,
        StateFilter,
    },
};

/// Which write an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Write {
    Create,
    Update,
}

#[derive(Debug, Default)]
struct State {
    issues: Vec<RemoteRecord>,
    milestones: Vec<Milestone>,
    comments: Vec<(IssueId, String)>,
    /// Errors handed out, in order, to writes targeting a title.
    failures: HashMap<(Write, String), VecDeque<RemoteError>>,
    stale_milestone_listings: usize,
    listing_failure: Option<RemoteError>,
    creates: usize,
    updates: usize,
    milestone_creates: usize,
}

#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: Mutex<State>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the rest of the test.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seeds an issue and returns its number.
    pub fn insert_issue(
        &self,
        title: &str,
        labels: &[&str],
        milestone: Option<&str>,
        state: IssueState,
    ) -> IssueId {
        let mut st = self.state();
        let milestone = milestone.map(|title| ensure_milestone(&mut st, title));
        let id = IssueId(st.issues.len() as u64 + 1);
        st.issues.push(RemoteRecord {
            id,
            key: title.to_string(),
            body: None,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            milestone,
            state,
        });
        id
    }

    pub fn insert_milestone(&self, title: &str) -> MilestoneId {
        ensure_milestone(&mut self.state(), title).id
    }

    /// Queues errors for the next `write` calls against `title`.
    pub fn fail_next(
        &self,
        write: Write,
        title: &str,
        errors: impl IntoIterator<Item = RemoteError>,
    ) {
        self.state()
            .failures
            .entry((write, title.to_string()))
            .or_default()
            .extend(errors);
    }

    /// Makes the next issue listing fail with `error` after the first issue.
    pub fn fail_listing(&self, error: RemoteError) {
        self.state().listing_failure = Some(error);
    }

    /// Makes the next `count` milestone listings come back empty.
    pub fn lag_milestone_listing(&self, count: usize) {
        self.state().stale_milestone_listings = count;
    }

    pub fn issues(&self) -> Vec<RemoteRecord> {
        self.state().issues.clone()
    }

    pub fn issue_titled(&self, title: &str) -> Option<RemoteRecord> {
        self.state().issues.iter().find(|i| i.key == title).cloned()
    }

    pub fn milestones(&self) -> Vec<Milestone> {
        self.state().milestones.clone()
    }

    pub fn comments(&self) -> Vec<(IssueId, String)> {
        self.state().comments.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state().creates
    }

    pub fn update_calls(&self) -> usize {
        self.state().updates
    }

    pub fn milestone_create_calls(&self) -> usize {
        self.state().milestone_creates
    }
}

fn ensure_milestone(st: &mut State, title: &str) -> Milestone {
    if let Some(existing) = st.milestones.iter().find(|m| m.title == title) {
        return existing.clone();
    }
    let milestone = Milestone {
        id: MilestoneId(st.milestones.len() as u64 + 1),
        title: title.to_string(),
        description: None,
        state: IssueState::Open,
    };
    st.milestones.push(milestone.clone());
    milestone
}

fn take_failure(st: &mut State, write: Write, title: &str) -> Result<(), RemoteError> {
    match st
        .failures
        .get_mut(&(write, title.to_string()))
        .and_then(VecDeque::pop_front)
    {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn matches_filter(state: IssueState, filter: StateFilter) -> bool {
    match filter {
        StateFilter::All => true,
        StateFilter::Open => state == IssueState::Open,
        StateFilter::Closed => state == IssueState::Closed,
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    fn list_issues(&self, filter: StateFilter) -> BoxStream<'_, Result<RemoteRecord, RemoteError>> {
        let mut st = self.state();
        let mut snapshot = st
            .issues
            .iter()
            .filter(|issue| matches_filter(issue.state, filter))
            .cloned()
            .map(Ok)
            .collect::<Vec<_>>();
        if let Some(error) = st.listing_failure.take() {
            snapshot.insert(snapshot.len().min(1), Err(error));
        }
        stream::iter(snapshot).boxed()
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteRecord, RemoteError> {
        let mut st = self.state();
        st.creates += 1;
        take_failure(&mut st, Write::Create, &issue.title)?;

        let milestone = match issue.milestone {
            Some(id) => Some(
                st.milestones
                    .iter()
                    .find(|m| m.id == id)
                    .cloned()
                    .ok_or_else(|| RemoteError::Permanent(format!("no milestone {}", id.0)))?,
            ),
            None => None,
        };
        let record = RemoteRecord {
            id: IssueId(st.issues.len() as u64 + 1),
            key: issue.title.clone(),
            body: issue.body.clone(),
            labels: issue.labels.iter().cloned().collect(),
            milestone,
            state: IssueState::Open,
        };
        st.issues.push(record.clone());
        Ok(record)
    }

    async fn update_issue(
        &self,
        id: IssueId,
        patch: &IssuePatch,
    ) -> Result<RemoteRecord, RemoteError> {
        let mut st = self.state();
        st.updates += 1;
        let title = st
            .issues
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.key.clone())
            .ok_or_else(|| RemoteError::Permanent(format!("no issue {id}")))?;
        take_failure(&mut st, Write::Update, &title)?;

        let milestone = match patch.milestone {
            Some(mid) => Some(
                st.milestones
                    .iter()
                    .find(|m| m.id == mid)
                    .cloned()
                    .ok_or_else(|| RemoteError::Permanent(format!("no milestone {}", mid.0)))?,
            ),
            None => None,
        };
        let Some(issue) = st.issues.iter_mut().find(|i| i.id == id) else {
            return Err(RemoteError::Permanent(format!("no issue {id}")));
        };
        if let Some(body) = &patch.body {
            issue.body = Some(body.clone());
        }
        if let Some(labels) = &patch.labels {
            issue.labels = labels.iter().cloned().collect();
        }
        if milestone.is_some() {
            issue.milestone = milestone;
        }
        if let Some(state) = patch.state {
            issue.state = state;
        }
        Ok(issue.clone())
    }

    async fn list_milestones(&self, filter: StateFilter) -> Result<Vec<Milestone>, RemoteError> {
        let mut st = self.state();
        if st.stale_milestone_listings > 0 {
            st.stale_milestone_listings -= 1;
            return Ok(Vec::new());
        }
        Ok(st
            .milestones
            .iter()
            .filter(|m| matches_filter(m.state, filter))
            .cloned()
            .collect())
    }

    async fn create_milestone(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<Milestone, RemoteError> {
        let mut st = self.state();
        st.milestone_creates += 1;
        if st.milestones.iter().any(|m| m.title == title) {
            return Err(RemoteError::AlreadyExists(format!("milestone '{title}'")));
        }
        let mut milestone = ensure_milestone(&mut st, title);
        milestone.description = description.map(str::to_string);
        if let Some(stored) = st.milestones.iter_mut().find(|m| m.id == milestone.id) {
            stored.description = milestone.description.clone();
        }
        Ok(milestone)
    }

    async fn add_comment(&self, id: IssueId, text: &str) -> Result<(), RemoteError> {
        let mut st = self.state();
        if !st.issues.iter().any(|i| i.id == id) {
            return Err(RemoteError::Permanent(format!("no issue {id}")));
        }
        st.comments.push((id, text.to_string()));
        Ok(())
    }
}
