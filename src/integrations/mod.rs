use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::{
    error::RemoteError,
    models::{IssueId, IssuePatch, Milestone, NewIssue, RemoteRecord, StateFilter},
};

pub mod github;
pub mod memory;

/// The operations the reconciler needs from an issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Streams every issue matching `filter`. The stream ends after the last page.
    fn list_issues(&self, filter: StateFilter) -> BoxStream<'_, Result<RemoteRecord, RemoteError>>;

    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteRecord, RemoteError>;

    async fn update_issue(
        &self,
        id: IssueId,
        patch: &IssuePatch,
    ) -> Result<RemoteRecord, RemoteError>;

    async fn list_milestones(&self, filter: StateFilter) -> Result<Vec<Milestone>, RemoteError>;

    async fn create_milestone(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<Milestone, RemoteError>;

    async fn add_comment(&self, id: IssueId, text: &str) -> Result<(), RemoteError>;
}
