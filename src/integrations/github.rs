use async_trait::async_trait;
use futures_util::{
    stream::{self, BoxStream},
    StreamExt, TryStreamExt,
};
use octocrab::{
    models::{self, issues::Issue},
    params, Octocrab, Page,
};
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{ConfigurationError, RemoteError},
    integrations::IssueTracker,
    models::{
        IssueId, IssuePatch, IssueState, Milestone, MilestoneId, NewIssue, RemoteRecord,
        StateFilter,
    },
    settings::Github,
};

const PER_PAGE: u8 = 100;

/// GitHub REST API backend for a single repository.
#[derive(Clone)]
pub struct GithubTracker {
    octo: Octocrab,
    owner: String,
    repo: String,
}

impl GithubTracker {
    pub fn new(cfg: &Github, token: &str) -> Result<Self, ConfigurationError> {
        if cfg.owner.is_empty() || cfg.repo.is_empty() {
            return Err(ConfigurationError::InvalidRepository(format!(
                "{}/{}",
                cfg.owner, cfg.repo
            )));
        }

        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if let Some(url) = cfg.api_url.as_deref().filter(|url| !url.is_empty()) {
            builder = builder
                .base_uri(url)
                .map_err(|e| ConfigurationError::Client(e.to_string()))?;
        }
        let octo = builder
            .build()
            .map_err(|e| ConfigurationError::Client(e.to_string()))?;

        Ok(Self {
            octo,
            owner: cfg.owner.clone(),
            repo: cfg.repo.clone(),
        })
    }

    fn milestones_route(&self) -> String {
        format!("/repos/{}/{}/milestones", self.owner, self.repo)
    }
}

#[derive(Serialize)]
struct MilestoneQuery {
    state: &'static str,
    per_page: u8,
}

#[derive(Serialize)]
struct MilestoneCreate<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Deserialize)]
struct MilestoneBody {
    number: u64,
    title: String,
    description: Option<String>,
    state: Option<String>,
}

impl From<MilestoneBody> for Milestone {
    fn from(body: MilestoneBody) -> Self {
        Self {
            id: MilestoneId(body.number),
            title: body.title,
            description: body.description,
            state: milestone_state(body.state.as_deref()),
        }
    }
}

fn milestone_state(state: Option<&str>) -> IssueState {
    match state {
        Some("closed") => IssueState::Closed,
        _ => IssueState::Open,
    }
}

fn to_record(issue: Issue) -> RemoteRecord {
    RemoteRecord {
        id: IssueId(issue.number),
        key: issue.title,
        body: issue.body,
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        milestone: issue.milestone.map(|m| Milestone {
            id: MilestoneId(m.number as u64),
            title: m.title,
            description: m.description,
            state: milestone_state(m.state.as_deref()),
        }),
        state: match issue.state {
            models::IssueState::Closed => IssueState::Closed,
            _ => IssueState::Open,
        },
    }
}

fn classify(error: octocrab::Error) -> RemoteError {
    match &error {
        octocrab::Error::GitHub { source, .. } => {
            let already_exists = source
                .errors
                .iter()
                .flatten()
                .any(|e| e.get("code").and_then(|c| c.as_str()) == Some("already_exists"));
            RemoteError::from_status(source.status_code.as_u16(), &source.message, already_exists)
        }
        // The request may never have reached GitHub.
        octocrab::Error::Hyper { .. }
        | octocrab::Error::Service { .. }
        | octocrab::Error::Http { .. } => RemoteError::Transient(error.to_string()),
        // Encoding and decoding problems: a write may already have been applied.
        _ => RemoteError::Permanent(error.to_string()),
    }
}

#[async_trait]
impl IssueTracker for GithubTracker {
    fn list_issues(&self, filter: StateFilter) -> BoxStream<'_, Result<RemoteRecord, RemoteError>> {
        // Outer None: listing finished. Inner None: first page not fetched yet.
        let cursor: Option<Option<Page<Issue>>> = Some(None);
        stream::try_unfold(cursor, move |cursor| async move {
            let Some(previous) = cursor else {
                return Ok(None);
            };
            let mut page = match previous {
                None => {
                    let state = match filter {
                        StateFilter::Open => params::State::Open,
                        StateFilter::Closed => params::State::Closed,
                        StateFilter::All => params::State::All,
                    };
                    self
                        .octo
                        .issues(&self.owner, &self.repo)
                        .list()
                        .state(state)
                        .per_page(PER_PAGE)
                        .send()
                        .await
                        .map_err(classify)?
                }
                Some(previous) => match self
                    .octo
                    .get_page::<Issue>(&previous.next)
                    .await
                    .map_err(classify)?
                {
                    Some(page) => page,
                    None => return Ok(None),
                },
            };

            let items = std::mem::take(&mut page.items);
            debug!("github: fetched page of {} issues", items.len());
            let records = items
                .into_iter()
                .filter(|issue| issue.pull_request.is_none())
                .map(|issue| Ok(to_record(issue)))
                .collect::<Vec<_>>();
            let next = page.next.is_some().then_some(Some(page));

            Ok::<_, RemoteError>(Some((stream::iter(records), next)))
        })
        .try_flatten()
        .boxed()
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteRecord, RemoteError> {
        let handler = self.octo.issues(&self.owner, &self.repo);
        let mut builder = handler
            .create(issue.title.clone())
            .labels(issue.labels.clone())
            .milestone(issue.milestone.map(|m| m.0));
        if let Some(body) = &issue.body {
            builder = builder.body(body.clone());
        }

        let created = builder.send().await.map_err(classify)?;

        Ok(to_record(created))
    }

    async fn update_issue(
        &self,
        id: IssueId,
        patch: &IssuePatch,
    ) -> Result<RemoteRecord, RemoteError> {
        let handler = self.octo.issues(&self.owner, &self.repo);
        let mut builder = handler.update(id.0);
        if let Some(body) = &patch.body {
            builder = builder.body(body.as_str());
        }
        if let Some(labels) = &patch.labels {
            builder = builder.labels(labels.as_slice());
        }
        if let Some(milestone) = patch.milestone {
            builder = builder.milestone(milestone.0);
        }
        if let Some(state) = patch.state {
            builder = builder.state(match state {
                IssueState::Open => models::IssueState::Open,
                IssueState::Closed => models::IssueState::Closed,
            });
        }

        let updated = builder.send().await.map_err(classify)?;
        Ok(to_record(updated))
    }

    async fn list_milestones(&self, filter: StateFilter) -> Result<Vec<Milestone>, RemoteError> {
        let query = MilestoneQuery {
            state: match filter {
                StateFilter::Open => "open",
                StateFilter::Closed => "closed",
                StateFilter::All => "all",
            },
            per_page: PER_PAGE,
        };

        let first: Page<MilestoneBody> = self
            .octo
            .get(self.milestones_route(), Some(&query))
            .await
            .map_err(classify)?;
        let all = self.octo.all_pages(first).await.map_err(classify)?;

        Ok(all.into_iter().map(Milestone::from).collect())
    }

    async fn create_milestone(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<Milestone, RemoteError> {
        let created: MilestoneBody = self
            .octo
            .post(
                self.milestones_route(),
                Some(&MilestoneCreate { title, description }),
            )
            .await
            .map_err(classify)?;

        Ok(created.into())
    }

    async fn add_comment(&self, id: IssueId, text: &str) -> Result<(), RemoteError> {
        self.octo
            .issues(&self.owner, &self.repo)
            .create_comment(id.0, text)
            .await
            .map_err(classify)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::backtrace::Backtrace;

    use super::*;

    fn cfg(owner: &str, repo: &str) -> Github {
        Github {
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: String::new(),
            api_url: None,
        }
    }

    #[test]
    fn rejects_incomplete_repository() {
        let result = GithubTracker::new(&cfg("clickeatenda", ""), "token");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidRepository(_))
        ));
    }

    #[test]
    fn milestone_body_state_mapping() {
        let body = MilestoneBody {
            number: 7,
            title: "Sprint 9".to_string(),
            description: None,
            state: Some("closed".to_string()),
        };
        let milestone = Milestone::from(body);
        assert_eq!(milestone.id, MilestoneId(7));
        assert_eq!(milestone.state, IssueState::Closed);
    }

    #[test]
    fn decode_failures_are_not_retried() {
        let source = serde_json::from_str::<u64>("{").unwrap_err();
        let error = classify(octocrab::Error::Serde {
            source,
            backtrace: Backtrace::disabled(),
        });
        assert!(matches!(error, RemoteError::Permanent(_)));

        let error = classify(octocrab::Error::Other {
            source: "unexpected payload".into(),
            backtrace: Backtrace::disabled(),
        });
        assert!(matches!(error, RemoteError::Permanent(_)));
    }

    #[test]
    fn network_failures_are_transient() {
        let error = classify(octocrab::Error::Service {
            source: "connection reset by peer".into(),
            backtrace: Backtrace::disabled(),
        });
        assert!(error.is_transient());
    }

    #[test]
    fn embedded_milestone_keeps_its_state() {
        assert_eq!(milestone_state(Some("closed")), IssueState::Closed);
        assert_eq!(milestone_state(Some("open")), IssueState::Open);
        assert_eq!(milestone_state(None), IssueState::Open);
    }
}
