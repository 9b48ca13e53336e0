//! Brings a remote issue collection in line with a desired-state table.
//!
//! A run lists the remote issues once, resolves milestones through a shared
//! cache, then plans and applies every desired record on its own. A failing
//! record is recorded and never stops the others. Running the same table
//! again only touches what is still out of line.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use futures_util::{stream, StreamExt};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::{
    error::{ReconcileError, RecordError},
    integrations::IssueTracker,
    models::{Action, DesiredRecord, IssueId, IssuePatch, IssueState, ReconciliationResult},
    reconcile::{
        diff::Plan,
        index::{Match, RemoteIndex},
        milestones::MilestoneResolver,
        retry::RetryPolicy,
    },
};

pub mod diff;
pub mod index;
pub mod milestones;
pub mod retry;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub retry: RetryPolicy,
    /// Upper bound for every single remote call.
    pub call_timeout: Duration,
    /// Records in flight at once.
    pub concurrency: usize,
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            concurrency: 4,
            dry_run: false,
        }
    }
}

pub struct Reconciler<T> {
    tracker: T,
    options: ReconcileOptions,
    milestone_descriptions: HashMap<String, String>,
}

impl<T: IssueTracker> Reconciler<T> {
    pub fn new(tracker: T, options: ReconcileOptions) -> Self {
        Self {
            tracker,
            options,
            milestone_descriptions: HashMap::new(),
        }
    }

    /// Descriptions used when a milestone has to be created.
    pub fn with_milestone_descriptions(mut self, descriptions: HashMap<String, String>) -> Self {
        self.milestone_descriptions = descriptions;
        self
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Reconciles every record and returns one result per record, in table order.
    pub async fn run(
        &self,
        desired: &[DesiredRecord],
    ) -> Result<Vec<ReconciliationResult>, ReconcileError> {
        let index = RemoteIndex::build(&self.tracker, self.options.call_timeout)
            .await
            .map_err(ReconcileError::Index)?;
        let milestones = MilestoneResolver::load(
            &self.tracker,
            &self.options.retry,
            self.options.call_timeout,
            self.options.dry_run,
            &self.milestone_descriptions,
        )
        .await
        .map_err(ReconcileError::Milestones)?;

        info!(
            "reconciling {} desired records against {} remote issues{}",
            desired.len(),
            index.len(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        let mut seen = HashSet::new();
        let jobs = desired
            .iter()
            .enumerate()
            .map(|(position, record)| (position, record, !seen.insert(record.key.as_str())))
            .collect::<Vec<_>>();

        let index = &index;
        let milestones = &milestones;
        let mut results = stream::iter(jobs)
            .map(move |(position, record, duplicate)| async move {
                let result = self
                    .reconcile_one(index, milestones, record, duplicate)
                    .await;
                (position, result)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        results.sort_by_key(|(position, _)| *position);
        Ok(results.into_iter().map(|(_, result)| result).collect())
    }

    async fn reconcile_one(
        &self,
        index: &RemoteIndex,
        milestones: &MilestoneResolver<'_>,
        record: &DesiredRecord,
        duplicate: bool,
    ) -> ReconciliationResult {
        let started_at = OffsetDateTime::now_utc();
        let mut attempts = 0;
        let mut remote_id = None;

        let outcome = if duplicate {
            Err(RecordError::DuplicateDesiredKey)
        } else {
            self.apply(index, milestones, record, &mut attempts, &mut remote_id)
                .await
        };

        match outcome {
            Ok(action) => {
                let id = remote_id.map(|id| format!(" {id}")).unwrap_or_default();
                let dry = if self.options.dry_run { " (dry run)" } else { "" };
                info!("{action}{dry}: {}{id}", record.key);
                ReconciliationResult::done(&record.key, action, remote_id, attempts, started_at)
            }
            Err(error) => {
                warn!("failed: {}: {error}", record.key);
                ReconciliationResult::failed(&record.key, &error, remote_id, attempts, started_at)
            }
        }
    }

    async fn apply(
        &self,
        index: &RemoteIndex,
        milestones: &MilestoneResolver<'_>,
        record: &DesiredRecord,
        attempts: &mut u32,
        remote_id: &mut Option<IssueId>,
    ) -> Result<Action, RecordError> {
        let remote = match index.lookup(&record.key) {
            Match::Ambiguous(ids) => {
                return Err(RecordError::AmbiguousMatch {
                    ids: ids.iter().map(|id| id.0).collect(),
                })
            }
            Match::One(remote) => {
                *remote_id = Some(remote.id);
                Some(remote)
            }
            Match::Missing => None,
        };

        let milestone = milestones
            .resolve(record.fields.milestone.as_deref(), attempts)
            .await?;
        let plan = diff::plan(record, remote, milestone);
        debug!("{}: {plan:?}", record.key);

        let retry = &self.options.retry;
        let call_timeout = self.options.call_timeout;

        match plan {
            Plan::Skip { .. } => Ok(Action::Skipped),
            Plan::Create { .. } if self.options.dry_run => Ok(Action::Created),
            Plan::Update { .. } if self.options.dry_run => Ok(Action::Updated),
            Plan::Create { issue, close } => {
                let created = retry
                    .run("create issue", call_timeout, attempts, || {
                        self.tracker.create_issue(&issue)
                    })
                    .await?;
                let id = created.id;
                *remote_id = Some(id);

                if close {
                    let patch = IssuePatch::state(IssueState::Closed);
                    retry
                        .run("close issue", call_timeout, attempts, || {
                            self.tracker.update_issue(id, &patch)
                        })
                        .await
                        .map_err(|source| RecordError::PartiallyApplied { id: id.0, source })?;
                }

                self.post_comment(record, id, attempts).await?;
                Ok(Action::Created)
            }
            Plan::Update { id, patch } => {
                retry
                    .run("update issue", call_timeout, attempts, || {
                        self.tracker.update_issue(id, &patch)
                    })
                    .await?;

                self.post_comment(record, id, attempts).await?;
                Ok(Action::Updated)
            }
        }
    }

    async fn post_comment(
        &self,
        record: &DesiredRecord,
        id: IssueId,
        attempts: &mut u32,
    ) -> Result<(), RecordError> {
        let Some(comment) = record.comment.as_deref() else {
            return Ok(());
        };

        self.options
            .retry
            .run("comment", self.options.call_timeout, attempts, || {
                self.tracker.add_comment(id, comment)
            })
            .await
            .map_err(|source| RecordError::PartiallyApplied { id: id.0, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::RemoteError,
        integrations::memory::{MemoryTracker, Write},
        models::IssueState,
    };

    fn reconciler(tracker: MemoryTracker) -> Reconciler<MemoryTracker> {
        Reconciler::new(
            tracker,
            ReconcileOptions {
                retry: RetryPolicy::immediate(3),
                ..ReconcileOptions::default()
            },
        )
    }

    fn add_logging() -> DesiredRecord {
        DesiredRecord::new("Add logging")
            .labels(["bug"])
            .state(IssueState::Open)
    }

    fn actions(results: &[ReconciliationResult]) -> Vec<Action> {
        results.iter().map(|r| r.action).collect()
    }

    #[tokio::test]
    async fn creates_missing_issue_in_empty_repository() {
        let engine = reconciler(MemoryTracker::new());

        let results = engine.run(&[add_logging()]).await.unwrap();

        assert_eq!(actions(&results), vec![Action::Created]);
        let issues = engine.tracker().issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].key, "Add logging");
        assert!(issues[0].labels.contains("bug"));
        assert_eq!(results[0].remote_id, Some(issues[0].id));
    }

    #[tokio::test]
    async fn second_run_skips_everything() {
        let engine = reconciler(MemoryTracker::new());
        let table = vec![
            add_logging(),
            DesiredRecord::new("Certificate pinning")
                .body("Pin the API certificates")
                .labels(["priority/alta", "status/todo"])
                .milestone("Sprint 1: Security"),
            DesiredRecord::new("Remove .env from history").state(IssueState::Closed),
        ];

        let first = engine.run(&table).await.unwrap();
        assert!(first.iter().all(|r| r.action == Action::Created));

        let second = engine.run(&table).await.unwrap();
        assert_eq!(actions(&second), vec![Action::Skipped; 3]);
        assert_eq!(engine.tracker().create_calls(), 3);
    }

    #[tokio::test]
    async fn existing_issue_is_relabelled_and_closed() {
        let tracker = MemoryTracker::new();
        let id = tracker.insert_issue(
            "Firestick optimization",
            &["feature", "em andamento"],
            None,
            IssueState::Open,
        );
        let engine = reconciler(tracker);
        let table = vec![DesiredRecord::new("Firestick optimization")
            .labels(["status/done", "melhoria"])
            .state(IssueState::Closed)];

        let results = engine.run(&table).await.unwrap();

        assert_eq!(actions(&results), vec![Action::Updated]);
        assert_eq!(results[0].remote_id, Some(id));
        let issue = engine.tracker().issue_titled("Firestick optimization").unwrap();
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(
            issue.labels.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["melhoria", "status/done"]
        );
    }

    #[tokio::test]
    async fn results_account_for_every_record() {
        let tracker = MemoryTracker::new();
        tracker.insert_issue("Already fine", &["bug"], None, IssueState::Open);
        tracker.insert_issue("Needs label", &[], None, IssueState::Open);
        tracker.insert_issue("Twice", &[], None, IssueState::Open);
        tracker.insert_issue("Twice", &[], None, IssueState::Open);
        let engine = reconciler(tracker);
        let table = vec![
            DesiredRecord::new("Already fine").labels(["bug"]),
            DesiredRecord::new("Needs label").labels(["bug"]),
            DesiredRecord::new("Brand new"),
            DesiredRecord::new("Twice"),
        ];

        let results = engine.run(&table).await.unwrap();

        assert_eq!(results.len(), table.len());
        assert_eq!(
            actions(&results),
            vec![
                Action::Skipped,
                Action::Updated,
                Action::Created,
                Action::Failed
            ]
        );
        for (result, record) in results.iter().zip(&table) {
            assert_eq!(result.key, record.key);
        }
    }

    #[tokio::test]
    async fn permanent_failure_is_isolated() {
        let tracker = MemoryTracker::new();
        tracker.fail_next(
            Write::Create,
            "Broken",
            [RemoteError::Permanent("HTTP 422: Validation Failed".to_string())],
        );
        let engine = reconciler(tracker);
        let table = vec![
            DesiredRecord::new("Before"),
            DesiredRecord::new("Broken"),
            DesiredRecord::new("After"),
        ];

        let results = engine.run(&table).await.unwrap();

        assert_eq!(
            actions(&results),
            vec![Action::Created, Action::Failed, Action::Created]
        );
        assert_eq!(results[1].attempts, 1);
        assert!(results[1].error.as_deref().unwrap().contains("Validation Failed"));
    }

    #[tokio::test]
    async fn duplicate_remote_titles_fail_as_ambiguous() {
        let tracker = MemoryTracker::new();
        tracker.insert_issue("EPG cache", &[], None, IssueState::Open);
        tracker.insert_issue("EPG cache", &[], None, IssueState::Closed);
        let engine = reconciler(tracker);

        let results = engine
            .run(&[DesiredRecord::new("EPG cache").labels(["bug"])])
            .await
            .unwrap();

        assert_eq!(actions(&results), vec![Action::Failed]);
        assert!(results[0].error.as_deref().unwrap().starts_with("ambiguous match"));
        assert_eq!(results[0].remote_id, None);
        assert_eq!(engine.tracker().update_calls(), 0);
    }

    #[tokio::test]
    async fn shared_missing_milestone_is_created_once() {
        let engine = reconciler(MemoryTracker::new());
        let table = (0..6)
            .map(|n| DesiredRecord::new(format!("Filter {n}")).milestone("Sprint 9"))
            .collect::<Vec<_>>();

        let results = engine.run(&table).await.unwrap();

        assert!(results.iter().all(|r| r.action == Action::Created));
        assert_eq!(engine.tracker().milestone_create_calls(), 1);
        let milestones = engine.tracker().milestones();
        assert_eq!(milestones.len(), 1);
        for issue in engine.tracker().issues() {
            assert_eq!(issue.milestone.as_ref().map(|m| m.id), Some(milestones[0].id));
        }
    }

    #[tokio::test]
    async fn record_is_assigned_to_new_sprint_milestone() {
        let engine = reconciler(MemoryTracker::new());

        let results = engine
            .run(&[DesiredRecord::new("Notify favourite show").milestone("Sprint 9")])
            .await
            .unwrap();

        assert_eq!(actions(&results), vec![Action::Created]);
        let issue = engine.tracker().issue_titled("Notify favourite show").unwrap();
        assert_eq!(issue.milestone.map(|m| m.title).as_deref(), Some("Sprint 9"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_bound() {
        let tracker = MemoryTracker::new();
        tracker.fail_next(
            Write::Create,
            "Flaky",
            [
                RemoteError::Transient("HTTP 502: Bad Gateway".to_string()),
                RemoteError::Transient("connection reset".to_string()),
            ],
        );
        let engine = reconciler(tracker);

        let results = engine.run(&[DesiredRecord::new("Flaky")]).await.unwrap();

        assert_eq!(actions(&results), vec![Action::Created]);
        assert_eq!(results[0].attempts, 3);
        assert_eq!(engine.tracker().issues().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_record() {
        let tracker = MemoryTracker::new();
        tracker.fail_next(
            Write::Create,
            "Down",
            std::iter::repeat(RemoteError::Transient("HTTP 503".to_string())).take(3),
        );
        let engine = reconciler(tracker);

        let results = engine.run(&[DesiredRecord::new("Down")]).await.unwrap();

        assert_eq!(actions(&results), vec![Action::Failed]);
        assert_eq!(results[0].attempts, 3);
        assert!(engine.tracker().issues().is_empty());
    }

    #[tokio::test]
    async fn failed_close_after_create_converges_on_rerun() {
        let tracker = MemoryTracker::new();
        tracker.fail_next(
            Write::Update,
            "Done already",
            std::iter::repeat(RemoteError::Transient("HTTP 500".to_string())).take(3),
        );
        let engine = reconciler(tracker);
        let table = vec![DesiredRecord::new("Done already").state(IssueState::Closed)];

        let first = engine.run(&table).await.unwrap();
        assert_eq!(actions(&first), vec![Action::Failed]);
        let id = first[0].remote_id.expect("issue was created");

        let second = engine.run(&table).await.unwrap();
        assert_eq!(actions(&second), vec![Action::Updated]);
        assert_eq!(second[0].remote_id, Some(id));
        assert_eq!(engine.tracker().create_calls(), 1);
        assert_eq!(engine.tracker().issues().len(), 1);
        assert_eq!(
            engine.tracker().issue_titled("Done already").unwrap().state,
            IssueState::Closed
        );
    }

    #[tokio::test]
    async fn comments_are_posted_only_with_writes() {
        let tracker = MemoryTracker::new();
        let id = tracker.insert_issue("Subtitles", &[], None, IssueState::Open);
        let engine = reconciler(tracker);
        let table = vec![DesiredRecord::new("Subtitles")
            .state(IssueState::Closed)
            .comment("Implemented through the Jellyfin integration.")];

        engine.run(&table).await.unwrap();
        engine.run(&table).await.unwrap();

        assert_eq!(
            engine.tracker().comments(),
            vec![(id, "Implemented through the Jellyfin integration.".to_string())]
        );
    }

    #[tokio::test]
    async fn dry_run_reports_without_writing() {
        let tracker = MemoryTracker::new();
        tracker.insert_issue("Needs label", &[], None, IssueState::Open);
        let engine = Reconciler::new(
            tracker,
            ReconcileOptions {
                dry_run: true,
                retry: RetryPolicy::immediate(3),
                ..ReconcileOptions::default()
            },
        );
        let table = vec![
            DesiredRecord::new("Needs label").labels(["bug"]),
            DesiredRecord::new("Brand new").milestone("Sprint 9"),
        ];

        let results = engine.run(&table).await.unwrap();

        assert_eq!(actions(&results), vec![Action::Updated, Action::Created]);
        assert_eq!(engine.tracker().create_calls(), 0);
        assert_eq!(engine.tracker().update_calls(), 0);
        assert_eq!(engine.tracker().milestone_create_calls(), 0);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_any_write() {
        let tracker = MemoryTracker::new();
        tracker.insert_issue("Needs label", &[], None, IssueState::Open);
        tracker.insert_issue("Second page", &[], None, IssueState::Open);
        tracker.fail_listing(RemoteError::Transient("HTTP 502: Bad Gateway".to_string()));
        let engine = reconciler(tracker);
        let table = vec![
            DesiredRecord::new("Needs label").labels(["bug"]),
            DesiredRecord::new("Brand new").milestone("Sprint 9"),
        ];

        let result = engine.run(&table).await;

        assert!(matches!(result, Err(ReconcileError::Index(_))));
        assert_eq!(engine.tracker().create_calls(), 0);
        assert_eq!(engine.tracker().update_calls(), 0);
        assert_eq!(engine.tracker().milestone_create_calls(), 0);

        // The failure is one-shot; a later run sees the whole collection.
        let results = engine.run(&table).await.unwrap();
        assert_eq!(actions(&results), vec![Action::Updated, Action::Created]);
    }

    #[tokio::test]
    async fn duplicate_desired_keys_apply_once() {
        let engine = reconciler(MemoryTracker::new());
        let table = vec![
            DesiredRecord::new("Search filters").labels(["feature"]),
            DesiredRecord::new("Search filters").labels(["bug"]),
        ];

        let results = engine.run(&table).await.unwrap();

        assert_eq!(actions(&results), vec![Action::Created, Action::Failed]);
        assert_eq!(
            results[1].error.as_deref(),
            Some("duplicate key in desired-state table")
        );
        assert_eq!(engine.tracker().issues().len(), 1);
    }
}
