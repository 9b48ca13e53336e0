use std::{collections::HashMap, time::Duration};

use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info};

use crate::{
    error::RemoteError,
    integrations::IssueTracker,
    models::{Milestone, StateFilter},
    reconcile::{diff::MilestoneTarget, retry::RetryPolicy},
};

/// Title to milestone cache, shared by every record of a run.
pub struct MilestoneResolver<'a> {
    tracker: &'a dyn IssueTracker,
    retry: &'a RetryPolicy,
    call_timeout: Duration,
    dry_run: bool,
    descriptions: &'a HashMap<String, String>,
    // Held across a create so that a title is only ever created once.
    known: Mutex<HashMap<String, Milestone>>,
}

impl<'a> MilestoneResolver<'a> {
    pub async fn load(
        tracker: &'a dyn IssueTracker,
        retry: &'a RetryPolicy,
        call_timeout: Duration,
        dry_run: bool,
        descriptions: &'a HashMap<String, String>,
    ) -> Result<MilestoneResolver<'a>, RemoteError> {
        let listed = timeout(call_timeout, tracker.list_milestones(StateFilter::All))
            .await
            .map_err(|_| RemoteError::Transient("milestone listing timed out".to_string()))??;
        let known = by_title(listed);
        debug!("milestones: {} known on the remote", known.len());

        Ok(Self {
            tracker,
            retry,
            call_timeout,
            dry_run,
            descriptions,
            known: Mutex::new(known),
        })
    }

    /// Resolves `title`, creating the milestone when it is missing.
    /// Remote calls made on the way are added to `attempts`.
    pub async fn resolve(
        &self,
        title: Option<&str>,
        attempts: &mut u32,
    ) -> Result<MilestoneTarget, RemoteError> {
        let Some(title) = title else {
            return Ok(MilestoneTarget::Unmanaged);
        };

        let mut known = self.known.lock().await;
        if let Some(milestone) = known.get(title) {
            return Ok(MilestoneTarget::Existing(milestone.id));
        }
        if self.dry_run {
            return Ok(MilestoneTarget::Pending);
        }

        let description = self.descriptions.get(title).map(String::as_str);
        let created = self
            .retry
            .run("create milestone", self.call_timeout, attempts, || {
                self.tracker.create_milestone(title, description)
            })
            .await;

        let milestone = match created {
            Ok(milestone) => {
                info!("milestones: created '{title}'");
                milestone
            }
            Err(RemoteError::AlreadyExists(_)) => {
                debug!("milestones: '{title}' already exists, looking it up");
                let listed = self
                    .retry
                    .run("list milestones", self.call_timeout, attempts, || {
                        self.tracker.list_milestones(StateFilter::All)
                    })
                    .await?;
                let mut fresh = by_title(listed);
                let found = fresh.remove(title).ok_or_else(|| {
                    RemoteError::Permanent(format!(
                        "milestone '{title}' reported as existing but not listed"
                    ))
                })?;
                known.extend(fresh);
                found
            }
            Err(e) => return Err(e),
        };

        let id = milestone.id;
        known.insert(title.to_string(), milestone);
        Ok(MilestoneTarget::Existing(id))
    }
}

fn by_title(milestones: Vec<Milestone>) -> HashMap<String, Milestone> {
    let mut known = HashMap::new();
    for milestone in milestones {
        known.entry(milestone.title.clone()).or_insert(milestone);
    }
    known
}
