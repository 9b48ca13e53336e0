use std::{collections::HashMap, time::Duration};

use tokio::time::timeout;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::{
    error::RemoteError,
    integrations::IssueTracker,
    models::{IssueId, RemoteRecord, StateFilter},
};

/// Snapshot of the remote collection, keyed by title.
#[derive(Debug, Default)]
pub struct RemoteIndex {
    by_key: HashMap<String, RemoteRecord>,
    duplicates: HashMap<String, Vec<IssueId>>,
    len: usize,
}

pub enum Match<'a> {
    Missing,
    One(&'a RemoteRecord),
    Ambiguous(&'a [IssueId]),
}

impl RemoteIndex {
    /// Lists every issue, open and closed. Listing errors are returned as-is.
    /// `page_timeout` bounds the wait for each next item, which covers one page fetch.
    pub async fn build(
        tracker: &dyn IssueTracker,
        page_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let mut index = Self::default();
        let mut issues = tracker.list_issues(StateFilter::All);
        loop {
            let next = timeout(page_timeout, issues.next())
                .await
                .map_err(|_| RemoteError::Transient("issue listing timed out".to_string()))?;
            match next {
                Some(issue) => index.insert(issue?),
                None => break,
            }
        }

        for (key, ids) in &index.duplicates {
            warn!("index: title '{key}' is shared by {} issues", ids.len());
        }
        debug!(
            "index: {} remote issues, {} distinct titles",
            index.len,
            index.by_key.len()
        );
        Ok(index)
    }

    fn insert(&mut self, record: RemoteRecord) {
        self.len += 1;
        match self.by_key.get(&record.key) {
            Some(first) => {
                self.duplicates
                    .entry(record.key.clone())
                    .or_insert_with(|| vec![first.id])
                    .push(record.id);
            }
            None => {
                self.by_key.insert(record.key.clone(), record);
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Match<'_> {
        if let Some(ids) = self.duplicates.get(key) {
            return Match::Ambiguous(ids);
        }
        match self.by_key.get(key) {
            Some(record) => Match::One(record),
            None => Match::Missing,
        }
    }

    /// Titles seen more than once, with every issue sharing them.
    pub fn duplicates(&self) -> &HashMap<String, Vec<IssueId>> {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
