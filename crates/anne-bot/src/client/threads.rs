//! Cached thread list with previews.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::api::ChatApi;
use crate::threads::{ThreadRecord, summarize_last_message};

/// A thread as shown in the thread list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    pub title: String,
    pub updated_at: String,
    pub message_count: usize,
    pub last_message: String,
}

impl ThreadSummary {
    fn new(record: &ThreadRecord, history: &[crate::memory::Message]) -> Self {
        Self {
            thread_id: record.thread_id.clone(),
            title: record.display_title().to_string(),
            updated_at: record.updated_at.clone(),
            message_count: history.len(),
            last_message: summarize_last_message(history),
        }
    }
}

/// Thread list of the signed-in user.
///
/// Every write through the book is followed by a refresh, and refreshed
/// listings are pushed to subscribers. A refresh that was started before the
/// last [`ThreadBook::clear`] is never published.
pub struct ThreadBook {
    api: Arc<dyn ChatApi>,
    tx: watch::Sender<Vec<ThreadSummary>>,
    generation: AtomicU64,
}

impl ThreadBook {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            api,
            tx,
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ThreadSummary>> {
        self.tx.subscribe()
    }

    /// Last published listing.
    pub fn current(&self) -> Vec<ThreadSummary> {
        self.tx.borrow().clone()
    }

    /// Drop the cached listing (e.g. on sign-out).
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tx.send_replace(Vec::new());
    }

    /// Reload the listing, fetching every thread's history concurrently for
    /// the previews. A failed history fetch yields an empty preview.
    pub async fn refresh(&self, user_id: &str) -> Result<Vec<ThreadSummary>> {
        let generation = self.generation.load(Ordering::SeqCst);
        let records = self.api.list_threads(user_id).await?;

        let histories = join_all(records.iter().map(|record| async move {
            match self.api.history(&record.thread_id, Some(user_id)).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(thread_id = %record.thread_id, error = %e, "failed to load thread preview");
                    Vec::new()
                }
            }
        }))
        .await;

        let summaries: Vec<ThreadSummary> = records
            .iter()
            .zip(histories.iter())
            .map(|(record, history)| ThreadSummary::new(record, history))
            .collect();

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(user_id, "thread list cleared during refresh, listing dropped");
            return Ok(summaries);
        }
        debug!(user_id, count = summaries.len(), "thread list refreshed");
        self.tx.send_replace(summaries.clone());
        Ok(summaries)
    }

    /// Most recently updated thread id.
    pub async fn latest(&self, user_id: &str) -> Result<Option<String>> {
        let records = self.api.list_threads(user_id).await?;
        Ok(records.into_iter().next().map(|r| r.thread_id))
    }

    pub async fn upsert(&self, user_id: &str, thread_id: &str, title: Option<&str>) -> Result<()> {
        self.api.upsert_thread(user_id, thread_id, title).await?;
        self.refresh_quietly(user_id).await;
        Ok(())
    }

    pub async fn rename(&self, user_id: &str, thread_id: &str, title: &str) -> Result<()> {
        self.api.rename_thread(user_id, thread_id, title).await?;
        self.refresh_quietly(user_id).await;
        Ok(())
    }

    pub async fn delete(&self, user_id: &str, thread_id: &str) -> Result<()> {
        self.api.delete_thread(user_id, thread_id).await?;
        self.refresh_quietly(user_id).await;
        Ok(())
    }

    async fn refresh_quietly(&self, user_id: &str) {
        if let Err(e) = self.refresh(user_id).await {
            warn!(user_id, error = %e, "failed to refresh thread list");
        }
    }
}
