//! Thread metadata service.
//!
//! Wraps [`ThreadRepository`] with the degradation rules of the HTTP surface:
//! reads never fail (they report the reason next to an empty list) and writes
//! report a [`WriteStatus`] instead of an error.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::{ThreadRecord, ThreadRepository};
use crate::memory::AgentMemory;
use crate::session::{MemoryScope, ResourceId, is_guest_thread};

/// Result of a listing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadListing {
    pub threads: Vec<ThreadRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a thread write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Done,
    /// The request itself is unacceptable (e.g. a guest thread id).
    Rejected(String),
    /// The store failed; the reason is already logged.
    Failed(String),
}

impl WriteStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, WriteStatus::Done)
    }
}

/// Thread metadata operations for signed-in users.
#[derive(Clone)]
pub struct ThreadService {
    repo: ThreadRepository,
    memory: Arc<dyn AgentMemory>,
}

impl ThreadService {
    pub fn new(repo: ThreadRepository, memory: Arc<dyn AgentMemory>) -> Self {
        Self { repo, memory }
    }

    /// Threads of `user_id`, newest first. Empty without a user.
    pub async fn list(&self, user_id: Option<&str>) -> ThreadListing {
        let Some(user_id) = user_id.filter(|id| !id.is_empty()) else {
            return ThreadListing::default();
        };

        match self.repo.list(user_id).await {
            Ok(threads) => ThreadListing {
                threads,
                error: None,
            },
            Err(e) => {
                error!(user_id, error = %e, "failed to list threads");
                ThreadListing {
                    threads: Vec::new(),
                    error: Some(format!("{:#}", e)),
                }
            }
        }
    }

    /// Most recently updated thread of a user, if any.
    pub async fn latest(&self, user_id: &str) -> Option<ThreadRecord> {
        match self.repo.latest(user_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(user_id, error = %e, "failed to fetch latest thread");
                None
            }
        }
    }

    pub async fn upsert(&self, user_id: &str, thread_id: &str, title: Option<&str>) -> WriteStatus {
        if let Some(rejection) = check_ids(user_id, thread_id) {
            return rejection;
        }

        match self.repo.upsert(user_id, thread_id, title).await {
            Ok(_) => WriteStatus::Done,
            Err(e) => {
                error!(user_id, thread_id, error = %e, "failed to upsert thread");
                WriteStatus::Failed(format!("{:#}", e))
            }
        }
    }

    /// Rename a thread. Renaming a missing thread is not an error.
    pub async fn update_title(&self, user_id: &str, thread_id: &str, title: &str) -> WriteStatus {
        if let Some(rejection) = check_ids(user_id, thread_id) {
            return rejection;
        }

        match self.repo.update_title(user_id, thread_id, title).await {
            Ok(true) => WriteStatus::Done,
            Ok(false) => {
                info!(user_id, thread_id, "title update for unknown thread ignored");
                WriteStatus::Done
            }
            Err(e) => {
                error!(user_id, thread_id, error = %e, "failed to update thread title");
                WriteStatus::Failed(format!("{:#}", e))
            }
        }
    }

    /// Delete a thread row, then drop its memory as a secondary effect.
    ///
    /// Memory deletion failures are logged and never change the outcome.
    pub async fn delete(&self, user_id: &str, thread_id: &str) -> WriteStatus {
        if user_id.is_empty() || thread_id.is_empty() {
            return WriteStatus::Rejected("Missing params".to_string());
        }

        if let Err(e) = self.repo.delete(user_id, thread_id).await {
            error!(user_id, thread_id, error = %e, "failed to delete thread");
            return WriteStatus::Failed(format!("{:#}", e));
        }

        let scope = MemoryScope::new(thread_id, ResourceId::for_user(user_id));
        if let Err(e) = self.memory.delete_thread(&scope).await {
            warn!(user_id, thread_id, error = %e, "failed to delete thread memory");
        }

        WriteStatus::Done
    }
}

fn check_ids(user_id: &str, thread_id: &str) -> Option<WriteStatus> {
    if user_id.is_empty() || thread_id.is_empty() {
        return Some(WriteStatus::Rejected("Missing params".to_string()));
    }
    if is_guest_thread(thread_id) {
        return Some(WriteStatus::Rejected(
            "Guest threads are not stored".to_string(),
        ));
    }
    None
}
