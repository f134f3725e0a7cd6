//! Agent memory.
//!
//! Memory is the single source of truth for the order of messages in a
//! thread. Each thread belongs to exactly one resource (`catAgent:<user>`);
//! guests never get a memory scope and are therefore never persisted.

pub mod models;
mod sqlite;

pub use models::{Message, MessageRole};
pub use sqlite::SqliteMemory;

use async_trait::async_trait;
use thiserror::Error;

use crate::session::MemoryScope;

/// Errors raised by a memory backend.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("thread {thread_id} belongs to another resource")]
    ResourceMismatch { thread_id: String },

    #[error("stored message is invalid: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// Storage for conversation history, keyed by thread and owner.
#[async_trait]
pub trait AgentMemory: Send + Sync {
    /// Messages of a thread, oldest first. With a limit, only the most recent
    /// `limit` messages are returned (still oldest first). Unknown threads
    /// yield an empty list.
    async fn list_messages(
        &self,
        scope: &MemoryScope,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<Message>>;

    /// Append messages, skipping ids already stored in the thread. Returns the
    /// number of messages actually written.
    async fn append_messages(&self, scope: &MemoryScope, messages: &[Message])
    -> MemoryResult<usize>;

    /// Delete a thread and its messages. Returns whether it existed.
    async fn delete_thread(&self, scope: &MemoryScope) -> MemoryResult<bool>;
}
