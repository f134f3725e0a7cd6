//! Repository for thread metadata operations.

use anyhow::{Context, Result};

use super::{PLACEHOLDER_TITLE, ThreadRecord};
use crate::db::Database;
use crate::memory::models::timestamp_now;

const THREAD_COLUMNS: &str = "user_id, thread_id, title, created_at, updated_at";

/// Repository over the `user_threads` table.
#[derive(Debug, Clone)]
pub struct ThreadRepository {
    db: Database,
}

impl ThreadRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Threads of a user, most recently updated first.
    pub async fn list(&self, user_id: &str) -> Result<Vec<ThreadRecord>> {
        sqlx::query_as::<_, ThreadRecord>(&format!(
            "SELECT {THREAD_COLUMNS} FROM user_threads WHERE user_id = ? \
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .context("listing threads")
    }

    pub async fn get(&self, user_id: &str, thread_id: &str) -> Result<Option<ThreadRecord>> {
        sqlx::query_as::<_, ThreadRecord>(&format!(
            "SELECT {THREAD_COLUMNS} FROM user_threads WHERE user_id = ? AND thread_id = ?"
        ))
        .bind(user_id)
        .bind(thread_id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching thread")
    }

    /// The user's most recently updated thread.
    pub async fn latest(&self, user_id: &str) -> Result<Option<ThreadRecord>> {
        sqlx::query_as::<_, ThreadRecord>(&format!(
            "SELECT {THREAD_COLUMNS} FROM user_threads WHERE user_id = ? \
             ORDER BY updated_at DESC, id DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await
        .context("fetching latest thread")
    }

    /// Insert or touch a thread.
    ///
    /// New rows get `title` or the placeholder. Existing rows keep their title
    /// unless one is given. `updated_at` is always bumped.
    pub async fn upsert(
        &self,
        user_id: &str,
        thread_id: &str,
        title: Option<&str>,
    ) -> Result<ThreadRecord> {
        let now = timestamp_now();

        sqlx::query_as::<_, ThreadRecord>(&format!(
            r#"
            INSERT INTO user_threads (user_id, thread_id, title, created_at, updated_at)
            VALUES (?, ?, COALESCE(?, ?), ?, ?)
            ON CONFLICT(user_id, thread_id) DO UPDATE SET
                title = COALESCE(?, user_threads.title),
                updated_at = excluded.updated_at
            RETURNING {THREAD_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(thread_id)
        .bind(title)
        .bind(PLACEHOLDER_TITLE)
        .bind(&now)
        .bind(&now)
        .bind(title)
        .fetch_one(self.db.pool())
        .await
        .context("upserting thread")
    }

    /// Set a thread's title. Returns false when no such thread exists.
    pub async fn update_title(&self, user_id: &str, thread_id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE user_threads SET title = ?, updated_at = ? WHERE user_id = ? AND thread_id = ?",
        )
        .bind(title)
        .bind(timestamp_now())
        .bind(user_id)
        .bind(thread_id)
        .execute(self.db.pool())
        .await
        .context("updating thread title")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a thread row. Returns false when no such thread exists.
    pub async fn delete(&self, user_id: &str, thread_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_threads WHERE user_id = ? AND thread_id = ?")
            .bind(user_id)
            .bind(thread_id)
            .execute(self.db.pool())
            .await
            .context("deleting thread")?;

        Ok(result.rows_affected() > 0)
    }
}
