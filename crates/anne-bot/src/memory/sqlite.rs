//! SQLite-backed agent memory.

use async_trait::async_trait;
use tracing::debug;

use super::models::{MessageRow, timestamp_now};
use super::{AgentMemory, MemoryError, MemoryResult, Message};
use crate::db::Database;
use crate::session::MemoryScope;

/// Agent memory stored in the `memory_threads` and `memory_messages` tables.
#[derive(Debug, Clone)]
pub struct SqliteMemory {
    db: Database,
}

impl SqliteMemory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Owner of a thread, if the thread exists.
    async fn owner(&self, thread_id: &str) -> MemoryResult<Option<String>> {
        let owner = sqlx::query_scalar::<_, String>(
            "SELECT resource_id FROM memory_threads WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(owner)
    }

    /// Fails when the thread exists and is owned by someone else.
    async fn check_owner(&self, scope: &MemoryScope) -> MemoryResult<bool> {
        match self.owner(&scope.thread_id).await? {
            Some(owner) if owner != scope.resource_id.as_str() => {
                Err(MemoryError::ResourceMismatch {
                    thread_id: scope.thread_id.clone(),
                })
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AgentMemory for SqliteMemory {
    async fn list_messages(
        &self,
        scope: &MemoryScope,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<Message>> {
        if !self.check_owner(scope).await? {
            return Ok(Vec::new());
        }

        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, role, content, created_at FROM (
                SELECT seq, id, role, content, created_at
                FROM memory_messages
                WHERE thread_id = ?
                ORDER BY seq DESC
                LIMIT ?
            )
            ORDER BY seq ASC
            "#,
        )
        .bind(&scope.thread_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter()
            .map(|row| Message::try_from(row).map_err(MemoryError::Corrupt))
            .collect()
    }

    async fn append_messages(
        &self,
        scope: &MemoryScope,
        messages: &[Message],
    ) -> MemoryResult<usize> {
        let now = timestamp_now();
        let mut tx = self.db.pool().begin().await?;

        // Claim or touch the thread; the returned owner is read under the
        // same write lock as the message inserts.
        let owner = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO memory_threads (thread_id, resource_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(thread_id) DO UPDATE SET updated_at = excluded.updated_at
            RETURNING resource_id
            "#,
        )
        .bind(&scope.thread_id)
        .bind(scope.resource_id.as_str())
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await?;

        if owner != scope.resource_id.as_str() {
            tx.rollback().await?;
            return Err(MemoryError::ResourceMismatch {
                thread_id: scope.thread_id.clone(),
            });
        }

        let mut written = 0;
        for message in messages {
            let result = sqlx::query(
                r#"
                INSERT INTO memory_messages (id, thread_id, role, content, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(thread_id, id) DO NOTHING
                "#,
            )
            .bind(&message.id)
            .bind(&scope.thread_id)
            .bind(message.role.to_string())
            .bind(&message.content)
            .bind(&message.created_at)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await?;

        debug!(
            thread_id = %scope.thread_id,
            written,
            offered = messages.len(),
            "appended messages to memory"
        );
        Ok(written)
    }

    async fn delete_thread(&self, scope: &MemoryScope) -> MemoryResult<bool> {
        if !self.check_owner(scope).await? {
            return Ok(false);
        }

        let mut tx = self.db.pool().begin().await?;
        sqlx::query("DELETE FROM memory_messages WHERE thread_id = ?")
            .bind(&scope.thread_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM memory_threads WHERE thread_id = ?")
            .bind(&scope.thread_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageRole;
    use crate::session::ResourceId;

    async fn memory() -> SqliteMemory {
        SqliteMemory::new(Database::in_memory().await.unwrap())
    }

    fn scope(thread: &str, user: &str) -> MemoryScope {
        MemoryScope::new(thread, ResourceId::for_user(user))
    }

    #[tokio::test]
    async fn test_unknown_thread_is_empty() {
        let memory = memory().await;
        let messages = memory.list_messages(&scope("t1", "u1"), None).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_append_and_list_in_order() {
        let memory = memory().await;
        let s = scope("t1", "u1");
        let batch = vec![Message::user("一"), Message::assistant("二"), Message::user("三")];
        assert_eq!(memory.append_messages(&s, &batch).await.unwrap(), 3);

        let listed = memory.list_messages(&s, None).await.unwrap();
        let contents: Vec<_> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["一", "二", "三"]);
        assert_eq!(listed[1].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_limit_keeps_most_recent() {
        let memory = memory().await;
        let s = scope("t1", "u1");
        let batch: Vec<_> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        memory.append_messages(&s, &batch).await.unwrap();

        let listed = memory.list_messages(&s, Some(2)).await.unwrap();
        let contents: Vec<_> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn test_append_skips_known_ids() {
        let memory = memory().await;
        let s = scope("t1", "u1");
        let first = Message::user("hello").with_id("a");
        memory.append_messages(&s, &[first.clone()]).await.unwrap();

        let written = memory
            .append_messages(&s, &[first, Message::assistant("hi").with_id("b")])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(memory.list_messages(&s, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_other_resource_is_rejected() {
        let memory = memory().await;
        memory
            .append_messages(&scope("t1", "u1"), &[Message::user("secret")])
            .await
            .unwrap();

        let intruder = scope("t1", "u2");
        assert!(matches!(
            memory.list_messages(&intruder, None).await,
            Err(MemoryError::ResourceMismatch { .. })
        ));
        assert!(memory.append_messages(&intruder, &[Message::user("x")]).await.is_err());
        assert!(memory.delete_thread(&intruder).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_first_appends_have_one_owner() {
        let memory = memory().await;
        let (scope_u1, msgs_u1) = (scope("t1", "u1"), [Message::user("from u1")]);
        let (scope_u2, msgs_u2) = (scope("t1", "u2"), [Message::user("from u2")]);
        let (first, second) = tokio::join!(
            memory.append_messages(&scope_u1, &msgs_u1),
            memory.append_messages(&scope_u2, &msgs_u2),
        );
        assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);

        let owner = if first.is_ok() { "u1" } else { "u2" };
        let listed = memory.list_messages(&scope("t1", owner), None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, format!("from {owner}"));
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let memory = memory().await;
        let s = scope("t1", "u1");
        memory.append_messages(&s, &[Message::user("bye")]).await.unwrap();

        assert!(memory.delete_thread(&s).await.unwrap());
        assert!(memory.list_messages(&s, None).await.unwrap().is_empty());
        assert!(!memory.delete_thread(&s).await.unwrap());
    }
}
