use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;
use crate::llm::ChatMessage;

/// One question/answer exchange as stored in `application_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatLogEntry {
    pub id: i64,
    pub session_id: String,
    pub user_query: String,
    pub response: String,
    pub model: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub exchange_count: i64,
    pub last_activity: String,
}

#[derive(Clone)]
pub struct ChatLogStore {
    pool: SqlitePool,
}

impl ChatLogStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS application_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                user_query TEXT NOT NULL,
                response TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init application_logs table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_application_logs_session ON application_logs(session_id)",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create index: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn insert_log(
        &self,
        session_id: &str,
        user_query: &str,
        response: &str,
        model: &str,
    ) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO application_logs (session_id, user_query, response, model, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(user_query)
        .bind(response)
        .bind(model)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Raw exchanges of a session, oldest first.
    pub async fn get_logs(&self, session_id: &str) -> Result<Vec<ChatLogEntry>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, session_id, user_query, response, model, created_at
             FROM application_logs
             WHERE session_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(ChatLogEntry {
                id: row.try_get("id")?,
                session_id: row.try_get("session_id")?,
                user_query: row.try_get("user_query")?,
                response: row.try_get("response")?,
                model: row.try_get("model")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(entries)
    }

    /// Session history as alternating user/assistant messages.
    pub async fn get_chat_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let entries = self.get_logs(session_id).await?;
        Ok(entries
            .into_iter()
            .flat_map(|entry| {
                [
                    ChatMessage::user(entry.user_query),
                    ChatMessage::assistant(entry.response),
                ]
            })
            .collect())
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM application_logs WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let rows = sqlx::query(
            "SELECT session_id, COUNT(*) AS exchange_count, MAX(created_at) AS last_activity
             FROM application_logs
             GROUP BY session_id
             ORDER BY last_activity DESC
             LIMIT 100",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(SessionSummary {
                session_id: row.try_get("session_id")?,
                exchange_count: row.try_get("exchange_count")?,
                last_activity: row.try_get("last_activity")?,
            });
        }
        Ok(sessions)
    }

    pub async fn count(&self) -> Result<i64, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM application_logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::connect_pool;
    use crate::llm::Role;

    async fn test_store() -> (tempfile::TempDir, ChatLogStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = connect_pool(&dir.path().join("logs.db")).await.unwrap();
        (dir, ChatLogStore::new(pool).await.unwrap())
    }

    #[tokio::test]
    async fn history_alternates_user_and_assistant() {
        let (_dir, store) = test_store().await;
        store
            .insert_log("s1", "What is RAG?", "Retrieval-augmented generation.", "gpt-4o-mini")
            .await
            .unwrap();
        store
            .insert_log("s1", "Who uses it?", "Chat assistants.", "gpt-4o-mini")
            .await
            .unwrap();
        store
            .insert_log("s2", "Unrelated", "Other session.", "gpt-4o")
            .await
            .unwrap();

        let history = store.get_chat_history("s1").await.unwrap();
        let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(history[0].content, "What is RAG?");
        assert_eq!(history[3].content, "Chat assistants.");
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let (_dir, store) = test_store().await;
        assert!(store.get_chat_history("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_session_only_touches_that_session() {
        let (_dir, store) = test_store().await;
        store.insert_log("s1", "q", "a", "m").await.unwrap();
        store.insert_log("s1", "q2", "a2", "m").await.unwrap();
        store.insert_log("s2", "q", "a", "m").await.unwrap();

        assert_eq!(store.clear_session("s1").await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.clear_session("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_sessions_counts_exchanges() {
        let (_dir, store) = test_store().await;
        store.insert_log("s1", "q", "a", "m").await.unwrap();
        store.insert_log("s2", "q", "a", "m").await.unwrap();
        store.insert_log("s2", "q2", "a2", "m").await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        let s2 = sessions.iter().find(|s| s.session_id == "s2").unwrap();
        assert_eq!(s2.exchange_count, 2);
    }
}
