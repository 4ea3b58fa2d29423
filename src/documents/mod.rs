use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

/// An uploaded document as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub id: i64,
    pub filename: String,
    pub upload_timestamp: String,
}

/// Bookkeeping for uploaded documents (`document_store`).
///
/// The ids handed out here are the `file_id` every indexed chunk carries.
#[derive(Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS document_store (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                upload_timestamp TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to init document_store table: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn insert(&self, filename: &str) -> Result<i64, ApiError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("INSERT INTO document_store (filename, upload_timestamp) VALUES (?, ?)")
            .bind(filename)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<DocumentInfo>, ApiError> {
        let row = sqlx::query(
            "SELECT id, filename, upload_timestamp FROM document_store WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_document(&row)).transpose()
    }

    /// Newest first.
    pub async fn list(&self) -> Result<Vec<DocumentInfo>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, filename, upload_timestamp
             FROM document_store
             ORDER BY upload_timestamp DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM document_store WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn clear(&self) -> Result<u64, ApiError> {
        let result = sqlx::query("DELETE FROM document_store")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_store")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentInfo, ApiError> {
    Ok(DocumentInfo {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        upload_timestamp: row.try_get("upload_timestamp")?,
    })
}
