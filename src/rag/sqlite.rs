//! SQLite-backed vector store.
//!
//! Chunks and their embeddings live in one table; search is brute-force
//! cosine similarity over every stored vector.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use super::store::{SearchResult, StoredChunk, VectorStore};
use crate::core::db::connect_pool;
use crate::core::errors::ApiError;

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub async fn open(db_path: &Path) -> Result<Self, ApiError> {
        let pool = connect_pool(db_path).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, ApiError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS document_chunks (
                chunk_id TEXT PRIMARY KEY,
                file_id INTEGER NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file ON document_chunks(file_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vector_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<StoredChunk, ApiError> {
        let metadata_str: Option<String> = row.try_get("metadata")?;
        let metadata = metadata_str.and_then(|s| serde_json::from_str::<Value>(&s).ok());
        let chunk_index: i64 = row.try_get("chunk_index")?;

        Ok(StoredChunk {
            chunk_id: row.try_get("chunk_id")?,
            content: row.try_get("content")?,
            source: row.try_get("source")?,
            file_id: row.try_get("file_id")?,
            chunk_index: chunk_index.max(0) as usize,
            metadata,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn add(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (chunk, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            let metadata_str = match &chunk.metadata {
                Some(m) => serde_json::to_string(m).map_err(ApiError::internal)?,
                None => "{}".to_string(),
            };

            sqlx::query(
                "INSERT OR REPLACE INTO document_chunks
                    (chunk_id, file_id, chunk_index, content, source, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&chunk.chunk_id)
            .bind(chunk.file_id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, ApiError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT chunk_id, file_id, chunk_index, content, source, metadata, embedding
             FROM document_chunks",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_bytes: Option<Vec<u8>> = row.try_get("embedding")?;
            let Some(embedding_bytes) = embedding_bytes.filter(|b| !b.is_empty()) else {
                continue;
            };
            let stored = Self::deserialize_embedding(&embedding_bytes);
            scored.push(SearchResult {
                chunk: Self::row_to_chunk(row)?,
                score: Self::cosine_similarity(query_embedding, &stored),
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);

        Ok(scored)
    }

    async fn delete_file(&self, file_id: i64) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE file_id = ?1")
            .bind(file_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<usize, ApiError> {
        let result = sqlx::query("DELETE FROM document_chunks")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, file_id: Option<i64>) -> Result<usize, ApiError> {
        let count: i64 = if let Some(file_id) = file_id {
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE file_id = ?1")
                .bind(file_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        Ok(count as usize)
    }

    async fn embedding_model(&self) -> Result<Option<String>, ApiError> {
        sqlx::query_scalar("SELECT value FROM vector_meta WHERE key = 'embedding_model'")
            .fetch_optional(&self.pool)
            .await
            .map_err(ApiError::internal)
    }

    async fn set_embedding_model(&self, model: &str) -> Result<(), ApiError> {
        sqlx::query(
            "INSERT OR REPLACE INTO vector_meta (key, value, updated_at)
             VALUES ('embedding_model', ?1, STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))",
        )
        .bind(model)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }
}
