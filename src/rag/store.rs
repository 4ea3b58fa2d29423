//! VectorStore trait: the seam between indexing/retrieval and the storage backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// An indexed chunk of an uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Unique chunk identifier (`<file_id>-<chunk_index>`).
    pub chunk_id: String,
    pub content: String,
    /// Original filename.
    pub source: String,
    /// Id of the owning row in `document_store`.
    pub file_id: i64,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    pub metadata: Option<serde_json::Value>,
}

impl StoredChunk {
    pub fn new(file_id: i64, source: &str, chunk_index: usize, content: String) -> Self {
        Self {
            chunk_id: format!("{}-{}", file_id, chunk_index),
            content,
            source: source.to_string(),
            file_id,
            chunk_index,
            metadata: Some(serde_json::json!({
                "file_id": file_id,
                "source": source,
                "chunk_index": chunk_index,
            })),
        }
    }
}

/// Result of a similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk: StoredChunk,
    /// Cosine similarity (higher = better).
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Stores chunks with their embeddings, replacing chunks with the same id.
    async fn add(&self, items: Vec<(StoredChunk, Vec<f32>)>) -> Result<(), ApiError>;

    /// Returns at most `limit` chunks ordered by similarity to `query_embedding`.
    async fn search(&self, query_embedding: &[f32], limit: usize)
        -> Result<Vec<SearchResult>, ApiError>;

    /// Removes every chunk of one document; returns how many were deleted.
    async fn delete_file(&self, file_id: i64) -> Result<usize, ApiError>;

    async fn clear(&self) -> Result<usize, ApiError>;

    /// Chunk count, optionally restricted to one document.
    async fn count(&self, file_id: Option<i64>) -> Result<usize, ApiError>;

    /// Embedding model the stored vectors were produced with, if recorded.
    async fn embedding_model(&self) -> Result<Option<String>, ApiError>;

    async fn set_embedding_model(&self, model: &str) -> Result<(), ApiError>;
}
