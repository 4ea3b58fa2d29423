use std::sync::Arc;

use super::loader::load_document;
use super::splitter::TextSplitter;
use super::store::{StoredChunk, VectorStore};
use crate::core::errors::ApiError;
use crate::llm::LlmService;

/// Turns uploaded files into embedded chunks in the vector store.
#[derive(Clone)]
pub struct DocumentIndexer {
    llm: LlmService,
    store: Arc<dyn VectorStore>,
    splitter: TextSplitter,
}

impl DocumentIndexer {
    pub fn new(llm: LlmService, store: Arc<dyn VectorStore>, splitter: TextSplitter) -> Self {
        Self {
            llm,
            store,
            splitter,
        }
    }

    /// Loads, splits, embeds and stores one document. Returns the number of chunks stored.
    ///
    /// Nothing is written to the store unless every step succeeds.
    pub async fn index_document(
        &self,
        file_id: i64,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<usize, ApiError> {
        let text = load_document(filename, bytes).await?;
        let pieces = self.splitter.split_text(&text);
        if pieces.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "{} contains no extractable text",
                filename
            )));
        }

        let embeddings = self.llm.embed_documents(&pieces).await?;

        let items: Vec<(StoredChunk, Vec<f32>)> = pieces
            .into_iter()
            .enumerate()
            .map(|(idx, content)| StoredChunk::new(file_id, filename, idx, content))
            .zip(embeddings)
            .collect();
        let count = items.len();

        self.store.add(items).await?;

        tracing::info!(file_id, filename, chunks = count, "Indexed document");
        Ok(count)
    }

    pub async fn remove_document(&self, file_id: i64) -> Result<usize, ApiError> {
        let removed = self.store.delete_file(file_id).await?;
        tracing::info!(file_id, chunks = removed, "Removed document vectors");
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<usize, ApiError> {
        self.store.clear().await
    }

    /// Records the active embedding model, warning when it differs from the one
    /// existing vectors were produced with.
    pub async fn check_embedding_model(&self) -> Result<(), ApiError> {
        let configured = self.llm.embedding_model();
        match self.store.embedding_model().await? {
            Some(stored) if stored == configured => {}
            Some(stored) => {
                let chunks = self.store.count(None).await?;
                if chunks > 0 {
                    tracing::warn!(
                        stored = %stored,
                        configured = %configured,
                        chunks,
                        "Embedding model changed; existing vectors may not match new queries"
                    );
                }
                self.store.set_embedding_model(configured).await?;
            }
            None => self.store.set_embedding_model(configured).await?,
        }
        Ok(())
    }
}
