//! Retrieval-augmented generation over uploaded documents.
//!
//! - `loader`: text extraction per file type
//! - `splitter`: recursive character chunking
//! - `store` / `sqlite`: vector storage and similarity search
//! - `indexer`: upload → chunks → embeddings → store
//! - `chain`: history-aware retrieval and answer streaming

pub mod chain;
pub mod indexer;
pub mod loader;
pub mod prompts;
pub mod splitter;
pub mod sqlite;
pub mod store;

pub use chain::{PreparedAnswer, RagChain};
pub use indexer::DocumentIndexer;
pub use splitter::TextSplitter;
pub use sqlite::SqliteVectorStore;
pub use store::{SearchResult, StoredChunk, VectorStore};
