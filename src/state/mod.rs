use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{AppPaths, AppSettings, ConfigService};
use crate::core::credentials::ApiKeyStore;
use crate::core::db::connect_pool;
use crate::documents::DocumentStore;
use crate::history::ChatLogStore;
use crate::llm::{LlmProvider, LlmService, OpenAiProvider};
use crate::rag::{DocumentIndexer, RagChain, SqliteVectorStore, TextSplitter, VectorStore};

pub mod error;

use error::InitializationError;

/// Application state shared across all routes.
///
/// Holds:
/// - Settings and the runtime API key
/// - Chat log and document bookkeeping (one SQLite database)
/// - The vector store (a second SQLite database)
/// - The indexing pipeline and the retrieval chain
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub credentials: ApiKeyStore,
    pub chat_logs: ChatLogStore,
    pub documents: DocumentStore,
    pub vector_store: Arc<dyn VectorStore>,
    pub indexer: DocumentIndexer,
    pub chain: RagChain,
}

impl AppState {
    /// Initializes the application state.
    ///
    /// 1. Load configuration (config.yml + secrets.yaml)
    /// 2. Seed the API key from the environment or secrets
    /// 3. Open both databases and wire the RAG pipeline to OpenAI
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let settings = ConfigService::new(paths.clone())
            .load_settings()
            .map_err(|e| InitializationError::Config(e.into()))?;

        let credentials = ApiKeyStore::from_env_or(settings.llm.api_key.clone());
        let provider = OpenAiProvider::new(
            &settings.llm.base_url,
            credentials.clone(),
            Duration::from_secs(settings.llm.request_timeout_secs),
        )
        .map_err(|e| InitializationError::Llm(e.into()))?;

        Self::from_parts(&paths, settings, credentials, Arc::new(provider)).await
    }

    /// Builds the state around an already constructed provider.
    pub async fn from_parts(
        paths: &AppPaths,
        settings: AppSettings,
        credentials: ApiKeyStore,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Arc<Self>, InitializationError> {
        let pool = connect_pool(&paths.db_path)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let chat_logs = ChatLogStore::new(pool.clone())
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;
        let documents = DocumentStore::new(pool)
            .await
            .map_err(|e| InitializationError::Database(e.into()))?;

        let vector_store: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::open(&paths.vector_db_path)
                .await
                .map_err(|e| InitializationError::VectorStore(e.into()))?,
        );

        let llm = LlmService::new(provider, settings.llm.clone(), settings.rag.embed_batch_size);
        let splitter = TextSplitter::new(settings.rag.chunk_size, settings.rag.chunk_overlap);
        let indexer = DocumentIndexer::new(llm.clone(), vector_store.clone(), splitter);
        let chain = RagChain::new(llm, vector_store.clone(), settings.rag.top_k);

        indexer
            .check_embedding_model()
            .await
            .map_err(|e| InitializationError::VectorStore(e.into()))?;

        tracing::info!(
            provider = chain.llm().provider_name(),
            default_model = %settings.llm.default_model,
            embedding_model = %settings.llm.embedding_model,
            api_key_set = credentials.is_set(),
            "Application state initialized"
        );

        Ok(Arc::new(AppState {
            settings: Arc::new(settings),
            credentials,
            chat_logs,
            documents,
            vector_store,
            indexer,
            chain,
        }))
    }
}
