//! History-aware retrieval followed by a streamed answer.

use std::sync::Arc;

use super::prompts::{answer_messages, contextualize_messages};
use super::store::{SearchResult, VectorStore};
use crate::core::errors::ApiError;
use crate::llm::{ChatMessage, LlmService, TokenStream};

/// A started answer: the tokens still to come plus what it was grounded on.
pub struct PreparedAnswer {
    pub model: String,
    pub standalone_question: String,
    pub sources: Vec<SearchResult>,
    pub tokens: TokenStream,
}

#[derive(Clone)]
pub struct RagChain {
    llm: LlmService,
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl RagChain {
    pub fn new(llm: LlmService, store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self { llm, store, top_k }
    }

    pub fn llm(&self) -> &LlmService {
        &self.llm
    }

    /// Rewrites a follow-up question so it stands on its own.
    ///
    /// Without history the question is returned unchanged, and an empty
    /// rewrite falls back to the original question.
    pub async fn condense_question(
        &self,
        history: &[ChatMessage],
        question: &str,
        model: &str,
    ) -> Result<String, ApiError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let rewritten = self
            .llm
            .chat(contextualize_messages(history, question), model)
            .await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    pub async fn retrieve(&self, query: &str) -> Result<Vec<SearchResult>, ApiError> {
        let embedding = self.llm.embed_query(query).await?;
        self.store.search(&embedding, self.top_k).await
    }

    /// Retrieves context for `question` and starts streaming the answer.
    ///
    /// `requested_model` is validated before any upstream call.
    pub async fn answer_stream(
        &self,
        question: &str,
        history: &[ChatMessage],
        requested_model: Option<&str>,
    ) -> Result<PreparedAnswer, ApiError> {
        let model = self.llm.resolve_model(requested_model)?;

        let standalone_question = self.condense_question(history, question, &model).await?;
        let sources = self.retrieve(&standalone_question).await?;
        tracing::debug!(
            model = %model,
            standalone = %standalone_question,
            retrieved = sources.len(),
            "Retrieved context"
        );

        let context: Vec<String> = sources.iter().map(|r| r.chunk.content.clone()).collect();
        let messages = answer_messages(&context, history, question);
        let tokens = self.llm.stream_chat(messages, &model).await?;

        Ok(PreparedAnswer {
            model,
            standalone_question,
            sources,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::core::config::AppSettings;
    use crate::llm::{ChatRequest, LlmProvider, Role};
    use crate::rag::sqlite::SqliteVectorStore;
    use crate::rag::store::StoredChunk;

    /// Embeds by keyword so retrieval is predictable.
    struct ScriptedProvider {
        rewrite: String,
        chat_calls: Mutex<Vec<Vec<ChatMessage>>>,
        streamed: Mutex<Vec<Vec<ChatMessage>>>,
        embedded: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(rewrite: &str) -> Self {
            Self {
                rewrite: rewrite.to_string(),
                chat_calls: Mutex::new(Vec::new()),
                streamed: Mutex::new(Vec::new()),
                embedded: Mutex::new(Vec::new()),
            }
        }
    }

    fn keyword_vector(text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        vec![
            text.contains("rust") as u8 as f32,
            text.contains("python") as u8 as f32,
            text.contains("cooking") as u8 as f32,
        ]
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, request: ChatRequest, _model_id: &str) -> Result<String, ApiError> {
            self.chat_calls.lock().unwrap().push(request.messages);
            Ok(self.rewrite.clone())
        }

        async fn stream_chat(
            &self,
            request: ChatRequest,
            _model_id: &str,
        ) -> Result<TokenStream, ApiError> {
            self.streamed.lock().unwrap().push(request.messages);
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                for token in ["Rust ", "is ", "safe."] {
                    if tx.send(Ok(token.to_string())).await.is_err() {
                        return;
                    }
                }
            });
            Ok(rx)
        }

        async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
            self.embedded.lock().unwrap().extend(inputs.iter().cloned());
            Ok(inputs.iter().map(|s| keyword_vector(s)).collect())
        }
    }

    async fn chain_with(
        provider: Arc<ScriptedProvider>,
    ) -> (tempfile::TempDir, RagChain) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteVectorStore::open(&dir.path().join("vectors.db"))
                .await
                .unwrap(),
        );
        let docs = [
            "Rust guarantees memory safety.",
            "Python is dynamically typed.",
            "Cooking pasta takes ten minutes.",
        ];
        let items = docs
            .iter()
            .enumerate()
            .map(|(i, d)| {
                (
                    StoredChunk::new(1, "facts.txt", i, d.to_string()),
                    keyword_vector(d),
                )
            })
            .collect();
        store.add(items).await.unwrap();

        let settings = AppSettings::default();
        let llm = LlmService::new(provider, settings.llm, 8);
        (dir, RagChain::new(llm, store, 2))
    }

    async fn drain(mut tokens: TokenStream) -> String {
        let mut out = String::new();
        while let Some(token) = tokens.recv().await {
            out.push_str(&token.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn first_question_skips_condensing() {
        let provider = Arc::new(ScriptedProvider::new("unused"));
        let (_dir, chain) = chain_with(provider.clone()).await;

        let answer = chain
            .answer_stream("Tell me about Rust", &[], None)
            .await
            .unwrap();
        assert_eq!(answer.model, "gpt-4o-mini");
        assert_eq!(answer.standalone_question, "Tell me about Rust");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[0].chunk.content, "Rust guarantees memory safety.");
        assert_eq!(drain(answer.tokens).await, "Rust is safe.");

        assert!(provider.chat_calls.lock().unwrap().is_empty());
        let streamed = provider.streamed.lock().unwrap();
        assert!(streamed[0][1].content.starts_with("context: Rust guarantees memory safety."));
        assert_eq!(streamed[0].last().unwrap().content, "Tell me about Rust");
    }

    #[tokio::test]
    async fn follow_up_is_condensed_before_retrieval() {
        let provider = Arc::new(ScriptedProvider::new("  What is Python?  "));
        let (_dir, chain) = chain_with(provider.clone()).await;
        let history = vec![
            ChatMessage::user("I like Python"),
            ChatMessage::assistant("Nice."),
        ];

        let answer = chain
            .answer_stream("What is it?", &history, Some("gpt-4o"))
            .await
            .unwrap();
        assert_eq!(answer.model, "gpt-4o");
        assert_eq!(answer.standalone_question, "What is Python?");
        assert_eq!(answer.sources[0].chunk.content, "Python is dynamically typed.");
        assert_eq!(
            provider.embedded.lock().unwrap().last().unwrap(),
            "What is Python?"
        );

        // History goes between the context message and the original question.
        let streamed = provider.streamed.lock().unwrap();
        let roles: Vec<Role> = streamed[0].iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(streamed[0][4].content, "What is it?");
    }

    #[tokio::test]
    async fn blank_rewrite_falls_back_to_question() {
        let provider = Arc::new(ScriptedProvider::new("   "));
        let (_dir, chain) = chain_with(provider).await;
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];

        let condensed = chain
            .condense_question(&history, "cooking tips?", "gpt-4o-mini")
            .await
            .unwrap();
        assert_eq!(condensed, "cooking tips?");
    }

    #[tokio::test]
    async fn disallowed_model_is_rejected_before_upstream_calls() {
        let provider = Arc::new(ScriptedProvider::new("x"));
        let (_dir, chain) = chain_with(provider.clone()).await;

        let err = chain
            .answer_stream("Rust?", &[], Some("not-a-model"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(provider.embedded.lock().unwrap().is_empty());
    }
}
