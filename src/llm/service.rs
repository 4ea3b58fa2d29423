use std::sync::Arc;

use super::provider::{LlmProvider, TokenStream};
use super::types::{ChatMessage, ChatRequest};
use crate::core::config::LlmSettings;
use crate::core::errors::ApiError;

/// Model selection and request shaping in front of an [`LlmProvider`].
#[derive(Clone)]
pub struct LlmService {
    provider: Arc<dyn LlmProvider>,
    settings: LlmSettings,
    embed_batch_size: usize,
}

impl LlmService {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: LlmSettings, embed_batch_size: usize) -> Self {
        Self {
            provider,
            settings,
            embed_batch_size: embed_batch_size.max(1),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn embedding_model(&self) -> &str {
        &self.settings.embedding_model
    }

    /// Picks the chat model for a request: the default when none is given,
    /// otherwise the requested one if it is allowed.
    pub fn resolve_model(&self, requested: Option<&str>) -> Result<String, ApiError> {
        match requested.map(str::trim).filter(|m| !m.is_empty()) {
            None => Ok(self.settings.default_model.clone()),
            Some(model) if self.settings.is_allowed(model) => Ok(model.to_string()),
            Some(model) => Err(ApiError::BadRequest(format!(
                "Unsupported model '{}'. Allowed models are: {}",
                model,
                self.settings.allowed_models.join(", ")
            ))),
        }
    }

    pub async fn chat(&self, messages: Vec<ChatMessage>, model: &str) -> Result<String, ApiError> {
        let request = ChatRequest::new(messages).with_temperature(self.settings.temperature);
        self.provider.chat(request, model).await
    }

    pub async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
    ) -> Result<TokenStream, ApiError> {
        let request = ChatRequest::new(messages).with_temperature(self.settings.temperature);
        self.provider.stream_chat(request, model).await
    }

    /// Embeds `texts` in batches, preserving order.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embed_batch_size) {
            let embedded = self
                .provider
                .embed(batch, &self.settings.embedding_model)
                .await?;
            if embedded.len() != batch.len() {
                return Err(ApiError::Upstream(format!(
                    "{} returned {} embeddings for {} inputs",
                    self.provider.name(),
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ApiError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ApiError::Upstream("No embedding returned for query".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::core::config::AppSettings;

    #[derive(Default)]
    struct RecordingProvider {
        batches: Mutex<Vec<usize>>,
        temperatures: Mutex<Vec<Option<f64>>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        async fn chat(&self, request: ChatRequest, model_id: &str) -> Result<String, ApiError> {
            self.temperatures.lock().unwrap().push(request.temperature);
            Ok(format!("{}:{}", model_id, request.messages.len()))
        }

        async fn stream_chat(
            &self,
            _request: ChatRequest,
            _model_id: &str,
        ) -> Result<TokenStream, ApiError> {
            let (tx, rx) = mpsc::channel(1);
            drop(tx);
            Ok(rx)
        }

        async fn embed(&self, inputs: &[String], _model_id: &str) -> Result<Vec<Vec<f32>>, ApiError> {
            self.batches.lock().unwrap().push(inputs.len());
            Ok(inputs.iter().map(|s| vec![s.len() as f32]).collect())
        }
    }

    fn service(provider: Arc<RecordingProvider>, batch: usize) -> LlmService {
        let mut settings = AppSettings::default().llm;
        settings.temperature = Some(0.25);
        LlmService::new(provider, settings, batch)
    }

    #[test]
    fn resolves_default_and_allowed_models() {
        let svc = service(Arc::new(RecordingProvider::default()), 8);
        assert_eq!(svc.resolve_model(None).unwrap(), "gpt-4o-mini");
        assert_eq!(svc.resolve_model(Some("  ")).unwrap(), "gpt-4o-mini");
        assert_eq!(svc.resolve_model(Some("gpt-4o")).unwrap(), "gpt-4o");
        assert!(matches!(
            svc.resolve_model(Some("davinci")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn embeds_in_batches_and_keeps_order() {
        let provider = Arc::new(RecordingProvider::default());
        let svc = service(provider.clone(), 2);
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = svc.embed_documents(&texts).await.unwrap();
        assert_eq!(
            vectors,
            vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0], vec![5.0]]
        );
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn chat_applies_configured_temperature() {
        let provider = Arc::new(RecordingProvider::default());
        let svc = service(provider.clone(), 2);
        let answer = svc
            .chat(vec![ChatMessage::user("hi")], "gpt-4o")
            .await
            .unwrap();
        assert_eq!(answer, "gpt-4o:1");
        assert_eq!(*provider.temperatures.lock().unwrap(), vec![Some(0.25)]);
    }
}
