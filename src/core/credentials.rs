use std::env;
use std::sync::{Arc, RwLock};

use crate::core::errors::ApiError;

/// Process-wide OpenAI API key.
///
/// Seeded from `OPENAI_API_KEY` or the secrets file at startup and replaceable
/// at runtime through `POST /setApiKey`. Never written back to disk.
#[derive(Clone, Default)]
pub struct ApiKeyStore {
    inner: Arc<RwLock<Option<String>>>,
}

impl ApiKeyStore {
    pub fn new(initial: Option<String>) -> Self {
        let initial = initial.filter(|key| !key.trim().is_empty());
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Environment takes precedence over the configured key.
    pub fn from_env_or(configured: Option<String>) -> Self {
        let from_env = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self::new(from_env.or(configured))
    }

    pub fn get(&self) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    pub fn set(&self, key: &str) -> Result<(), ApiError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(ApiError::BadRequest("API key cannot be empty".to_string()));
        }
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(key.to_string());
        Ok(())
    }

    /// Key for an outgoing request, or `ServiceUnavailable` when none is set.
    pub fn require(&self) -> Result<String, ApiError> {
        self.get().ok_or_else(|| {
            ApiError::ServiceUnavailable(
                "OpenAI API key is not set; call /setApiKey first".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_initial_key_counts_as_unset() {
        let store = ApiKeyStore::new(Some("   ".to_string()));
        assert!(!store.is_set());
        assert!(matches!(
            store.require(),
            Err(ApiError::ServiceUnavailable(_))
        ));
    }

    #[test]
    fn set_trims_and_is_visible_to_clones() {
        let store = ApiKeyStore::new(None);
        let shared = store.clone();
        store.set("  sk-test  ").unwrap();
        assert_eq!(shared.get().as_deref(), Some("sk-test"));
    }

    #[test]
    fn set_rejects_blank_keys() {
        let store = ApiKeyStore::new(Some("sk-old".to_string()));
        assert!(store.set("").is_err());
        assert_eq!(store.require().unwrap(), "sk-old");
    }
}
