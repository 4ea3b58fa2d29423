use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::AppSettings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 8] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "total_tokens", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("DOCCHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Public config with `secrets.yaml` merged on top.
    pub fn load_config(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        deep_merge(&public_config, &secrets_config)
    }

    /// Loads, validates and converts the merged config into typed settings.
    pub fn load_settings(&self) -> Result<AppSettings, ApiError> {
        let config = self.load_config();
        validate_config(&config)?;
        tracing::debug!(
            "Effective config: {}",
            redact_sensitive_values(&config)
        );
        Ok(AppSettings::from_config(&config))
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Ignoring malformed YAML in {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(err) => {
            tracing::warn!("Failed to read {}: {}", path.display(), err);
            Value::Object(Map::new())
        }
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

pub fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_in(dir: &Path) -> ConfigService {
        let paths = AppPaths::with_data_dir(dir.to_path_buf(), dir.join("data"));
        ConfigService::new(Arc::new(paths))
    }

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "llm": { "default_model": "gpt-4o-mini", "base_url": "https://api.openai.com/v1" },
            "rag": { "top_k": 2 }
        });
        let override_value = json!({
            "llm": { "api_key": "sk-test" },
            "rag": { "top_k": 4 }
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "llm": {
                    "default_model": "gpt-4o-mini",
                    "base_url": "https://api.openai.com/v1",
                    "api_key": "sk-test"
                },
                "rag": { "top_k": 4 }
            })
        );
    }

    #[test]
    fn redact_hides_api_keys_but_keeps_token_limits() {
        let input = json!({
            "llm": { "api_key": "sk-secret", "max_tokens": 512 },
            "items": [{ "password": "pw" }]
        });

        assert_eq!(
            redact_sensitive_values(&input),
            json!({
                "llm": { "api_key": "****", "max_tokens": 512 },
                "items": [{ "password": "****" }]
            })
        );
    }

    #[test]
    fn secrets_file_overrides_public_config() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_in(tmp.path());
        fs::write(
            tmp.path().join("data").join("config.yml"),
            "llm:\n  default_model: gpt-4o\nrag:\n  top_k: 3\n",
        )
        .unwrap();
        fs::write(service.secrets_path(), "llm:\n  api_key: sk-from-secrets\n").unwrap();

        let settings = service.load_settings().unwrap();
        assert_eq!(settings.llm.default_model, "gpt-4o");
        assert_eq!(settings.llm.api_key.as_deref(), Some("sk-from-secrets"));
        assert_eq!(settings.rag.top_k, 3);
    }

    #[test]
    fn malformed_yaml_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_in(tmp.path());
        fs::write(tmp.path().join("data").join("config.yml"), "rag: [unclosed").unwrap();

        let settings = service.load_settings().unwrap();
        assert_eq!(settings.rag.chunk_size, 1000);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let service = service_in(tmp.path());
        fs::write(
            tmp.path().join("data").join("config.yml"),
            "rag:\n  chunk_size: 100\n  chunk_overlap: 100\n",
        )
        .unwrap();

        assert!(service.load_settings().is_err());
    }
}
