use serde_json::{Map, Value};

use super::defaults::SUPPORTED_EXTENSIONS;
use super::settings::normalize_extension;
use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.base_url", "base_url")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.default_model", "default_model")?;
        validate_optional_string_field(llm, "llm.embedding_model", "embedding_model")?;
        validate_string_array_field(llm, "llm.allowed_models", "allowed_models")?;
        validate_u64_field(
            llm,
            "llm.request_timeout_secs",
            "request_timeout_secs",
            1,
            3_600,
        )?;
        validate_f64_field(llm, "llm.temperature", "temperature", 0.0, 2.0)?;
    }

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 1, 100_000)?;
        validate_u64_field(rag, "rag.chunk_overlap", "chunk_overlap", 0, 100_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 100)?;
        validate_u64_field(rag, "rag.embed_batch_size", "embed_batch_size", 1, 2_048)?;

        let chunk_size = rag.get("chunk_size").and_then(|v| v.as_u64());
        let overlap = rag.get("chunk_overlap").and_then(|v| v.as_u64());
        let size = chunk_size.unwrap_or(super::defaults::DEFAULT_CHUNK_SIZE as u64);
        let overlap = overlap.unwrap_or(super::defaults::DEFAULT_CHUNK_OVERLAP as u64);
        if overlap >= size {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at 'rag.chunk_overlap': {} must be smaller than chunk_size {}",
                overlap, size
            )));
        }
    }

    if let Some(upload) = expect_optional_object(root, "upload")? {
        validate_u64_field(upload, "upload.max_bytes", "max_bytes", 1, 1_000_000_000)?;
        validate_string_array_field(upload, "upload.allowed_extensions", "allowed_extensions")?;

        let configured = upload
            .get("allowed_extensions")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .filter(|ext| !ext.trim().is_empty());
        for ext in configured {
            let ext = normalize_extension(ext);
            if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "Invalid config at 'upload.allowed_extensions': no document parser for '{}' (supported: {})",
                    ext,
                    SUPPORTED_EXTENSIONS.join(", ")
                )));
            }
        }
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_empty_and_complete_configs() {
        assert!(validate_config(&json!({})).is_ok());
        assert!(validate_config(&json!({
            "server": { "host": "0.0.0.0", "port": 8000, "cors_allowed_origins": ["*"] },
            "llm": { "default_model": "gpt-4o", "temperature": 0.7, "request_timeout_secs": 60 },
            "rag": { "chunk_size": 800, "chunk_overlap": 100, "top_k": 4 },
            "upload": { "max_bytes": 1024, "allowed_extensions": [".pdf"] }
        }))
        .is_ok());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(validate_config(&json!([])).is_err());
        assert!(validate_config(&json!({ "rag": "fast" })).is_err());
        assert!(validate_config(&json!({ "llm": { "allowed_models": "gpt-4o" } })).is_err());
        assert!(validate_config(&json!({ "server": { "port": "eighty" } })).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(validate_config(&json!({ "rag": { "top_k": 0 } })).is_err());
        assert!(validate_config(&json!({ "llm": { "temperature": 3.5 } })).is_err());
        assert!(validate_config(&json!({ "server": { "port": 70000 } })).is_err());
    }

    #[test]
    fn allowed_extensions_must_have_a_parser() {
        let err = validate_config(&json!({
            "upload": { "allowed_extensions": [".pdf", ".md"] }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("'.md'"));
        assert!(validate_config(&json!({ "upload": { "allowed_extensions": ["exe"] } })).is_err());
        assert!(validate_config(&json!({
            "upload": { "allowed_extensions": ["PDF", " .Htm ", "docx", ".txt"] }
        }))
        .is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = validate_config(&json!({ "rag": { "chunk_size": 150 } })).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
        assert!(validate_config(&json!({ "rag": { "chunk_size": 150, "chunk_overlap": 50 } })).is_ok());
    }
}
