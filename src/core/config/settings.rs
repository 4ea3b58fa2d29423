//! Typed view over the merged YAML config.
//!
//! Every field has a default so an empty config yields a working server.

use serde_json::Value;

use super::defaults::*;

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub llm: LlmSettings,
    pub rag: RagSettings,
    pub upload: UploadSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// `"*"` allows any origin.
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub allowed_models: Vec<String>,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub embed_batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

impl AppSettings {
    pub fn from_config(config: &Value) -> Self {
        let server = config.get("server");
        let llm = config.get("llm");
        let rag = config.get("rag");
        let upload = config.get("upload");

        Self {
            server: ServerSettings {
                host: str_field(server, "host").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: u64_field(server, "port")
                    .and_then(|v| u16::try_from(v).ok())
                    .unwrap_or(DEFAULT_PORT),
                cors_allowed_origins: string_list(server, "cors_allowed_origins")
                    .unwrap_or_else(|| vec!["*".to_string()]),
            },
            llm: LlmSettings {
                base_url: str_field(llm, "base_url")
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                api_key: str_field(llm, "api_key").filter(|key| !key.trim().is_empty()),
                default_model: str_field(llm, "default_model")
                    .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
                allowed_models: string_list(llm, "allowed_models").unwrap_or_else(|| {
                    DEFAULT_ALLOWED_MODELS.iter().map(|m| m.to_string()).collect()
                }),
                embedding_model: str_field(llm, "embedding_model")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                request_timeout_secs: u64_field(llm, "request_timeout_secs")
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
                temperature: llm
                    .and_then(|v| v.get("temperature"))
                    .and_then(|v| v.as_f64()),
            },
            rag: RagSettings {
                chunk_size: usize_field(rag, "chunk_size").unwrap_or(DEFAULT_CHUNK_SIZE),
                chunk_overlap: usize_field(rag, "chunk_overlap").unwrap_or(DEFAULT_CHUNK_OVERLAP),
                top_k: usize_field(rag, "top_k").unwrap_or(DEFAULT_TOP_K),
                embed_batch_size: usize_field(rag, "embed_batch_size")
                    .unwrap_or(DEFAULT_EMBED_BATCH_SIZE),
            },
            upload: UploadSettings {
                max_bytes: usize_field(upload, "max_bytes").unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
                allowed_extensions: string_list(upload, "allowed_extensions")
                    .map(|list| list.iter().map(|ext| normalize_extension(ext)).collect())
                    .unwrap_or_else(|| {
                        DEFAULT_ALLOWED_EXTENSIONS
                            .iter()
                            .map(|ext| ext.to_string())
                            .collect()
                    }),
            },
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self::from_config(&Value::Null)
    }
}

impl LlmSettings {
    /// Whether `model` may be requested by a chat client.
    pub fn is_allowed(&self, model: &str) -> bool {
        self.allowed_models.iter().any(|m| m == model)
    }
}

impl UploadSettings {
    /// Extension check on a bare filename, case-insensitive.
    pub fn accepts(&self, filename: &str) -> bool {
        match file_extension(filename) {
            Some(ext) => self.allowed_extensions.iter().any(|allowed| *allowed == ext),
            None => false,
        }
    }
}

/// Lower-cased extension with its leading dot, e.g. `".pdf"`.
pub fn file_extension(filename: &str) -> Option<String> {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

/// `"PDF"` and `".pdf"` both become `".pdf"`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

fn str_field(section: Option<&Value>, key: &str) -> Option<String> {
    section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn u64_field(section: Option<&Value>, key: &str) -> Option<u64> {
    section.and_then(|v| v.get(key)).and_then(|v| v.as_u64())
}

fn usize_field(section: Option<&Value>, key: &str) -> Option<usize> {
    u64_field(section, key).and_then(|v| usize::try_from(v).ok())
}

fn string_list(section: Option<&Value>, key: &str) -> Option<Vec<String>> {
    let list: Vec<String> = section
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_array())?
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();

    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}
