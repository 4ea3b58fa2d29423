pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ALLOWED_MODELS: [&str; 2] = ["gpt-4o-mini", "gpt-4o"];
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 2;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 5] = [".pdf", ".docx", ".txt", ".html", ".htm"];

/// Extensions the document loader has a parser for.
pub const SUPPORTED_EXTENSIONS: [&str; 5] = [".pdf", ".docx", ".txt", ".html", ".htm"];
