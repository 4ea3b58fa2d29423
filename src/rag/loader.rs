//! Plain-text extraction for uploaded documents.
//!
//! The parser is picked from the file extension:
//! - `.pdf`  via `pdf-extract`
//! - `.docx` by walking `word/document.xml` inside the zip container
//! - `.html`/`.htm` by stripping markup
//! - `.txt`  as UTF-8

use std::io::{Cursor, Read};
use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use crate::core::config::settings::file_extension;
use crate::core::errors::ApiError;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read PDF: {0}")]
    Pdf(String),
    #[error("failed to read DOCX: {0}")]
    Docx(String),
    #[error("{0} contains no extractable text")]
    Empty(String),
    #[error("extraction task failed: {0}")]
    Task(String),
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Unsupported(_) | LoadError::Empty(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Html,
    Text,
}

impl DocumentKind {
    pub fn from_filename(filename: &str) -> Result<Self, LoadError> {
        match file_extension(filename).as_deref() {
            Some(".pdf") => Ok(Self::Pdf),
            Some(".docx") => Ok(Self::Docx),
            Some(".html") | Some(".htm") => Ok(Self::Html),
            Some(".txt") => Ok(Self::Text),
            Some(other) => Err(LoadError::Unsupported(other.to_string())),
            None => Err(LoadError::Unsupported(filename.to_string())),
        }
    }
}

/// Extracts the text of an uploaded file.
pub async fn load_document(filename: &str, bytes: Vec<u8>) -> Result<String, LoadError> {
    let kind = DocumentKind::from_filename(filename)?;

    let text = match kind {
        DocumentKind::Pdf => tokio::task::spawn_blocking(move || extract_pdf(&bytes))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??,
        DocumentKind::Docx => tokio::task::spawn_blocking(move || extract_docx(&bytes))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))??,
        DocumentKind::Html => strip_html_tags(&String::from_utf8_lossy(&bytes)),
        DocumentKind::Text => decode_text(&bytes),
    };

    if text.trim().is_empty() {
        return Err(LoadError::Empty(filename.to_string()));
    }
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, LoadError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| LoadError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| LoadError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| LoadError::Docx(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| LoadError::Docx(e.to_string()))?;

    docx_xml_to_text(&xml)
}

/// Walks WordprocessingML: text runs, paragraph ends, tabs and breaks.
fn docx_xml_to_text(xml: &str) -> Result<String, LoadError> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text_run => {
                let unescaped = e.unescape().map_err(|err| LoadError::Docx(err.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LoadError::Docx(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(text)
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn hidden_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<!--.*?-->|<head\b.*?</head\s*>")
            .expect("valid regex")
    })
}

fn block_tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)</?(p|div|br|li|ul|ol|tr|table|h[1-6]|section|article|header|footer|blockquote|pre)\b[^>]*>")
            .expect("valid regex")
    })
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid regex"))
}

/// Drops markup, `script`/`style` bodies and comments; block elements become line breaks.
fn strip_html_tags(html: &str) -> String {
    let without_hidden = hidden_blocks().replace_all(html, " ");
    let with_breaks = block_tags().replace_all(&without_hidden, "\n");
    let without_tags = any_tag().replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);

    let lines: Vec<String> = decoded
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| !l.is_empty())
        .collect();

    lines.join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
