use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::loader::DocumentKind;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDocRequest {
    pub file_id: i64,
}

pub async fn upload_doc(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let upload = &state.settings.upload;
    let mut received: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(base_name)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Uploaded file has no filename".to_string()))?;

        if !upload.accepts(&filename) || DocumentKind::from_filename(&filename).is_err() {
            return Err(ApiError::BadRequest(format!(
                "Unsupported file type. Allowed types are: {}",
                upload.allowed_extensions.join(", ")
            )));
        }

        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.len() > upload.max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "{} exceeds the upload limit of {} bytes",
                filename, upload.max_bytes
            )));
        }

        received = Some((filename, bytes.to_vec()));
        break;
    }

    let (filename, bytes) =
        received.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;

    state.credentials.require()?;

    let file_id = state.documents.insert(&filename).await?;
    match state.indexer.index_document(file_id, &filename, bytes).await {
        Ok(chunks) => Ok(Json(json!({
            "message": format!("File {} successfully uploaded and indexed.", filename),
            "fileId": file_id,
            "chunks": chunks,
        }))),
        Err(err) => {
            tracing::error!(file_id, filename = %filename, "Indexing failed: {}", err);
            if let Err(cleanup) = state.documents.delete(file_id).await {
                tracing::error!(file_id, "Failed to remove document record: {}", cleanup);
            }
            Err(ApiError::Internal(format!("Failed to index {}.", filename)))
        }
    }
}

pub async fn list_docs(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let documents = state.documents.list().await?;
    Ok(Json(documents))
}

pub async fn delete_doc(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<DeleteDocRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let file_id = payload.file_id;
    if state.documents.get(file_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "No document with fileId {}",
            file_id
        )));
    }

    state.indexer.remove_document(file_id).await.map_err(|e| {
        ApiError::Internal(format!(
            "Failed to delete file with fileId {} from the vector store: {}",
            file_id, e
        ))
    })?;

    if !state.documents.delete(file_id).await? {
        return Err(ApiError::Internal(format!(
            "Deleted vectors but failed to delete document with fileId {} from the database.",
            file_id
        )));
    }

    Ok(Json(json!({
        "message": format!("Successfully deleted file with fileId {} from the system.", file_id)
    })))
}

pub async fn clear_all_docs(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let chunks = state.indexer.clear().await?;
    let documents = state.documents.clear().await?;
    tracing::info!(documents, chunks, "Cleared all documents");
    Ok(Json(json!({
        "message": "Successfully cleared all documents",
        "documents": documents,
        "chunks": chunks,
    })))
}

/// Strips any client-supplied directory components.
fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim().to_string()
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Uploaded file exceeds the upload limit".to_string())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_drops_directories() {
        assert_eq!(base_name("report.pdf"), "report.pdf");
        assert_eq!(base_name("../../etc/passwd.txt"), "passwd.txt");
        assert_eq!(base_name("C:\\Users\\me\\notes.docx"), "notes.docx");
    }
}
