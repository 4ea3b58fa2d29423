use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let documents = state.documents.count().await?;
    let chunks = state.vector_store.count(None).await?;
    Ok(Json(json!({
        "status": "ok",
        "documents": documents,
        "chunks": chunks,
        "apiKeySet": state.credentials.is_set(),
    })))
}
