use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.chat_logs.clear_session(&session_id).await?;
    tracing::info!(session_id = %session_id, removed, "Cleared session");
    Ok(Json(json!({
        "message": format!("Successfully cleared session {}", session_id)
    })))
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.chat_logs.list_sessions().await?;
    Ok(Json(json!({ "sessions": sessions })))
}

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.chat_logs.get_chat_history(&session_id).await?;
    Ok(Json(json!({
        "sessionId": session_id,
        "messages": messages,
    })))
}
