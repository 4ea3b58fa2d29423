use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::core::errors::ApiError;
use crate::llm::TokenStream;
use crate::state::AppState;

pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: String,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let question = payload.question.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest("Question cannot be empty".to_string()));
    }

    let session_id = payload
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let session_header = HeaderValue::from_str(&session_id)
        .map_err(|_| ApiError::BadRequest("Invalid sessionId".to_string()))?;

    state.credentials.require()?;

    tracing::info!(
        session_id = %session_id,
        model = payload.model.as_deref().unwrap_or("default"),
        "Chat request: {}",
        question
    );

    let history = state.chat_logs.get_chat_history(&session_id).await?;
    let prepared = state
        .chain
        .answer_stream(&question, &history, payload.model.as_deref())
        .await?;

    let (tx, rx) = mpsc::channel::<Result<String, std::io::Error>>(64);
    tokio::spawn(forward_answer(
        state.clone(),
        prepared.tokens,
        tx,
        session_id,
        question,
        prepared.model,
    ));

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(SESSION_ID_HEADER, session_header);
    Ok(response)
}

/// Relays answer tokens to the response body and logs the exchange once the
/// answer is complete.
async fn forward_answer(
    state: Arc<AppState>,
    mut tokens: TokenStream,
    tx: mpsc::Sender<Result<String, std::io::Error>>,
    session_id: String,
    question: String,
    model: String,
) {
    let mut answer = String::new();

    while let Some(item) = tokens.recv().await {
        match item {
            Ok(token) => {
                if token.is_empty() {
                    continue;
                }
                answer.push_str(&token);
                if tx.send(Ok(token)).await.is_err() {
                    tracing::warn!(session_id = %session_id, "Client disconnected mid-answer");
                    return;
                }
            }
            Err(err) => {
                tracing::error!(session_id = %session_id, "Chat stream failed: {}", err);
                let _ = tx
                    .send(Err(std::io::Error::other(err.to_string())))
                    .await;
                return;
            }
        }
    }

    if answer.trim().is_empty() {
        tracing::error!(session_id = %session_id, "No answer received from the model");
        return;
    }

    match state
        .chat_logs
        .insert_log(&session_id, &question, &answer, &model)
        .await
    {
        Ok(_) => tracing::info!(
            session_id = %session_id,
            chars = answer.chars().count(),
            "Chat response logged"
        ),
        Err(err) => tracing::error!(session_id = %session_id, "Failed to log chat exchange: {}", err),
    }
}
