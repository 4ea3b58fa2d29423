use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetApiKeyQuery {
    pub api_key: String,
}

pub async fn set_api_key(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SetApiKeyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.credentials.set(&query.api_key)?;
    tracing::info!("OpenAI API key updated");
    Ok(Json(json!({"message": "API key set successfully"})))
}
