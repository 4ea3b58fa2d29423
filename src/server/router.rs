use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{chat, documents, health, sessions, settings};
use crate::state::AppState;

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Creates the application router with all routes and middleware.
///
/// This function sets up:
/// - CORS middleware
/// - Health check endpoint
/// - Chat, document and session endpoints
/// - Request body limit sized to the configured upload limit
pub fn router(state: Arc<AppState>) -> Router {
    let cors_layer = build_cors_layer(&state.settings.server.cors_allowed_origins);
    let body_limit = state
        .settings
        .upload
        .max_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health::health))
        .route("/setApiKey", post(settings::set_api_key))
        .route("/chat", post(chat::chat))
        .route("/uploadDoc", post(documents::upload_doc))
        .route("/listDocs", get(documents::list_docs))
        .route("/deleteDoc", post(documents::delete_doc))
        .route("/clearAllDocs", post(documents::clear_all_docs))
        .route("/clearSession/:session_id", post(sessions::clear_session))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:session_id/history", get(sessions::get_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

/// `"*"` (or an empty list) allows any origin; otherwise only the listed ones.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let session_header = HeaderName::from_static(chat::SESSION_ID_HEADER);
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers([session_header]);

    if origins.is_empty() || origins.iter().any(|origin| origin.trim() == "*") {
        return base.allow_origin(Any).allow_headers(Any);
    }

    let allowed = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect::<Vec<_>>();

    base.allow_origin(AllowOrigin::list(allowed))
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
}
