//! Axum route handlers for the character chat server.
//!
//! # Routes
//!
//! - `GET  /health`           : `{"status": "ok", "version": ..., "service": "persona-chat"}`
//! - `GET  /characters`       : configured characters
//! - `POST /switch_character` : `{"character": id}` → `SwitchResponse`
//! - `POST /chat`             : `ChatRequest` → `MessageResponse`
//! - `GET  /status`           : `StatusResponse`
//!
//! Switch and chat run on the blocking pool. Domain failures come back as
//! `200` with `error` set; only a panicked worker yields `500`.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::manager::{
    CharacterManager, ChatRequest, MessageResponse, PersonaSummary, StatusResponse,
    SwitchResponse,
};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CharacterManager>,
}

impl AppState {
    pub fn new(manager: CharacterManager) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }
}

/// Body of `POST /switch_character`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub character: String,
}

type HandlerError = (StatusCode, Json<Value>);

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/characters", get(characters_handler))
        .route("/switch_character", post(switch_handler))
        .route("/chat", post(chat_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health: liveness check.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "persona-chat",
    }))
}

/// GET /characters
async fn characters_handler(State(state): State<AppState>) -> Json<Vec<PersonaSummary>> {
    Json(state.manager.list_personas())
}

/// POST /switch_character
///
/// May load the base model on first use, so it runs off the async workers.
async fn switch_handler(
    State(state): State<AppState>,
    Json(request): Json<SwitchRequest>,
) -> Result<Json<SwitchResponse>, HandlerError> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.switch_persona(&request.character))
        .await
        .map(Json)
        .map_err(|join_error| worker_failed("Persona switch", join_error))
}

/// POST /chat
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<MessageResponse>, HandlerError> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.send(request))
        .await
        .map(Json)
        .map_err(|join_error| worker_failed("Generation", join_error))
}

/// GET /status
///
/// Waits for an in-flight switch or generation to finish.
async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, HandlerError> {
    let manager = Arc::clone(&state.manager);
    tokio::task::spawn_blocking(move || manager.get_status())
        .await
        .map(Json)
        .map_err(|join_error| worker_failed("Status", join_error))
}

fn worker_failed(what: &str, join_error: tokio::task::JoinError) -> HandlerError {
    let error_msg = format!("{what} panicked: {join_error}");
    log::error!("{}", error_msg);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": error_msg})),
    )
}
