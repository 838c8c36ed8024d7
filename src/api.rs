//! HTTP API for the UI layer.
//!
//! Thin axum handlers over [`VoiceService`]. Saves return as soon as the edit
//! is stored; learning is never awaited here.

mod voice;

use crate::error::Error;
use crate::voice::VoiceService;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use std::sync::Arc;

/// Shared state for every handler.
pub struct ApiState {
    pub service: Arc<VoiceService>,
}

/// Build the router with every route mounted under `/api`.
pub fn router(service: Arc<VoiceService>) -> Router {
    let state = Arc::new(ApiState { service });

    let voice_routes = Router::new()
        .route("/edits", post(voice::submit_edit))
        .route("/edits/thread", post(voice::submit_thread_edit))
        .route(
            "/profiles/{user_id}",
            get(voice::get_profile).put(voice::put_profile),
        )
        .route("/profiles/{user_id}/score", get(voice::get_evolution_score))
        .route("/profiles/{user_id}/analytics", get(voice::get_analytics))
        .route("/profiles/{user_id}/history", get(voice::profile_history))
        .route("/profiles/{user_id}/reset", post(voice::reset_profile))
        .route("/profiles/{user_id}/rollback", post(voice::rollback_profile))
        .route("/profiles/{user_id}/analyze/text", post(voice::analyze_text))
        .route("/profiles/{user_id}/analyze/file", post(voice::analyze_file))
        .route("/profiles/{user_id}/archetype", post(voice::apply_archetype))
        .route("/archetypes", get(voice::list_archetypes))
        .route("/dead-letters/replay", post(voice::replay_dead_letters));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/voice", voice_routes)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Error wrapper so handlers can use `?` on service results.
pub(crate) struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        status_for(&self.0, message)
    }
}

fn status_for(error: &Error, message: String) -> Response {
    let status = match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict { .. } => StatusCode::CONFLICT,
        Error::Shared(inner) => return status_for(inner, message),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::warn!(%error, "voice api request failed");
        "internal error".to_string()
    } else {
        tracing::debug!(%error, status = status.as_u16(), "voice api request rejected");
        message
    };
    (status, Json(serde_json::json!({"error": body}))).into_response()
}
