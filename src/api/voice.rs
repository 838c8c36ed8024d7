//! Voice profile endpoints.

use super::{ApiError, ApiState};
use crate::voice::analytics::VoiceAnalytics;
use crate::voice::types::{
    Archetype, EditRecord, ProfileUpdate, ProfileVersionSnapshot, StyleProfile, ThreadEdit,
};
use crate::voice::EvolutionScore;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use std::sync::Arc;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// POST /voice/edits, POST /voice/edits/thread
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubmitEditRequest {
    user_id: String,
    content_id: String,
    #[serde(default)]
    position: Option<u32>,
    original_text: String,
    edited_text: String,
}

/// Stores the edit and returns immediately; learning happens later.
pub(super) async fn submit_edit(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SubmitEditRequest>,
) -> Result<(StatusCode, Json<EditRecord>), ApiError> {
    let record = state
        .service
        .submit_edit(
            &request.user_id,
            &request.content_id,
            request.position,
            &request.original_text,
            &request.edited_text,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubmitThreadEditRequest {
    user_id: String,
    content_id: String,
    tweets: Vec<ThreadEdit>,
}

pub(super) async fn submit_thread_edit(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SubmitThreadEditRequest>,
) -> Result<(StatusCode, Json<Vec<EditRecord>>), ApiError> {
    let records = state
        .service
        .submit_thread_edit(&request.user_id, &request.content_id, &request.tweets)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(records)))
}

// ---------------------------------------------------------------------------
// Profile reads
// ---------------------------------------------------------------------------

pub(super) async fn get_profile(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> ApiResult<StyleProfile> {
    Ok(Json(state.service.get_profile(&user_id).await?))
}

pub(super) async fn get_evolution_score(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> ApiResult<EvolutionScore> {
    Ok(Json(state.service.get_evolution_score(&user_id).await?))
}

pub(super) async fn get_analytics(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> ApiResult<VoiceAnalytics> {
    Ok(Json(state.service.get_analytics(&user_id).await?))
}

pub(super) async fn profile_history(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<ProfileVersionSnapshot>> {
    Ok(Json(state.service.profile_history(&user_id).await?))
}

// ---------------------------------------------------------------------------
// Profile writes
// ---------------------------------------------------------------------------

pub(super) async fn put_profile(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<StyleProfile> {
    Ok(Json(state.service.put_profile(&user_id, update).await?))
}

pub(super) async fn reset_profile(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> ApiResult<StyleProfile> {
    Ok(Json(state.service.reset_profile(&user_id).await?))
}

#[derive(Deserialize)]
pub(super) struct RollbackRequest {
    version: i64,
}

pub(super) async fn rollback_profile(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<StyleProfile> {
    Ok(Json(
        state.service.rollback_profile(&user_id, request.version).await?,
    ))
}

#[derive(Deserialize)]
pub(super) struct AnalyzeTextRequest {
    text: String,
}

pub(super) async fn analyze_text(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(request): Json<AnalyzeTextRequest>,
) -> ApiResult<StyleProfile> {
    Ok(Json(state.service.analyze_text(&user_id, &request.text).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AnalyzeFileRequest {
    file_name: String,
    contents: String,
}

pub(super) async fn analyze_file(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(request): Json<AnalyzeFileRequest>,
) -> ApiResult<StyleProfile> {
    Ok(Json(
        state
            .service
            .analyze_file(&user_id, &request.file_name, &request.contents)
            .await?,
    ))
}

// ---------------------------------------------------------------------------
// Archetypes
// ---------------------------------------------------------------------------

pub(super) async fn list_archetypes(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<Vec<Archetype>> {
    let archetypes = state.service.list_archetypes().await?;
    Ok(Json(archetypes.as_ref().clone()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ApplyArchetypeRequest {
    archetype_id: String,
}

pub(super) async fn apply_archetype(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
    Json(request): Json<ApplyArchetypeRequest>,
) -> ApiResult<StyleProfile> {
    Ok(Json(
        state
            .service
            .apply_archetype(&user_id, &request.archetype_id)
            .await?,
    ))
}

// ---------------------------------------------------------------------------
// POST /voice/dead-letters/replay
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub(super) struct ReplayResponse {
    replayed: usize,
}

pub(super) async fn replay_dead_letters(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<ReplayResponse> {
    let replayed = state.service.replay_dead_letters().await?;
    if replayed > 0 {
        tracing::info!(replayed, "dead-lettered learning jobs replayed");
    }
    Ok(Json(ReplayResponse { replayed }))
}
