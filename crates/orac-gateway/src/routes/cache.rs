//! STT-response cache operations for operator surfaces.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::web_model::CacheListQuery;
use axum::extract::{Path, Query, State};
use axum::Json;
use orac_pipeline::pipeline::ERROR_CORRECTION_TIMEOUT;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /v1/cache/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.cache.stats().await;
    Json(json!({ "status": "success", "stats": stats }))
}

/// GET /v1/cache/entries
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheListQuery>,
) -> Json<Value> {
    let entries = state
        .cache
        .list(query.limit.unwrap_or(50), query.topic.as_deref())
        .await;
    Json(json!({ "status": "success", "entries": entries }))
}

/// DELETE /v1/cache
pub async fn clear(State(state): State<Arc<AppState>>) -> Json<Value> {
    let removed = state.cache.clear().await;
    Json(json!({ "status": "success", "removed": removed }))
}

/// DELETE /v1/cache/entries/:topic_id/:text
pub async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Path((topic_id, text)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let removed = state.cache.remove(&topic_id, &text).await;
    Ok(Json(json!({ "status": "success", "removed": removed })))
}

/// POST /v1/cache/error-correction
///
/// Manual trigger for the same removal the error-correction phrases cause.
pub async fn trigger_error_correction(State(state): State<Arc<AppState>>) -> Json<Value> {
    let removed = state.cache.remove_last(ERROR_CORRECTION_TIMEOUT).await;
    Json(json!({
        "status": "success",
        "action": "error_correction",
        "result": if removed { "removed_last_entry" } else { "nothing_to_remove" },
    }))
}
