//! Topic CRUD, backend linkage and heartbeat ingest.
//!
//! Heartbeat ingest is a separate path from topic update and may only
//! touch heartbeat fields.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::web_model::{HeartbeatRequest, HeartbeatResponse, LinkBackendRequest};
use axum::extract::{Path, State};
use axum::Json;
use orac_core::Error;
use orac_pipeline::{HeartbeatUpdate, TopicUpdate};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Apply soft-reference semantics: a topic linked to a deleted backend
/// reads as unlinked.
async fn resolve_linkage(state: &AppState, topic: &mut orac_pipeline::Topic) {
    let exists = match topic.backend_id.as_deref() {
        Some(id) => state.store.contains(id).await,
        None => false,
    };
    topic.backend_id = state.topics.effective_backend_id(topic, exists);
}

/// GET /v1/topics
pub async fn list_topics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut topics = state.topics.list().await;
    for topic in topics.values_mut() {
        resolve_linkage(&state, topic).await;
    }
    Json(json!({ "status": "success", "topics": topics }))
}

/// GET /v1/topics/:id
pub async fn get_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let mut topic = state
        .topics
        .get(&topic_id)
        .await
        .ok_or_else(|| ApiError(Error::not_found(format!("topic '{topic_id}'"))))?;
    resolve_linkage(&state, &mut topic).await;
    Ok(Json(json!({ "status": "success", "topic": topic })))
}

/// PUT /v1/topics/:id
pub async fn update_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
    Json(update): Json<TopicUpdate>,
) -> ApiResult<Json<Value>> {
    if let Some(ref backend_id) = update.backend_id {
        if !state.store.contains(backend_id).await {
            return Err(ApiError(Error::not_found(format!(
                "backend '{backend_id}'"
            ))));
        }
    }
    let topic = state.topics.update(&topic_id, update).await?;
    Ok(Json(json!({ "status": "success", "topic": topic })))
}

/// DELETE /v1/topics/:id
pub async fn delete_topic(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.topics.delete(&topic_id).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("topic {topic_id} deleted"),
    })))
}

/// POST /v1/topics/:id/link-backend
pub async fn link_backend(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
    Json(request): Json<LinkBackendRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(ref backend_id) = request.backend_id {
        if !state.store.contains(backend_id).await {
            return Err(ApiError(Error::not_found(format!(
                "backend '{backend_id}'"
            ))));
        }
    }
    let topic = state
        .topics
        .link_backend(&topic_id, request.backend_id)
        .await?;
    Ok(Json(json!({ "status": "success", "topic": topic })))
}

/// POST /v1/topics/heartbeat
pub async fn receive_heartbeat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<HeartbeatResponse>> {
    info!(
        source = %request.source,
        instance = %request.instance_id,
        topics = request.topics.len(),
        "heartbeat received"
    );

    let mut created = 0;
    let mut processed = 0;
    for topic_hb in &request.topics {
        let topic_id = topic_hb.name.to_lowercase().replace(' ', "_");
        if state.topics.get(&topic_id).await.is_none() {
            created += 1;
        }
        state
            .topics
            .update_heartbeat(
                &topic_id,
                HeartbeatUpdate {
                    status: Some(topic_hb.status),
                    wake_word: topic_hb.wake_word.clone(),
                    trigger_count: (topic_hb.trigger_count > 0).then_some(topic_hb.trigger_count),
                    last_seen: request.timestamp,
                },
            )
            .await?;
        processed += 1;
    }

    Ok(Json(HeartbeatResponse {
        status: "ok",
        topics_processed: processed,
        topics_created: created,
        message: format!("processed {processed} topics, created {created} new"),
    }))
}

/// GET /v1/topics/heartbeat/status
pub async fn heartbeat_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let summary = state.topics.heartbeat_summary().await;
    Json(json!({ "status": "success", "heartbeat": summary }))
}
