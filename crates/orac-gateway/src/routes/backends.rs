//! Backend management: CRUD, entities, vocabularies, validation and
//! grammar operations.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::web_model::{
    AddLabelRequest, BulkEntityUpdate, CreateBackendRequest, EntityQuery, TestCommandRequest,
    UpdateBackendRequest, UpdateEntityQuery,
};
use axum::extract::{Path, Query, State};
use axum::Json;
use orac_backends::grammar::GrammarGenerator;
use orac_backends::MappingPatch;
use orac_core::Error;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

fn generator(state: &AppState) -> GrammarGenerator {
    GrammarGenerator::new(state.config.grammars_dir())
}

/// Regenerate the backend's grammar after a mapping change and cycle any
/// inference session that has the old one loaded. Best-effort: a backend
/// with no complete mappings yet simply has no grammar.
async fn regenerate_grammar(state: &AppState, backend_id: &str) {
    let Some(record) = state.store.get(backend_id).await else {
        return;
    };
    if !record.complete_mappings().any(|_| true) {
        return;
    }
    match generator(state).generate_and_save(&record).await {
        Ok(artifact) => {
            state
                .supervisor
                .restart_sessions_using_grammar(&artifact.path)
                .await;
        }
        Err(e) => warn!(backend = %backend_id, error = %e, "grammar regeneration failed"),
    }
}

/// POST /api/backends
pub async fn create_backend(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateBackendRequest>,
) -> ApiResult<Json<Value>> {
    let backend = state
        .store
        .create_backend(&request.name, request.backend_type, request.connection)
        .await?;
    Ok(Json(json!({ "status": "success", "backend": backend })))
}

/// GET /api/backends
pub async fn list_backends(State(state): State<Arc<AppState>>) -> Json<Value> {
    let backends = state.store.list().await;
    Json(json!({ "status": "success", "backends": backends }))
}

/// GET /api/backends/:id
pub async fn get_backend(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let backend = state.store.require(&backend_id).await?;
    Ok(Json(json!({ "status": "success", "backend": backend })))
}

/// PUT /api/backends/:id
pub async fn update_backend(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
    Json(request): Json<UpdateBackendRequest>,
) -> ApiResult<Json<Value>> {
    let connection_changed = request.connection.is_some();
    let backend = state
        .store
        .update_backend(&backend_id, request.name, request.connection)
        .await?;
    if connection_changed {
        state.adapters.invalidate(&backend_id);
    }
    Ok(Json(json!({ "status": "success", "backend": backend })))
}

/// DELETE /api/backends/:id
pub async fn delete_backend(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.store.delete_backend(&backend_id).await?;
    state.adapters.invalidate(&backend_id);
    Ok(Json(json!({
        "status": "success",
        "message": format!("backend {backend_id} deleted"),
    })))
}

/// POST /api/backends/:id/test
pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let adapter = state.adapters.get_or_create(&backend_id).await?;
    let result = adapter.test_connection().await;
    Ok(Json(json!({
        "status": if result.connected { "success" } else { "error" },
        "result": result,
    })))
}

/// POST /api/backends/:id/entities/fetch
pub async fn fetch_entities(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let adapter = state.adapters.get_or_create(&backend_id).await?;
    adapter.invalidate_entities().await;
    let entities = adapter.fetch_entities().await?;
    Ok(Json(json!({
        "status": "success",
        "count": entities.len(),
        "entities": entities,
    })))
}

/// GET /api/backends/:id/entities
pub async fn get_entities(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
    Query(query): Query<EntityQuery>,
) -> ApiResult<Json<Value>> {
    let backend = state.store.require(&backend_id).await?;
    let entities: Vec<Value> = backend
        .device_mappings
        .iter()
        .filter(|(_, mapping)| query.enabled.map_or(true, |wanted| mapping.enabled == wanted))
        .map(|(entity_id, mapping)| {
            let mut value = serde_json::to_value(mapping).unwrap_or(Value::Null);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("entity_id".to_string(), json!(entity_id));
            }
            value
        })
        .collect();
    Ok(Json(json!({ "status": "success", "entities": entities })))
}

/// PUT /api/backends/:id/entities/:entity_id
///
/// With `?strict=true`, a patch that leaves a duplicate
/// `(device_type, location)` pair on enabled mappings is a 409.
pub async fn update_entity(
    State(state): State<Arc<AppState>>,
    Path((backend_id, entity_id)): Path<(String, String)>,
    Query(query): Query<UpdateEntityQuery>,
    Json(patch): Json<MappingPatch>,
) -> ApiResult<Json<Value>> {
    if query.strict.unwrap_or(false) {
        // Dry-run the patch so a rejected request leaves the store untouched.
        let record = state.store.require(&backend_id).await?;
        let mut candidate = record
            .device_mappings
            .get(&entity_id)
            .cloned()
            .unwrap_or_default();
        patch.apply_to(&mut candidate);
        if candidate.is_complete() {
            let claimed_by = record
                .device_mappings
                .iter()
                .filter(|(id, _)| **id != entity_id)
                .find(|(_, m)| {
                    m.is_complete()
                        && m.device_type.eq_ignore_ascii_case(&candidate.device_type)
                        && m.location.eq_ignore_ascii_case(&candidate.location)
                });
            if let Some((other_id, _)) = claimed_by {
                return Err(ApiError(Error::conflict(format!(
                    "({}, {}) is already claimed by {other_id}",
                    candidate.device_type, candidate.location
                ))));
            }
        }
    }

    let mapping = state
        .store
        .upsert_entity(&backend_id, &entity_id, &patch)
        .await?;
    let conflicts = state.store.validate_mappings(&backend_id).await?;
    regenerate_grammar(&state, &backend_id).await;
    Ok(Json(json!({
        "status": "success",
        "entity": mapping,
        "conflicts": conflicts,
    })))
}

/// POST /api/backends/:id/entities/bulk
pub async fn bulk_update_entities(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
    Json(request): Json<BulkEntityUpdate>,
) -> ApiResult<Json<Value>> {
    let updated = state
        .store
        .bulk_upsert(&backend_id, &request.entity_ids, &request.updates)
        .await?;
    regenerate_grammar(&state, &backend_id).await;
    Ok(Json(json!({
        "status": "success",
        "updated": updated,
        "total": request.entity_ids.len(),
    })))
}

/// POST /api/backends/:id/device-types
pub async fn add_device_type(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
    Json(request): Json<AddLabelRequest>,
) -> ApiResult<Json<Value>> {
    let device_types = state
        .store
        .add_device_type(&backend_id, &request.label)
        .await?;
    Ok(Json(json!({ "status": "success", "device_types": device_types })))
}

/// POST /api/backends/:id/locations
pub async fn add_location(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
    Json(request): Json<AddLabelRequest>,
) -> ApiResult<Json<Value>> {
    let locations = state.store.add_location(&backend_id, &request.label).await?;
    Ok(Json(json!({ "status": "success", "locations": locations })))
}

/// GET /api/backends/:id/validate
pub async fn validate_mappings(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let conflicts = state.store.validate_mappings(&backend_id).await?;
    Ok(Json(json!({
        "status": "success",
        "valid": conflicts.is_empty(),
        "conflicts": conflicts,
    })))
}

/// POST /api/backends/:id/grammar/generate
pub async fn generate_grammar(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let adapter = state.adapters.get_or_create(&backend_id).await?;
    let output = adapter.generate_grammar().await;
    if output.is_empty() {
        let detail = output
            .metadata
            .error
            .unwrap_or_else(|| "no grammar produced".to_string());
        return Err(ApiError(Error::validation(detail)));
    }
    if let Some(ref path) = output.metadata.grammar_file {
        state.supervisor.restart_sessions_using_grammar(path).await;
    }
    Ok(Json(json!({ "status": "success", "result": output })))
}

/// GET /api/backends/:id/grammar/status
pub async fn grammar_status(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let backend = state.store.require(&backend_id).await?;
    let status = generator(&state).status(&backend).await;
    Ok(Json(json!({ "status": "success", "grammar": status })))
}

/// POST /api/backends/:id/grammar/test
pub async fn test_command(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
    Json(request): Json<TestCommandRequest>,
) -> ApiResult<Json<Value>> {
    let backend = state.store.require(&backend_id).await?;
    let check = generator(&state).test_command(&backend, &request.command);
    Ok(Json(json!({ "status": "success", "result": check })))
}

/// GET /api/backends/:id/statistics
pub async fn get_statistics(
    State(state): State<Arc<AppState>>,
    Path(backend_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let adapter = state.adapters.get_or_create(&backend_id).await?;
    let stats = adapter.get_statistics().await;
    Ok(Json(json!({ "status": "success", "statistics": stats })))
}
