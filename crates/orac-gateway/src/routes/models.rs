//! Model listing: the gguf files on disk plus any catalog configuration.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /v1/models
pub async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let models = orac_llm::list_models(&state.config.models_dir).await?;
    let configured: Vec<&String> = state.catalog.models().map(|(name, _)| name).collect();
    Ok(Json(json!({
        "status": "success",
        "models": models,
        "configured": configured,
    })))
}
