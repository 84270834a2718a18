//! Generation endpoint: the external face of the pipeline.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use orac_pipeline::{GenerateRequest, GenerateResponse};
use std::sync::Arc;

/// POST /v1/generate/:topic_id
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Path(topic_id): Path<String>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let response = state.pipeline.generate(&topic_id, request).await?;
    Ok(Json(response))
}
