//! Status surfaces: last command, supervisor health, performance history
//! and the append-only performance log.

use crate::error::ApiResult;
use crate::state::AppState;
use crate::web_model::{PerfAppendRequest, PerfLogQuery};
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use orac_pipeline::PerfRecord;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /v1/status/last-command
pub async fn last_command(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.last_command.snapshot();
    Json(json!({ "status": "success", "last_command": snapshot }))
}

/// GET /v1/status/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let sessions = state.supervisor.health().await;
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "sessions": sessions,
    }))
}

/// GET /v1/status/performance
pub async fn performance(State(state): State<Arc<AppState>>) -> Json<Value> {
    let (trend, averages, stage_averages, latest) = {
        let history = match state.history.lock() {
            Ok(history) => history,
            Err(poisoned) => poisoned.into_inner(),
        };
        (
            history.trend(),
            history.average_duration(),
            history.stage_averages(),
            history
                .latest(5)
                .iter()
                .map(|c| json!({ "command_id": c.command_id, "breakdown": c.breakdown() }))
                .collect::<Vec<_>>(),
        )
    };
    Json(json!({
        "status": "success",
        "trend": trend,
        "average_duration_ms": averages,
        "stage_averages_ms": stage_averages,
        "recent": latest,
    }))
}

/// POST /v1/performance/log
pub async fn append_log(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PerfAppendRequest>,
) -> ApiResult<Json<Value>> {
    let record = PerfRecord {
        timestamp: Utc::now(),
        command: request.command,
        topic: request.topic,
        elapsed_ms: request.elapsed_ms,
        success: request.success,
        config_notes: request.config_notes,
    };
    state.perf_log.append(&record).await?;
    Ok(Json(json!({ "status": "success" })))
}

/// GET /v1/performance/log
pub async fn read_log(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PerfLogQuery>,
) -> ApiResult<Json<Value>> {
    let records = state.perf_log.read(query.limit.unwrap_or(100)).await?;
    Ok(Json(json!({ "status": "success", "records": records })))
}

/// DELETE /v1/performance/log
pub async fn clear_log(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    state.perf_log.clear().await?;
    Ok(Json(json!({ "status": "success" })))
}
