//! Request/response DTOs for the HTTP surface.

use chrono::{DateTime, Utc};
use orac_backends::{BackendType, ConnectionConfig, MappingPatch};
use orac_pipeline::HeartbeatStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateBackendRequest {
    pub name: String,
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: BackendType,
    pub connection: ConnectionConfig,
}

fn default_backend_type() -> BackendType {
    BackendType::HomeAssistant
}

#[derive(Debug, Deserialize)]
pub struct UpdateBackendRequest {
    pub name: Option<String>,
    pub connection: Option<ConnectionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct BulkEntityUpdate {
    pub entity_ids: Vec<String>,
    pub updates: MappingPatch,
}

#[derive(Debug, Deserialize)]
pub struct AddLabelRequest {
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct LinkBackendRequest {
    pub backend_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestCommandRequest {
    pub command: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct EntityQuery {
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEntityQuery {
    pub strict: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CacheListQuery {
    pub limit: Option<usize>,
    pub topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PerfLogQuery {
    pub limit: Option<usize>,
}

/// One topic's status inside a heartbeat from an STT instance.
#[derive(Debug, Deserialize)]
pub struct TopicHeartbeat {
    pub name: String,
    pub status: HeartbeatStatus,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default)]
    pub wake_word: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub instance_id: String,
    pub source: String,
    pub topics: Vec<TopicHeartbeat>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub topics_processed: usize,
    pub topics_created: usize,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct PerfAppendRequest {
    pub command: String,
    pub topic: String,
    pub elapsed_ms: f64,
    pub success: bool,
    #[serde(default)]
    pub config_notes: Option<String>,
}
