//! Persistent per-backend record: connection, device mappings, vocabularies
//! and status/statistics blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device types seeded into every new backend. Operators can extend the set
/// before assigning any mapping.
pub const DEFAULT_DEVICE_TYPES: [&str; 5] =
    ["lights", "heating", "media_player", "blinds", "switches"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    HomeAssistant,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::HomeAssistant => "homeassistant",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for the backend's native client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_verify_ssl() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    10
}

/// Operator-authored labels attached to one backend entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMapping {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub domain: String,
}

impl DeviceMapping {
    /// Enabled with both labels set: eligible for grammar generation and
    /// command resolution.
    pub fn is_complete(&self) -> bool {
        self.enabled && !self.device_type.is_empty() && !self.location.is_empty()
    }
}

/// Partial update for a mapping. Absent fields keep their current value;
/// in particular `original_name` and `domain` survive label-only patches.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MappingPatch {
    pub enabled: Option<bool>,
    pub device_type: Option<String>,
    pub location: Option<String>,
    pub original_name: Option<String>,
    pub domain: Option<String>,
}

impl MappingPatch {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.device_type.is_none()
            && self.location.is_none()
            && self.original_name.is_none()
            && self.domain.is_none()
    }

    pub fn apply_to(&self, mapping: &mut DeviceMapping) {
        if let Some(enabled) = self.enabled {
            mapping.enabled = enabled;
        }
        if let Some(ref device_type) = self.device_type {
            mapping.device_type = device_type.clone();
        }
        if let Some(ref location) = self.location {
            mapping.location = location.clone();
        }
        if let Some(ref original_name) = self.original_name {
            mapping.original_name = original_name.clone();
        }
        if let Some(ref domain) = self.domain {
            mapping.domain = domain.clone();
        }
    }
}

/// Connectivity block, refreshed by probes and entity fetches.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackendStatus {
    #[serde(default)]
    pub connected: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackendStatistics {
    #[serde(default)]
    pub total_entities: usize,
    #[serde(default)]
    pub enabled_entities: usize,
    #[serde(default)]
    pub configured_entities: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

/// One backend's full persistent state. Written as a single JSON document
/// under `backends/<id>.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub backend_type: BackendType,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub device_mappings: BTreeMap<String, DeviceMapping>,
    #[serde(default)]
    pub device_types: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub status: BackendStatus,
    #[serde(default)]
    pub statistics: BackendStatistics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BackendRecord {
    /// Mappings that count for grammar generation and dispatch.
    pub fn complete_mappings(&self) -> impl Iterator<Item = (&String, &DeviceMapping)> {
        self.device_mappings.iter().filter(|(_, m)| m.is_complete())
    }

    /// Resolve a `(device_type, location)` pair to an entity id through the
    /// enabled, complete mappings. Comparison is case-insensitive.
    pub fn resolve_entity(&self, device_type: &str, location: &str) -> Option<(&String, &DeviceMapping)> {
        self.complete_mappings().find(|(_, m)| {
            m.device_type.eq_ignore_ascii_case(device_type)
                && m.location.eq_ignore_ascii_case(location)
        })
    }

    pub fn refresh_statistics(&mut self) {
        self.statistics.total_entities = self.device_mappings.len();
        self.statistics.enabled_entities =
            self.device_mappings.values().filter(|m| m.enabled).count();
        self.statistics.configured_entities =
            self.device_mappings.values().filter(|m| m.is_complete()).count();
    }
}

/// A `(device_type, location)` pair claimed by more than one enabled mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingConflict {
    pub device_type: String,
    pub location: String,
    pub entity_ids: Vec<String>,
}

/// One entity as reported by a backend's native API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub domain: String,
    pub original_name: String,
    pub state: Option<String>,
}
