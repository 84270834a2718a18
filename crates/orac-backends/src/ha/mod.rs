//! Home Assistant backend adapter.
//!
//! Owns its REST client and its internal dispatcher; users configure the
//! backend only. Command execution resolves `(device_type, location)`
//! through the mapping store, translates the action into a domain service
//! call, and executes it.

pub mod client;
pub mod dispatch;

use crate::adapter::{
    AdapterStatistics, BackendAdapter, ConnectionTest, DispatchContext, DispatchResult,
    GrammarMetadata, GrammarOutput,
};
use crate::grammar::GrammarGenerator;
use crate::record::{BackendStatus, EntityDescriptor};
use crate::store::MappingStore;
use async_trait::async_trait;
use chrono::Utc;
use client::HomeAssistantClient;
use orac_core::{Command, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

pub struct HomeAssistantAdapter {
    backend_id: String,
    store: Arc<MappingStore>,
    client: HomeAssistantClient,
    grammar: GrammarGenerator,
    entities: RwLock<Option<Vec<EntityDescriptor>>>,
    last_error: RwLock<Option<String>>,
}

impl HomeAssistantAdapter {
    pub fn new(
        backend_id: String,
        store: Arc<MappingStore>,
        client: HomeAssistantClient,
        grammar: GrammarGenerator,
    ) -> Self {
        Self {
            backend_id,
            store,
            client,
            grammar,
            entities: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    async fn note_error(&self, error: &str) {
        *self.last_error.write().await = Some(error.to_string());
        let status = BackendStatus {
            connected: false,
            last_check: Some(Utc::now()),
            version: None,
            error: Some(error.to_string()),
        };
        if let Err(e) = self.store.record_status(&self.backend_id, status).await {
            warn!(backend = %self.backend_id, error = %e, "failed to record backend status");
        }
    }
}

#[async_trait]
impl BackendAdapter for HomeAssistantAdapter {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    async fn fetch_entities(&self) -> Result<Vec<EntityDescriptor>> {
        if let Some(cached) = self.entities.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let states = match self.client.get_states().await {
            Ok(states) => states,
            Err(e) => {
                error!(backend = %self.backend_id, error = %e, "entity fetch failed");
                self.note_error(&e.to_string()).await;
                return Err(e);
            }
        };

        let descriptors: Vec<EntityDescriptor> =
            states.iter().map(|s| s.to_descriptor()).collect();
        info!(
            backend = %self.backend_id,
            count = descriptors.len(),
            "fetched entities from Home Assistant"
        );

        self.store
            .merge_fetched_entities(&self.backend_id, &descriptors)
            .await?;
        let status = BackendStatus {
            connected: true,
            last_check: Some(Utc::now()),
            version: None,
            error: None,
        };
        self.store.record_status(&self.backend_id, status).await?;
        *self.last_error.write().await = None;

        *self.entities.write().await = Some(descriptors.clone());
        Ok(descriptors)
    }

    async fn generate_grammar(&self) -> GrammarOutput {
        let record = match self.store.get(&self.backend_id).await {
            Some(record) => record,
            None => {
                return GrammarOutput {
                    grammar: String::new(),
                    schema: Value::Null,
                    metadata: GrammarMetadata {
                        backend_id: self.backend_id.clone(),
                        backend_name: String::new(),
                        device_count: 0,
                        grammar_file: None,
                        error: Some(format!("backend '{}' not found", self.backend_id)),
                    },
                }
            }
        };

        match self.grammar.generate_and_save(&record).await {
            Ok(artifact) => GrammarOutput {
                grammar: artifact.text,
                schema: command_schema(&artifact.stats.device_types, &artifact.stats.locations),
                metadata: GrammarMetadata {
                    backend_id: record.id.clone(),
                    backend_name: record.name.clone(),
                    device_count: artifact.stats.valid_combination_count,
                    grammar_file: Some(artifact.path),
                    error: None,
                },
            },
            Err(e) => {
                warn!(backend = %self.backend_id, error = %e, "grammar generation failed");
                GrammarOutput {
                    grammar: String::new(),
                    schema: Value::Null,
                    metadata: GrammarMetadata {
                        backend_id: record.id.clone(),
                        backend_name: record.name.clone(),
                        device_count: 0,
                        grammar_file: None,
                        error: Some(e.to_string()),
                    },
                }
            }
        }
    }

    async fn dispatch_command(
        &self,
        command: &Value,
        context: &DispatchContext,
    ) -> DispatchResult {
        let Some(command) = Command::from_json(command) else {
            return DispatchResult::failure(
                &self.backend_id,
                "command missing required fields (device, action)",
            );
        };

        if command.has_unknown() {
            return DispatchResult::failure(
                &self.backend_id,
                "cannot execute a command with UNKNOWN fields",
            );
        }

        let record = match self.store.get(&self.backend_id).await {
            Some(record) => record,
            None => {
                return DispatchResult::failure(
                    &self.backend_id,
                    format!("backend '{}' not found", self.backend_id),
                )
            }
        };

        let Some((entity_id, mapping)) =
            record.resolve_entity(&command.device, &command.location)
        else {
            return DispatchResult::failure(
                &self.backend_id,
                format!(
                    "no enabled device mapping for ({}, {})",
                    command.device, command.location
                ),
            );
        };

        let Some(action) = command.parsed_action() else {
            return DispatchResult::failure(
                &self.backend_id,
                format!("unrecognized action '{}'", command.action),
            );
        };

        let call = match dispatch::build_service_call(&mapping.domain, action, entity_id) {
            Ok(call) => call,
            Err(e) => return DispatchResult::failure(&self.backend_id, e),
        };

        info!(
            backend = %self.backend_id,
            topic = context.topic_id.as_deref().unwrap_or("-"),
            entity = %entity_id,
            domain = %call.domain,
            service = %call.service,
            "dispatching command"
        );

        match self
            .client
            .call_service(&call.domain, &call.service, call.data.clone())
            .await
        {
            Ok(response) => DispatchResult {
                success: true,
                message: format!("executed {}.{} on {entity_id}", call.domain, call.service),
                data: Some(json!({
                    "request": { "domain": call.domain, "service": call.service, "data": call.data },
                    "response": response,
                })),
                error: None,
                entity_id: Some(entity_id.clone()),
                backend_id: self.backend_id.clone(),
            },
            Err(e) => {
                error!(backend = %self.backend_id, entity = %entity_id, error = %e, "service call failed");
                self.note_error(&e.to_string()).await;
                let mut result = DispatchResult::failure(&self.backend_id, e.to_string());
                result.entity_id = Some(entity_id.clone());
                result
            }
        }
    }

    async fn test_connection(&self) -> ConnectionTest {
        match self.client.get_config().await {
            Ok(config) => {
                let version = config
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(String::from);
                let status = BackendStatus {
                    connected: true,
                    last_check: Some(Utc::now()),
                    version: version.clone(),
                    error: None,
                };
                let _ = self.store.record_status(&self.backend_id, status).await;
                *self.last_error.write().await = None;
                ConnectionTest {
                    connected: true,
                    message: "successfully connected to Home Assistant".to_string(),
                    version,
                    details: json!({
                        "url": self.client.url(),
                        "location_name": config.get("location_name"),
                        "time_zone": config.get("time_zone"),
                    }),
                }
            }
            Err(e) => {
                self.note_error(&e.to_string()).await;
                ConnectionTest {
                    connected: false,
                    message: "failed to connect to Home Assistant".to_string(),
                    version: None,
                    details: json!({ "url": self.client.url(), "error": e.to_string() }),
                }
            }
        }
    }

    async fn get_statistics(&self) -> AdapterStatistics {
        let record = self.store.get(&self.backend_id).await;
        let (device_count, enabled_devices) = record
            .map(|r| {
                (
                    r.device_mappings.len(),
                    r.device_mappings.values().filter(|m| m.enabled).count(),
                )
            })
            .unwrap_or((0, 0));
        AdapterStatistics {
            backend_type: "homeassistant".to_string(),
            device_count,
            enabled_devices,
            entities_cached: self
                .entities
                .read()
                .await
                .as_ref()
                .map(|e| e.len())
                .unwrap_or(0),
            last_error: self.last_error.read().await.clone(),
        }
    }

    async fn invalidate_entities(&self) {
        *self.entities.write().await = None;
    }
}

/// JSON schema for the command envelope, for clients that want to validate
/// model output themselves.
fn command_schema(device_types: &[String], locations: &[String]) -> Value {
    let mut devices: Vec<&str> = device_types.iter().map(String::as_str).collect();
    devices.push(orac_core::UNKNOWN);
    let mut locs: Vec<&str> = locations.iter().map(String::as_str).collect();
    locs.push(orac_core::UNKNOWN);
    json!({
        "type": "object",
        "properties": {
            "device": { "type": "string", "enum": devices },
            "action": { "type": "string" },
            "location": { "type": "string", "enum": locs },
        },
        "required": ["device", "action", "location"],
    })
}
