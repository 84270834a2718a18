//! The capability surface every backend variant implements.
//!
//! A backend owns its native client and its command-execution strategy; the
//! rest of the system sees only these five operations. Nothing outside the
//! adapter registry branches on backend type.

use crate::record::EntityDescriptor;
use async_trait::async_trait;
use orac_core::Result;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

/// Context handed to dispatch: which topic asked for the command.
#[derive(Clone, Debug, Default)]
pub struct DispatchContext {
    pub topic_id: Option<String>,
}

/// Outcome of one dispatched command. Dispatch failures are data, not
/// errors: the pipeline embeds them in its response without aborting.
#[derive(Clone, Debug, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub backend_id: String,
}

impl DispatchResult {
    pub fn failure(backend_id: &str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: "command execution failed".to_string(),
            data: None,
            error: Some(error),
            entity_id: None,
            backend_id: backend_id.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GrammarMetadata {
    pub backend_id: String,
    pub backend_name: String,
    pub device_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `generate_grammar`: the text (empty when generation failed),
/// a JSON schema describing the envelope, and file metadata.
#[derive(Clone, Debug, Serialize)]
pub struct GrammarOutput {
    pub grammar: String,
    pub schema: Value,
    pub metadata: GrammarMetadata,
}

impl GrammarOutput {
    /// Generation produced nothing usable; the pipeline must refuse to run
    /// a grammar-constrained model from this.
    pub fn is_empty(&self) -> bool {
        self.grammar.is_empty()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ConnectionTest {
    pub connected: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub details: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct AdapterStatistics {
    pub backend_type: String,
    pub device_count: usize,
    pub enabled_devices: usize,
    pub entities_cached: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend_id(&self) -> &str;

    /// Pull current entities from the backend. Results are cached in memory
    /// until `invalidate_entities`. Connectivity failures surface through
    /// `get_statistics`, not here: callers get the error.
    async fn fetch_entities(&self) -> Result<Vec<EntityDescriptor>>;

    /// Derive the GBNF grammar for this backend's configured devices and
    /// write it to disk.
    async fn generate_grammar(&self) -> GrammarOutput;

    /// Resolve and execute one command. Never errors; failures are carried
    /// in the result.
    async fn dispatch_command(&self, command: &Value, context: &DispatchContext)
        -> DispatchResult;

    /// Cheap reachability probe.
    async fn test_connection(&self) -> ConnectionTest;

    async fn get_statistics(&self) -> AdapterStatistics;

    /// Drop the in-memory entity cache.
    async fn invalidate_entities(&self);
}
