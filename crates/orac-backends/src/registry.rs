//! Adapter registry: one cached adapter per backend id.
//!
//! This is the only place that branches on backend type.

use crate::adapter::BackendAdapter;
use crate::grammar::GrammarGenerator;
use crate::ha::{client::HomeAssistantClient, HomeAssistantAdapter};
use crate::record::BackendType;
use crate::store::MappingStore;
use dashmap::DashMap;
use orac_core::Result;
use std::path::PathBuf;
use std::sync::Arc;

pub struct AdapterRegistry {
    store: Arc<MappingStore>,
    grammars_dir: PathBuf,
    adapters: DashMap<String, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    pub fn new(store: Arc<MappingStore>, grammars_dir: PathBuf) -> Self {
        Self {
            store,
            grammars_dir,
            adapters: DashMap::new(),
        }
    }

    /// Return the adapter for a backend, constructing it on first use.
    pub async fn get_or_create(&self, backend_id: &str) -> Result<Arc<dyn BackendAdapter>> {
        if let Some(adapter) = self.adapters.get(backend_id) {
            return Ok(adapter.clone());
        }

        let record = self.store.require(backend_id).await?;
        let adapter: Arc<dyn BackendAdapter> = match record.backend_type {
            BackendType::HomeAssistant => {
                let client = HomeAssistantClient::new(&record.connection)?;
                Arc::new(HomeAssistantAdapter::new(
                    record.id.clone(),
                    self.store.clone(),
                    client,
                    GrammarGenerator::new(self.grammars_dir.clone()),
                ))
            }
        };

        self.adapters
            .insert(backend_id.to_string(), adapter.clone());
        Ok(adapter)
    }

    /// Drop a cached adapter, forcing reconstruction with fresh connection
    /// settings on next use. Called after connection updates and deletes.
    pub fn invalidate(&self, backend_id: &str) {
        self.adapters.remove(backend_id);
    }

    /// Install an adapter directly. Test seam: lets suites run the pipeline
    /// against a scripted backend.
    pub fn insert(&self, backend_id: &str, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(backend_id.to_string(), adapter);
    }
}
