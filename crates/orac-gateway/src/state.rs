//! Shared application state threaded through every handler.

use orac_backends::{AdapterRegistry, MappingStore};
use orac_core::CoreConfig;
use orac_llm::{LlamaSupervisor, ModelCatalog};
use orac_pipeline::{
    CommandHistory, GenerationPipeline, LastCommandStore, PerformanceLog, SttResponseCache,
    TopicRegistry,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub struct AppState {
    pub config: Arc<CoreConfig>,
    pub store: Arc<MappingStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub topics: Arc<TopicRegistry>,
    pub cache: Arc<SttResponseCache>,
    pub pipeline: GenerationPipeline,
    pub supervisor: Arc<LlamaSupervisor>,
    pub last_command: Arc<LastCommandStore>,
    pub history: Arc<Mutex<CommandHistory>>,
    pub perf_log: Arc<PerformanceLog>,
    pub catalog: Arc<ModelCatalog>,
    pub started_at: Instant,
}
