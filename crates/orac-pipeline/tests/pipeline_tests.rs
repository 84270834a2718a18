//! End-to-end pipeline tests against a stub inference engine and a
//! scripted backend adapter: cache miss/hit flow, error correction,
//! dispatch-failure gating, grammar auto-generation and failure mapping.

use async_trait::async_trait;
use orac_backends::adapter::{
    AdapterStatistics, BackendAdapter, ConnectionTest, DispatchContext, DispatchResult,
    GrammarMetadata, GrammarOutput,
};
use orac_backends::grammar::{grammar_file_name, GrammarGenerator};
use orac_backends::{
    AdapterRegistry, BackendType, ConnectionConfig, EntityDescriptor, MappingPatch, MappingStore,
};
use orac_core::{CoreConfig, Error, Result};
use orac_llm::{GenerationResult, InferenceEngine, ModelCatalog, SessionSpec};
use orac_pipeline::*;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MODEL_JSON: &str = r#"{"device":"lights","action":"on","location":"lounge"}"#;

fn test_dir() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir =
        std::env::temp_dir().join(format!("orac-pipeline-test-{}-{}", std::process::id(), id));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}

// ===========================================================================
// stubs
// ===========================================================================

struct StubEngine {
    response: Mutex<String>,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
    last_spec: Mutex<Option<SessionSpec>>,
}

impl StubEngine {
    fn new(response: &str) -> Self {
        Self {
            response: Mutex::new(response.to_string()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
            last_spec: Mutex::new(None),
        }
    }

    fn set_response(&self, response: &str) {
        *self.response.lock().unwrap() = response.to_string();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> String {
        self.last_prompt.lock().unwrap().clone().unwrap_or_default()
    }

    fn last_spec(&self) -> Option<SessionSpec> {
        self.last_spec.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceEngine for StubEngine {
    async fn generate(
        &self,
        spec: &SessionSpec,
        prompt: &str,
        _deadline: Duration,
    ) -> Result<GenerationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        *self.last_spec.lock().unwrap() = Some(spec.clone());
        Ok(GenerationResult {
            text: self.response.lock().unwrap().clone(),
            token_count: Some(12),
            elapsed_ms: 5.0,
        })
    }
}

struct ScriptedAdapter {
    backend_id: String,
    store: Arc<MappingStore>,
    grammars_dir: PathBuf,
    dispatch_ok: AtomicBool,
    dispatch_calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn new(backend_id: &str, store: Arc<MappingStore>, grammars_dir: PathBuf) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            store,
            grammars_dir,
            dispatch_ok: AtomicBool::new(true),
            dispatch_calls: AtomicUsize::new(0),
        }
    }

    fn dispatch_calls(&self) -> usize {
        self.dispatch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    async fn fetch_entities(&self) -> Result<Vec<EntityDescriptor>> {
        Ok(Vec::new())
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
                        error: Some("backend not found".to_string()),
                    },
                }
            }
        };
        match GrammarGenerator::new(self.grammars_dir.clone())
            .generate_and_save(&record)
            .await
        {
            Ok(artifact) => GrammarOutput {
                grammar: artifact.text,
                schema: Value::Null,
                metadata: GrammarMetadata {
                    backend_id: record.id.clone(),
                    backend_name: record.name.clone(),
                    device_count: artifact.stats.valid_combination_count,
                    grammar_file: Some(artifact.path),
                    error: None,
                },
            },
            Err(e) => GrammarOutput {
                grammar: String::new(),
                schema: Value::Null,
                metadata: GrammarMetadata {
                    backend_id: record.id.clone(),
                    backend_name: record.name.clone(),
                    device_count: 0,
                    grammar_file: None,
                    error: Some(e.to_string()),
                },
            },
        }
    }

    async fn dispatch_command(
        &self,
        _command: &Value,
        _context: &DispatchContext,
    ) -> DispatchResult {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        if self.dispatch_ok.load(Ordering::SeqCst) {
            DispatchResult {
                success: true,
                message: "executed light.turn_on on light.lounge_lamp".to_string(),
                data: None,
                error: None,
                entity_id: Some("light.lounge_lamp".to_string()),
                backend_id: self.backend_id.clone(),
            }
        } else {
            DispatchResult::failure(&self.backend_id, "HA returned 500")
        }
    }

    async fn test_connection(&self) -> ConnectionTest {
        ConnectionTest {
            connected: true,
            message: "ok".to_string(),
            version: None,
            details: Value::Null,
        }
    }

    async fn get_statistics(&self) -> AdapterStatistics {
        AdapterStatistics {
            backend_type: "scripted".to_string(),
            device_count: 0,
            enabled_devices: 0,
            entities_cached: 0,
            last_error: None,
        }
    }

    async fn invalidate_entities(&self) {}
}

// ===========================================================================
// harness
// ===========================================================================

struct Harness {
    dir: PathBuf,
    backend_id: String,
    engine: Arc<StubEngine>,
    adapter: Arc<ScriptedAdapter>,
    cache: Arc<SttResponseCache>,
    topics: Arc<TopicRegistry>,
    last_command: Arc<LastCommandStore>,
    pipeline: GenerationPipeline,
    config: Arc<CoreConfig>,
}

async fn harness() -> Harness {
    let dir = test_dir();
    let config = Arc::new(CoreConfig::new(
        dir.join("data"),
        dir.join("models"),
        "llama-server",
    ));
    config.ensure_dirs().await.unwrap();

    let store = Arc::new(MappingStore::load(config.backends_dir()).await.unwrap());
    let backend = store
        .create_backend(
            "Home",
            BackendType::HomeAssistant,
            ConnectionConfig {
                url: "http://ha.local:8123".to_string(),
                token: String::new(),
                verify_ssl: true,
                timeout_secs: 10,
            },
        )
        .await
        .unwrap();
    store
        .upsert_entity(
            &backend.id,
            "light.lounge_lamp",
            &MappingPatch {
                enabled: Some(true),
                device_type: Some("lights".to_string()),
                location: Some("lounge".to_string()),
                original_name: Some("Lounge Lamp".to_string()),
                domain: Some("light".to_string()),
            },
        )
        .await
        .unwrap();

    let adapter = Arc::new(ScriptedAdapter::new(
        &backend.id,
        store.clone(),
        config.grammars_dir(),
    ));
    let adapters = Arc::new(AdapterRegistry::new(store.clone(), config.grammars_dir()));
    adapters.insert(&backend.id, adapter.clone());

    let topics = Arc::new(
        TopicRegistry::load(config.topics_file(), "Qwen3-0.6B-Q4_K_M.gguf".to_string())
            .await
            .unwrap(),
    );
    topics.get_or_autocreate("lounge").await.unwrap();
    topics
        .link_backend("lounge", Some(backend.id.clone()))
        .await
        .unwrap();

    let engine = Arc::new(StubEngine::new(MODEL_JSON));
    let cache = Arc::new(SttResponseCache::new(50, None));
    let last_command = Arc::new(LastCommandStore::new());
    let history = Arc::new(Mutex::new(CommandHistory::new(20)));

    let pipeline = GenerationPipeline::new(PipelineDeps {
        config: config.clone(),
        topics: topics.clone(),
        store: store.clone(),
        adapters: adapters.clone(),
        engine: engine.clone(),
        cache: cache.clone(),
        last_command: last_command.clone(),
        history,
        catalog: Arc::new(ModelCatalog::default()),
    });

    Harness {
        dir,
        backend_id: backend.id,
        engine,
        adapter,
        cache,
        topics,
        last_command,
        pipeline,
        config,
    }
}

fn request(prompt: &str) -> GenerateRequest {
    GenerateRequest {
        prompt: prompt.to_string(),
        ..GenerateRequest::default()
    }
}

// ===========================================================================
// scenarios
// ===========================================================================

#[tokio::test]
async fn wake_word_is_stripped_before_cache_and_model() {
    let h = harness().await;

    let response = h
        .pipeline
        .generate("lounge", request("Computer turn on the lounge light"))
        .await
        .unwrap();
    assert_eq!(response.status, "success");

    let prompt = h.engine.last_prompt();
    assert!(prompt.contains("turn on the lounge light"));
    assert!(!prompt.to_lowercase().contains("computer turn"));

    // Cached under the stripped, normalized text.
    assert!(h
        .cache
        .get("lounge", "turn on the lounge light")
        .await
        .is_some());
    cleanup(&h.dir);
}

#[tokio::test]
async fn miss_then_hit_skips_the_model_but_still_dispatches() {
    let h = harness().await;

    let first = h
        .pipeline
        .generate("lounge", request("Computer turn on the lounge light"))
        .await
        .unwrap();
    assert!(!first.cache_hit);
    assert_eq!(h.engine.calls(), 1);
    assert_eq!(h.adapter.dispatch_calls(), 1);
    assert!(first.dispatch.as_ref().unwrap().success);

    let second = h
        .pipeline
        .generate("lounge", request("computer turn on the lounge light"))
        .await
        .unwrap();
    assert!(second.cache_hit);
    assert_eq!(h.engine.calls(), 1, "no inference run for a cache hit");
    assert_eq!(h.adapter.dispatch_calls(), 2, "dispatch still happens");

    let first_json: Value = serde_json::from_str(&first.response).unwrap();
    let second_json: Value = serde_json::from_str(&second.response).unwrap();
    assert_eq!(first_json, second_json);
    cleanup(&h.dir);
}

#[tokio::test]
async fn error_correction_removes_entry_without_dispatching() {
    let h = harness().await;

    h.pipeline
        .generate("lounge", request("computer turn on the lounge light"))
        .await
        .unwrap();
    assert_eq!(h.cache.len().await, 1);

    let ack = h
        .pipeline
        .generate("lounge", request("computer error"))
        .await
        .unwrap();
    let ack_json: Value = serde_json::from_str(&ack.response).unwrap();
    assert_eq!(ack_json["action"], "error_correction");
    assert_eq!(ack_json["result"], "removed_last_entry");
    assert!(ack.dispatch.is_none());
    assert_eq!(h.engine.calls(), 1, "correction never runs the model");
    assert_eq!(h.adapter.dispatch_calls(), 1, "correction never dispatches");
    assert_eq!(h.cache.len().await, 0);

    // The same utterance is a miss again.
    h.pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap();
    assert_eq!(h.engine.calls(), 2);
    cleanup(&h.dir);
}

#[tokio::test]
async fn dispatch_failure_does_not_poison_the_cache() {
    let h = harness().await;
    h.adapter.dispatch_ok.store(false, Ordering::SeqCst);

    let response = h
        .pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap();
    // The model output is still returned alongside the dispatch error.
    assert_eq!(response.response, MODEL_JSON);
    let dispatch = response.dispatch.unwrap();
    assert!(!dispatch.success);
    assert!(dispatch.error.unwrap().contains("HA returned 500"));
    assert_eq!(h.cache.len().await, 0, "failures are never cached");

    // A replay is a miss again.
    h.pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap();
    assert_eq!(h.engine.calls(), 2);
    cleanup(&h.dir);
}

#[tokio::test]
async fn grammar_is_auto_generated_on_first_request() {
    let h = harness().await;
    let grammar_path = h
        .config
        .grammars_dir()
        .join(grammar_file_name(&h.backend_id));
    assert!(!grammar_path.exists());

    h.pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap();

    assert!(grammar_path.exists());
    let grammar = std::fs::read_to_string(&grammar_path).unwrap();
    assert!(grammar.contains("\"lights\""));
    assert!(grammar.contains("\"lounge\""));

    let spec = h.engine.last_spec().unwrap();
    assert_eq!(spec.grammar_file.as_deref(), Some(grammar_path.as_path()));
    assert!(
        h.engine.last_prompt().ends_with(r#"Assistant: {"device":""#),
        "prompt primes the JSON envelope"
    );
    cleanup(&h.dir);
}

#[tokio::test]
async fn grammar_prompt_lists_vocabulary_hint() {
    let h = harness().await;
    h.pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap();
    let prompt = h.engine.last_prompt();
    assert!(prompt.contains("Devices: [lights]"));
    assert!(prompt.contains("Locations: [lounge]"));
    assert!(prompt.contains("UNKNOWN"));
    cleanup(&h.dir);
}

#[tokio::test]
async fn disabled_topic_is_rejected() {
    let h = harness().await;
    let lounge = h.topics.get("lounge").await.unwrap();
    h.topics
        .update(
            "lounge",
            TopicUpdate {
                name: lounge.name,
                description: lounge.description,
                enabled: false,
                model: lounge.model,
                backend_id: lounge.backend_id,
                settings: lounge.settings,
                grammar: lounge.grammar,
            },
        )
        .await
        .unwrap();

    let err = h
        .pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(h.engine.calls(), 0);
    cleanup(&h.dir);
}

#[tokio::test]
async fn missing_linked_backend_is_not_found() {
    let h = harness().await;
    h.topics.get_or_autocreate("ghost").await.unwrap();
    h.topics
        .link_backend("ghost", Some("homeassistant_deadbeef".to_string()))
        .await
        .unwrap();

    let err = h
        .pipeline
        .generate("ghost", request("turn on the lounge light"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    cleanup(&h.dir);
}

#[tokio::test]
async fn unparseable_grammar_output_is_an_inference_error() {
    let h = harness().await;
    h.engine.set_response("definitely not json");

    let err = h
        .pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Inference(_)));
    assert_eq!(h.cache.len().await, 0);
    cleanup(&h.dir);
}

#[tokio::test]
async fn truncated_grammar_output_is_closed_and_dispatched() {
    let h = harness().await;
    h.engine
        .set_response(r#"{"device":"lights","action":"on","location":"lounge"#);

    let response = h
        .pipeline
        .generate("lounge", request("turn on the lounge light"))
        .await
        .unwrap();
    let parsed: Value = serde_json::from_str(&response.response).unwrap();
    assert_eq!(parsed["location"], "lounge");
    assert!(response.dispatch.unwrap().success);
    cleanup(&h.dir);
}

#[tokio::test]
async fn last_command_reflects_the_latest_request() {
    let h = harness().await;
    h.pipeline
        .generate("lounge", request("computer turn on the lounge light"))
        .await
        .unwrap();

    let snapshot = h.last_command.snapshot();
    assert_eq!(snapshot.status, CommandStatus::Complete);
    assert!(snapshot.success);
    assert_eq!(snapshot.topic.as_deref(), Some("lounge"));
    assert_eq!(snapshot.backend_id.as_deref(), Some(h.backend_id.as_str()));
    assert!(snapshot.generated_json.is_some());
    assert!(snapshot.elapsed_ms.is_some());

    // A hit flags the skip in timing.
    h.pipeline
        .generate("lounge", request("computer turn on the lounge light"))
        .await
        .unwrap();
    let snapshot = h.last_command.snapshot();
    assert!(snapshot.cache_hit);
    assert!(snapshot.timing.llm_skipped);
    cleanup(&h.dir);
}

#[tokio::test]
async fn unknown_topic_is_auto_discovered_by_generate() {
    let h = harness().await;
    let response = h
        .pipeline
        .generate("brand_new_topic", request("hello there"))
        .await
        .unwrap();
    assert_eq!(response.status, "success");
    let topic = h.topics.get("brand_new_topic").await.unwrap();
    assert!(topic.auto_discovered);
    cleanup(&h.dir);
}

#[tokio::test]
async fn request_sampling_overrides_win_over_topic_settings() {
    let h = harness().await;
    let mut req = request("turn on the lounge light");
    req.temperature = Some(0.05);
    req.max_tokens = Some(32);
    h.pipeline.generate("lounge", req).await.unwrap();

    let spec = h.engine.last_spec().unwrap();
    assert_eq!(spec.sampling.temperature, 0.05);
    assert_eq!(spec.sampling.max_tokens, 32);
    // Untouched fields fall through to the topic defaults.
    assert_eq!(spec.sampling.top_k, 40);
    cleanup(&h.dir);
}
