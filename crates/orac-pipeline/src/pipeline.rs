//! The per-utterance state machine: wake-word stripping, error-correction,
//! cache lookup, grammar resolution, constrained inference, dispatch and
//! success-gated cache write-back.

use crate::cache::SttResponseCache;
use crate::prompt;
use crate::status::{LastCommandStore, TimingInfo};
use crate::timing::{CommandHistory, Stage, TimedCommand};
use crate::topics::TopicRegistry;
use chrono::{DateTime, Utc};
use orac_backends::adapter::DispatchContext;
use orac_backends::grammar::grammar_file_name;
use orac_backends::{AdapterRegistry, MappingStore};
use orac_core::config::resolve_grammar_path;
use orac_core::{CoreConfig, Error, Result, SamplingOverrides};
use orac_llm::{InferenceEngine, ModelCatalog, SessionSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a cached entry can be undone by an error-correction phrase.
pub const ERROR_CORRECTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default ceiling for one inference call.
pub const DEFAULT_INFERENCE_DEADLINE: Duration = Duration::from_secs(60);

/// Timing metadata forwarded by the STT front-end.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UpstreamTiming {
    pub wake_word_time: Option<DateTime<Utc>>,
    pub recording_end_time: Option<DateTime<Utc>>,
    pub stt_start_time: Option<DateTime<Utc>>,
    pub stt_end_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub json_mode: Option<bool>,
    #[serde(default)]
    pub grammar_file: Option<String>,
    #[serde(default)]
    pub metadata: Option<UpstreamTiming>,
}

impl GenerateRequest {
    fn sampling_overrides(&self) -> SamplingOverrides {
        SamplingOverrides {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
            json_mode: self.json_mode,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct DispatchSummary {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub backend_id: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerateResponse {
    pub status: &'static str,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub elapsed_ms: f64,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchSummary>,
}

/// Everything the pipeline orchestrates.
pub struct PipelineDeps {
    pub config: Arc<CoreConfig>,
    pub topics: Arc<TopicRegistry>,
    pub store: Arc<MappingStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub engine: Arc<dyn InferenceEngine>,
    pub cache: Arc<SttResponseCache>,
    pub last_command: Arc<LastCommandStore>,
    pub history: Arc<Mutex<CommandHistory>>,
    pub catalog: Arc<ModelCatalog>,
}

pub struct GenerationPipeline {
    deps: PipelineDeps,
    inference_deadline: Duration,
    error_correction_timeout: Duration,
}

impl GenerationPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            inference_deadline: DEFAULT_INFERENCE_DEADLINE,
            error_correction_timeout: ERROR_CORRECTION_TIMEOUT,
        }
    }

    pub fn with_deadlines(
        mut self,
        inference_deadline: Duration,
        error_correction_timeout: Duration,
    ) -> Self {
        self.inference_deadline = inference_deadline;
        self.error_correction_timeout = error_correction_timeout;
        self
    }

    /// Run one utterance through the full pipeline.
    pub async fn generate(
        &self,
        topic_id: &str,
        request: GenerateRequest,
    ) -> Result<GenerateResponse> {
        let started = Instant::now();

        // Step A: bookkeeping.
        let timing_info = timing_from_metadata(request.metadata.as_ref());
        self.deps
            .last_command
            .begin(&request.prompt, topic_id, timing_info);

        let mut timed = TimedCommand::new();
        if let Some(metadata) = &request.metadata {
            if let Some(t) = metadata.wake_word_time {
                timed.mark_at(Stage::WakeWordDetected, t);
            }
            if let Some(t) = metadata.stt_start_time {
                timed.mark_at(Stage::SttRequestSent, t);
            }
            if let Some(t) = metadata.stt_end_time {
                timed.mark_at(Stage::SttTranscriptionReceived, t);
            }
        }

        match self.run(topic_id, &request, started, &mut timed).await {
            Ok(outcome) => {
                let success = outcome
                    .dispatch
                    .as_ref()
                    .map(|d| d.success)
                    .unwrap_or(true);
                self.deps.last_command.complete(outcome.elapsed_ms, success);
                self.finalize_timing(&request);
                if let Ok(mut history) = self.deps.history.lock() {
                    history.add(timed);
                }
                Ok(outcome)
            }
            Err(e) => {
                let elapsed_ms = ms_since(started);
                self.deps.last_command.fail(elapsed_ms, &e.to_string());
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        topic_id: &str,
        request: &GenerateRequest,
        started: Instant,
        timed: &mut TimedCommand,
    ) -> Result<GenerateResponse> {
        // Step B: wake-word stripping. The stripped text drives everything
        // downstream, the cache key included.
        let stripped = prompt::strip_wake_word(&request.prompt).to_string();

        // Step C: error-correction short-circuit. No model, no dispatch.
        if prompt::is_error_correction(&request.prompt) || prompt::is_error_correction(&stripped) {
            let removed = self
                .deps
                .cache
                .remove_last(self.error_correction_timeout)
                .await;
            let result = if removed {
                "removed_last_entry"
            } else {
                "nothing_to_remove"
            };
            info!(topic = %topic_id, result, "error correction handled");
            return Ok(GenerateResponse {
                status: "success",
                response: json!({ "action": "error_correction", "result": result }).to_string(),
                model: None,
                elapsed_ms: ms_since(started),
                cache_hit: false,
                dispatch: None,
            });
        }

        // Step D: topic resolution.
        let topic = self.deps.topics.get_or_autocreate(topic_id).await?;
        if !topic.enabled {
            return Err(Error::TopicDisabled(topic_id.to_string()));
        }
        self.deps.topics.mark_used(topic_id).await?;

        let model = request
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| topic.model.clone());
        if model.is_empty() {
            return Err(Error::validation(
                "no model configured for topic and none specified in request",
            ));
        }

        // Step E: cache lookup.
        let cached = self.deps.cache.get(topic_id, &stripped).await;
        let cache_hit = cached.is_some();
        let mut used_grammar = false;

        let response_text = match cached {
            Some(entry) => {
                self.deps.last_command.update(|state| {
                    state.cache_hit = true;
                    state.timing.cache_hit = true;
                    state.timing.llm_skipped = true;
                });
                info!(topic = %topic_id, text = %stripped, "cache hit, skipping inference");
                serde_json::to_string(&entry.json_output)?
            }
            None => {
                // Step F: grammar resolution.
                let grammar_file = self.resolve_grammar(request, &topic, topic_id).await?;
                used_grammar = grammar_file.is_some();

                // Step G: prompt formatting.
                let model_config = self.deps.catalog.get(&model);
                let force_json = request
                    .json_mode
                    .unwrap_or(topic.settings.force_json);
                let formatted = match &grammar_file {
                    Some(path) => {
                        let grammar_text = tokio::fs::read_to_string(path).await?;
                        let options = prompt::parse_grammar_options(&grammar_text);
                        prompt::format_grammar_prompt(&topic, &options, &stripped)
                    }
                    None => prompt::format_template_prompt(
                        &topic,
                        model_config,
                        request.system_prompt.as_deref(),
                        &stripped,
                        force_json,
                    ),
                };

                // Step H: inference. Sampling precedence is request over
                // topic over model default.
                let sampling = topic
                    .settings
                    .sampling()
                    .with_overrides(&request.sampling_overrides());
                let spec = SessionSpec {
                    model: model.clone(),
                    grammar_file: grammar_file.clone(),
                    sampling,
                };

                timed.mark(Stage::LlmInferenceStart);
                self.deps.last_command.update(|state| {
                    state.model = Some(model.clone());
                    state.timing.llm_start_time = Some(Utc::now());
                });
                let result = self
                    .deps
                    .engine
                    .generate(&spec, &formatted, self.inference_deadline)
                    .await?;
                timed.mark(Stage::LlmInferenceEnd);
                self.deps.last_command.update(|state| {
                    state.timing.llm_end_time = Some(Utc::now());
                });

                // Step I: close truncated JSON; never semantic repair.
                if grammar_file.is_some() {
                    prompt::repair_json_response(&result.text)
                } else {
                    result.text.trim().to_string()
                }
            }
        };

        // Step J: dispatch.
        let parsed: Option<Value> = serde_json::from_str(&response_text).ok();
        if used_grammar && parsed.is_none() {
            return Err(Error::inference(format!(
                "grammar-constrained output is not valid JSON after repair: {response_text}"
            )));
        }
        if let Some(parsed) = &parsed {
            self.deps.last_command.update(|state| {
                state.generated_json = Some(parsed.clone());
            });
        }

        let mut dispatch = None;
        if let Some(backend_id) = topic.backend_id.as_deref() {
            if !self.deps.store.contains(backend_id).await {
                return Err(Error::not_found(format!(
                    "linked backend '{backend_id}' for topic '{topic_id}'"
                )));
            }
            if let Some(parsed) = &parsed {
                let adapter = self.deps.adapters.get_or_create(backend_id).await?;
                let context = DispatchContext {
                    topic_id: Some(topic_id.to_string()),
                };

                timed.mark(Stage::DispatcherStart);
                timed.mark(Stage::HaApiCall);
                let result = adapter.dispatch_command(parsed, &context).await;
                timed.mark(Stage::HaResponse);
                timed.mark(Stage::DispatcherComplete);

                self.deps.last_command.update(|state| {
                    state.backend_id = Some(backend_id.to_string());
                    state.dispatch_result = serde_json::to_value(&result).ok();
                });
                if let Some(ref error) = result.error {
                    warn!(backend = %backend_id, %error, "dispatch failed");
                }

                // Step K: cache write-back only on miss + parsed JSON +
                // successful dispatch. Failures are never cached.
                if !cache_hit && result.success {
                    self.deps
                        .cache
                        .store(topic_id, &stripped, parsed.clone(), result.entity_id.clone())
                        .await;
                }

                dispatch = Some(DispatchSummary {
                    success: result.success,
                    message: result.message,
                    error: result.error,
                    entity_id: result.entity_id,
                    backend_id: result.backend_id,
                });
            } else {
                warn!(topic = %topic_id, "response is not JSON, skipping dispatch");
            }
        }

        // Step L: finalization happens in `generate`; report elapsed now.
        Ok(GenerateResponse {
            status: "success",
            response: response_text,
            model: Some(model),
            elapsed_ms: ms_since(started),
            cache_hit,
            dispatch,
        })
    }

    /// Grammar precedence: explicit request file, then the linked backend's
    /// generated grammar (auto-generating if missing), then the topic's
    /// static grammar. Missing files downgrade to no-grammar with a warning;
    /// a missing linked backend is an error.
    async fn resolve_grammar(
        &self,
        request: &GenerateRequest,
        topic: &crate::topics::Topic,
        topic_id: &str,
    ) -> Result<Option<PathBuf>> {
        let grammars_dir = self.deps.config.grammars_dir();

        if let Some(ref file) = request.grammar_file {
            let path = resolve_grammar_path(&grammars_dir, file);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!(file = %path.display(), "requested grammar file not found, running without grammar");
            return Ok(None);
        }

        if let Some(backend_id) = topic.backend_id.as_deref() {
            let record = self.deps.store.get(backend_id).await.ok_or_else(|| {
                Error::not_found(format!(
                    "linked backend '{backend_id}' for topic '{topic_id}'"
                ))
            })?;
            if !record.status.connected {
                warn!(backend = %backend_id, "linked backend is not connected");
            }

            let path = grammars_dir.join(grammar_file_name(backend_id));
            if !path.exists() {
                info!(backend = %backend_id, "grammar missing, auto-generating");
                let adapter = self.deps.adapters.get_or_create(backend_id).await?;
                let output = adapter.generate_grammar().await;
                if output.is_empty() {
                    let detail = output
                        .metadata
                        .error
                        .unwrap_or_else(|| "empty grammar".to_string());
                    return Err(Error::validation(format!(
                        "cannot generate grammar for backend '{backend_id}': {detail}"
                    )));
                }
            }
            return Ok(Some(path));
        }

        if topic.grammar.enabled {
            if let Some(ref file) = topic.grammar.file {
                let path = resolve_grammar_path(&grammars_dir, file);
                if path.exists() {
                    return Ok(Some(path));
                }
                warn!(file = %path.display(), "topic grammar file not found, running without grammar");
            }
        }

        Ok(None)
    }

    fn finalize_timing(&self, request: &GenerateRequest) {
        let wake_word_time = request.metadata.as_ref().and_then(|m| m.wake_word_time);
        if let Some(wake_word_time) = wake_word_time {
            let total = (Utc::now() - wake_word_time).num_microseconds();
            if let Some(total) = total {
                self.deps.last_command.update(|state| {
                    state.timing.total_end_to_end_ms = Some(total as f64 / 1000.0);
                });
            }
        }
    }
}

fn timing_from_metadata(metadata: Option<&UpstreamTiming>) -> TimingInfo {
    let Some(metadata) = metadata else {
        return TimingInfo::default();
    };
    TimingInfo {
        wake_word_time: metadata.wake_word_time,
        recording_end_time: metadata.recording_end_time,
        stt_start_time: metadata.stt_start_time,
        stt_end_time: metadata.stt_end_time,
        ..TimingInfo::default()
    }
}

fn ms_since(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
