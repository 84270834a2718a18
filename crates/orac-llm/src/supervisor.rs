//! The supervisor: owns every inference session, deduplicates startups,
//! caps concurrency, and aggregates health.

use crate::engine::{GenerationResult, InferenceEngine, SessionKey, SessionSpec};
use crate::favorites::Favorites;
use crate::session::{InferenceSession, SessionHealth, StartContext};
use async_trait::async_trait;
use dashmap::DashMap;
use orac_core::{Error, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub binary: PathBuf,
    pub models_dir: PathBuf,
    pub context_size: u32,
    pub startup_deadline: Duration,
    pub readiness_poll: Duration,
    pub max_start_failures: u32,
    /// Starts are heavy (model load); serves are cheap HTTP round-trips.
    pub max_concurrent_starts: usize,
    pub max_concurrent_serves: usize,
    pub shutdown_grace: Duration,
}

impl SupervisorConfig {
    pub fn new(binary: PathBuf, models_dir: PathBuf) -> Self {
        Self {
            binary,
            models_dir,
            context_size: 2048,
            startup_deadline: Duration::from_secs(120),
            readiness_poll: Duration::from_millis(250),
            max_start_failures: 3,
            max_concurrent_starts: 1,
            max_concurrent_serves: 4,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct LlamaSupervisor {
    config: SupervisorConfig,
    http: Client,
    sessions: DashMap<SessionKey, Arc<InferenceSession>>,
    start_permits: Arc<Semaphore>,
    serve_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl LlamaSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let start_permits = Arc::new(Semaphore::new(config.max_concurrent_starts));
        let serve_permits = Arc::new(Semaphore::new(config.max_concurrent_serves));
        Self {
            config,
            http: Client::new(),
            sessions: DashMap::new(),
            start_permits,
            serve_permits,
            shutdown: CancellationToken::new(),
        }
    }

    fn model_path(&self, model: &str) -> Result<PathBuf> {
        // Model names carry dots (Qwen3-0.6B-...), so match on the suffix
        // rather than Path::extension.
        let file = if model.ends_with(".gguf") {
            model.to_string()
        } else {
            format!("{model}.gguf")
        };
        let path = self.config.models_dir.join(file);
        if !path.exists() {
            return Err(Error::not_found(format!(
                "model file '{}'",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Get or start the session for a spec.
    pub async fn ensure_ready(&self, spec: &SessionSpec) -> Result<Arc<InferenceSession>> {
        if self.shutdown.is_cancelled() {
            return Err(Error::inference("supervisor is shut down"));
        }
        let model_path = self.model_path(&spec.model)?;

        let session = self
            .sessions
            .entry(spec.key())
            .or_insert_with(|| Arc::new(InferenceSession::new(spec.clone())))
            .clone();

        let ctx = StartContext {
            binary: &self.config.binary,
            model_path,
            context_size: self.config.context_size,
            startup_deadline: self.config.startup_deadline,
            readiness_poll: self.config.readiness_poll,
            max_start_failures: self.config.max_start_failures,
            http: &self.http,
            start_permits: &self.start_permits,
            shutdown: &self.shutdown,
        };
        session.ensure_ready(&ctx).await?;
        Ok(session)
    }

    /// Force-cycle the session for a spec, if one exists. The next request
    /// respawns it; used when a backend's grammar is regenerated.
    pub async fn restart(&self, spec: &SessionSpec) {
        if let Some(session) = self.sessions.get(&spec.key()) {
            session.restart().await;
        }
    }

    /// Cycle every session whose grammar file matches `grammar_path`, so a
    /// regenerated grammar is the one loaded by any running server.
    pub async fn restart_sessions_using_grammar(&self, grammar_path: &Path) {
        let affected: Vec<Arc<InferenceSession>> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .spec()
                    .grammar_file
                    .as_deref()
                    .is_some_and(|p| p == grammar_path)
            })
            .map(|entry| entry.value().clone())
            .collect();
        for session in affected {
            info!(grammar = %grammar_path.display(), model = %session.spec().model, "grammar changed, cycling session");
            session.restart().await;
        }
    }

    pub async fn shutdown_all(&self) {
        self.shutdown.cancel();
        let sessions: Vec<Arc<InferenceSession>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for session in sessions {
            session.shutdown(self.config.shutdown_grace).await;
        }
        info!("all inference sessions shut down");
    }

    pub async fn health(&self) -> Vec<SessionHealth> {
        let mut report = Vec::new();
        for entry in self.sessions.iter() {
            report.push(entry.value().health().await);
        }
        report.sort_by(|a, b| a.model.cmp(&b.model));
        report
    }

    /// Start the favourites' default model ahead of the first request.
    /// Picks the most recently modified `backend_*.gbnf` grammar if any
    /// exist, falling back to a static `default.gbnf`. Failures are logged,
    /// never fatal.
    pub async fn preload_default(&self, favorites: &Favorites, grammars_dir: &Path) {
        let Some(ref model) = favorites.default_model else {
            return;
        };
        let mut grammar_file = most_recent_backend_grammar(grammars_dir).await;
        if grammar_file.is_none() {
            let fallback = grammars_dir.join("default.gbnf");
            if fallback.exists() {
                grammar_file = Some(fallback);
            }
        }
        let spec = SessionSpec {
            model: model.clone(),
            grammar_file: grammar_file.clone(),
            sampling: favorites.default_settings,
        };
        info!(%model, grammar = ?grammar_file, "preloading default model");
        if let Err(e) = self.ensure_ready(&spec).await {
            warn!(%model, error = %e, "default model preload failed");
        }
    }
}

#[async_trait]
impl InferenceEngine for LlamaSupervisor {
    async fn generate(
        &self,
        spec: &SessionSpec,
        prompt: &str,
        deadline: Duration,
    ) -> Result<GenerationResult> {
        let session = self.ensure_ready(spec).await?;
        session
            .generate(&self.http, &self.serve_permits, prompt, deadline)
            .await
    }
}

async fn most_recent_backend_grammar(grammars_dir: &Path) -> Option<PathBuf> {
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut dir = tokio::fs::read_dir(grammars_dir).await.ok()?;
    while let Ok(Some(entry)) = dir.next_entry().await {
        let path = entry.path();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.starts_with("backend_") || !name.ends_with(".gbnf") {
            continue;
        }
        let Some(modified) = entry.metadata().await.ok().and_then(|m| m.modified().ok()) else {
            continue;
        };
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, path)| path)
}
