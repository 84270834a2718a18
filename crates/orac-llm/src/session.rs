//! One managed llama-server subprocess and its lifecycle state machine.

use crate::engine::{GenerationResult, SessionSpec};
use chrono::{DateTime, Utc};
use orac_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Starting,
    Ready,
    Serving,
    Degraded,
    Restarting,
    Terminated,
}

/// Everything `start` needs from the supervisor.
pub(crate) struct StartContext<'a> {
    pub binary: &'a PathBuf,
    pub model_path: PathBuf,
    pub context_size: u32,
    pub startup_deadline: Duration,
    pub readiness_poll: Duration,
    pub max_start_failures: u32,
    pub http: &'a Client,
    pub start_permits: &'a Semaphore,
    pub shutdown: &'a CancellationToken,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    child: Option<Child>,
    base_url: Option<String>,
    restart_count: u32,
    start_failures: u32,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct InferenceSession {
    spec: SessionSpec,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    active_requests: AtomicUsize,
}

/// Aggregated view for the status surface.
#[derive(Clone, Debug, Serialize)]
pub struct SessionHealth {
    pub model: String,
    pub grammar_file: Option<String>,
    pub state: SessionState,
    pub restart_count: u32,
    pub start_failures: u32,
    pub last_error: Option<String>,
    pub active_requests: usize,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    tokens_predicted: Option<u32>,
}

impl InferenceSession {
    pub fn new(spec: SessionSpec) -> Self {
        let (state_tx, _) = watch::channel(SessionState::NotStarted);
        Self {
            spec,
            inner: Mutex::new(Inner {
                state: SessionState::NotStarted,
                child: None,
                base_url: None,
                restart_count: 0,
                start_failures: 0,
                last_error: None,
                started_at: None,
            }),
            state_tx,
            active_requests: AtomicUsize::new(0),
        }
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// Return the serving URL, starting the subprocess if needed. Concurrent
    /// callers share a single startup: one wins the `Starting` transition,
    /// the rest wait on the state channel.
    pub(crate) async fn ensure_ready(&self, ctx: &StartContext<'_>) -> Result<String> {
        loop {
            let mut rx = self.state_tx.subscribe();
            enum Decision {
                Start,
                Wait,
            }
            let decision = {
                let mut inner = self.inner.lock().await;
                match inner.state {
                    SessionState::Ready | SessionState::Serving => {
                        return inner.base_url.clone().ok_or_else(|| {
                            Error::inference("session ready but has no base URL")
                        });
                    }
                    SessionState::Terminated => {
                        let detail = inner
                            .last_error
                            .clone()
                            .unwrap_or_else(|| "repeated startup failures".to_string());
                        return Err(Error::inference(format!(
                            "inference session for '{}' is terminated: {detail}",
                            self.spec.model
                        )));
                    }
                    SessionState::Starting | SessionState::Restarting => Decision::Wait,
                    SessionState::NotStarted | SessionState::Degraded => {
                        self.set_state(&mut inner, SessionState::Starting);
                        Decision::Start
                    }
                }
            };

            match decision {
                Decision::Start => return self.start(ctx).await,
                Decision::Wait => {
                    while matches!(
                        *rx.borrow_and_update(),
                        SessionState::Starting | SessionState::Restarting
                    ) {
                        if rx.changed().await.is_err() {
                            return Err(Error::inference("session dropped during startup"));
                        }
                    }
                }
            }
        }
    }

    async fn start(&self, ctx: &StartContext<'_>) -> Result<String> {
        let permit = ctx
            .start_permits
            .acquire()
            .await
            .map_err(|_| Error::inference("supervisor is shutting down"))?;

        let result = self.spawn_and_probe(ctx).await;
        drop(permit);

        match result {
            Ok((child, base_url)) => {
                let mut inner = self.inner.lock().await;
                inner.child = Some(child);
                inner.base_url = Some(base_url.clone());
                inner.start_failures = 0;
                inner.last_error = None;
                inner.started_at = Some(Utc::now());
                self.set_state(&mut inner, SessionState::Ready);
                info!(model = %self.spec.model, url = %base_url, "inference session ready");
                Ok(base_url)
            }
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.start_failures += 1;
                inner.last_error = Some(e.to_string());
                let next = if inner.start_failures >= ctx.max_start_failures {
                    error!(
                        model = %self.spec.model,
                        failures = inner.start_failures,
                        "startup failure bound reached, terminating session"
                    );
                    SessionState::Terminated
                } else {
                    SessionState::NotStarted
                };
                self.set_state(&mut inner, next);
                Err(e)
            }
        }
    }

    async fn spawn_and_probe(&self, ctx: &StartContext<'_>) -> Result<(Child, String)> {
        let port = free_port()?;
        let base_url = format!("http://127.0.0.1:{port}");

        let mut command = Command::new(ctx.binary);
        command
            .arg("-m")
            .arg(&ctx.model_path)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("-c")
            .arg(ctx.context_size.to_string())
            .arg("--temp")
            .arg(format!("{:.2}", self.spec.sampling.temperature))
            .arg("--top-p")
            .arg(format!("{:.2}", self.spec.sampling.top_p))
            .arg("--top-k")
            .arg(self.spec.sampling.top_k.to_string());
        if let Some(ref grammar) = self.spec.grammar_file {
            command.arg("--grammar-file").arg(grammar);
        }
        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        info!(
            model = %self.spec.model,
            port,
            grammar = ?self.spec.grammar_file,
            "spawning llama-server"
        );
        let mut child = command.spawn().map_err(|e| {
            Error::inference(format!(
                "failed to spawn llama-server from {}: {e}",
                ctx.binary.display()
            ))
        })?;

        let deadline = Instant::now() + ctx.startup_deadline;
        let health_url = format!("{base_url}/health");

        loop {
            if ctx.shutdown.is_cancelled() {
                let _ = child.start_kill();
                return Err(Error::inference("supervisor shut down during startup"));
            }
            if let Some(status) = child.try_wait().map_err(Error::Io)? {
                return Err(Error::inference(format!(
                    "llama-server exited during startup with {status}"
                )));
            }
            if Instant::now() >= deadline {
                let _ = child.start_kill();
                return Err(Error::timeout(format!(
                    "llama-server for '{}' not ready within {:?}",
                    self.spec.model, ctx.startup_deadline
                )));
            }

            match ctx.http.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok((child, base_url));
                }
                Ok(response) => {
                    debug!(status = %response.status(), "llama-server still loading");
                }
                Err(e) => {
                    debug!(error = %e, "readiness probe not answered yet");
                }
            }

            tokio::time::sleep(ctx.readiness_poll).await;
        }
    }

    /// Submit one prompt. Does not hold the lifecycle lock while waiting on
    /// the server. On timeout the subprocess keeps running; it may still
    /// finish and warm its prompt cache for an identical follow-up.
    pub async fn generate(
        &self,
        http: &Client,
        serve_permits: &Semaphore,
        prompt: &str,
        deadline: Duration,
    ) -> Result<GenerationResult> {
        let base_url = {
            let inner = self.inner.lock().await;
            match inner.state {
                SessionState::Ready | SessionState::Serving => {
                    inner.base_url.clone().ok_or_else(|| {
                        Error::inference("session ready but has no base URL")
                    })?
                }
                state => {
                    return Err(Error::inference(format!(
                        "session for '{}' is not ready (state: {state:?})",
                        self.spec.model
                    )))
                }
            }
        };

        let _permit = serve_permits
            .acquire()
            .await
            .map_err(|_| Error::inference("supervisor is shutting down"))?;

        if self.active_requests.fetch_add(1, Ordering::SeqCst) == 0 {
            self.transition_if(SessionState::Ready, SessionState::Serving)
                .await;
        }
        let result = self.completion(http, &base_url, prompt, deadline).await;
        if self.active_requests.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.transition_if(SessionState::Serving, SessionState::Ready)
                .await;
        }

        if let Err(Error::Inference(ref detail)) = result {
            warn!(model = %self.spec.model, %detail, "marking session degraded");
            let mut inner = self.inner.lock().await;
            inner.last_error = Some(detail.clone());
            self.set_state(&mut inner, SessionState::Degraded);
        }
        result
    }

    async fn completion(
        &self,
        http: &Client,
        base_url: &str,
        prompt: &str,
        deadline: Duration,
    ) -> Result<GenerationResult> {
        let sampling = &self.spec.sampling;
        let mut body = json!({
            "prompt": prompt,
            "n_predict": sampling.max_tokens,
            "temperature": sampling.temperature,
            "top_p": sampling.top_p,
            "top_k": sampling.top_k,
            "stream": false,
            "cache_prompt": true,
        });
        if sampling.json_mode && self.spec.grammar_file.is_none() {
            body["json_schema"] = json!({ "type": "object" });
        }

        let started = Instant::now();
        let request = http.post(format!("{base_url}/completion")).json(&body).send();

        let response = match tokio::time::timeout(deadline, request).await {
            Err(_) => {
                return Err(Error::timeout(format!(
                    "generation for '{}' exceeded {:?}",
                    self.spec.model, deadline
                )))
            }
            Ok(Err(e)) => return Err(Error::inference(format!("completion request failed: {e}"))),
            Ok(Ok(response)) => response,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::inference(format!(
                "llama-server returned {status}: {body}"
            )));
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        let completion: CompletionResponse =
            match tokio::time::timeout(remaining, response.json()).await {
                Err(_) => {
                    return Err(Error::timeout(format!(
                        "generation for '{}' exceeded {:?}",
                        self.spec.model, deadline
                    )))
                }
                Ok(Err(e)) => {
                    return Err(Error::inference(format!("invalid completion payload: {e}")))
                }
                Ok(Ok(completion)) => completion,
            };

        Ok(GenerationResult {
            text: completion.content,
            token_count: completion.tokens_predicted,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Kill the subprocess and rewind to NotStarted; the next `ensure_ready`
    /// performs a fresh spawn. Used when a grammar changes or the session is
    /// degraded.
    pub async fn restart(&self) {
        let mut inner = self.inner.lock().await;
        self.set_state(&mut inner, SessionState::Restarting);
        if let Some(mut child) = inner.child.take() {
            let _ = child.start_kill();
        }
        inner.base_url = None;
        inner.restart_count += 1;
        self.set_state(&mut inner, SessionState::NotStarted);
        info!(model = %self.spec.model, restarts = inner.restart_count, "session restarted");
    }

    /// Terminate with a grace period, then force-kill.
    pub async fn shutdown(&self, grace: Duration) {
        let child = {
            let mut inner = self.inner.lock().await;
            inner.base_url = None;
            self.set_state(&mut inner, SessionState::Terminated);
            inner.child.take()
        };
        let Some(mut child) = child else {
            return;
        };

        terminate_gracefully(&mut child, grace).await;
        info!(model = %self.spec.model, "session shut down");
    }

    pub async fn health(&self) -> SessionHealth {
        let inner = self.inner.lock().await;
        SessionHealth {
            model: self.spec.model.clone(),
            grammar_file: self
                .spec
                .grammar_file
                .as_ref()
                .map(|p| p.display().to_string()),
            state: inner.state,
            restart_count: inner.restart_count,
            start_failures: inner.start_failures,
            last_error: inner.last_error.clone(),
            active_requests: self.active_requests.load(Ordering::SeqCst),
            started_at: inner.started_at,
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        inner.state = state;
        let _ = self.state_tx.send_replace(state);
    }

    async fn transition_if(&self, from: SessionState, to: SessionState) {
        let mut inner = self.inner.lock().await;
        if inner.state == from {
            self.set_state(&mut inner, to);
        }
    }
}

fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| Error::inference(format!("no free loopback port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::inference(format!("no free loopback port: {e}")))?
        .port();
    Ok(port)
}

#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        // SIGTERM first; llama-server flushes and exits on it.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            return;
        }
        warn!(pid, "llama-server ignored SIGTERM, killing");
    }
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}
