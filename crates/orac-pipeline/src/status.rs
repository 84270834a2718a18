//! Last-command state: a process-wide record of the most recent (or
//! in-flight) command, read by the status surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Idle,
    Processing,
    Complete,
    Error,
}

/// Upstream and pipeline timing annotations surfaced alongside the command.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingInfo {
    pub wake_word_time: Option<DateTime<Utc>>,
    pub recording_end_time: Option<DateTime<Utc>>,
    pub stt_start_time: Option<DateTime<Utc>>,
    pub stt_end_time: Option<DateTime<Utc>>,
    pub llm_start_time: Option<DateTime<Utc>>,
    pub llm_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub llm_skipped: bool,
    #[serde(default)]
    pub cache_hit: bool,
    pub total_end_to_end_ms: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct LastCommand {
    pub status: CommandStatus,
    pub command: Option<String>,
    pub topic: Option<String>,
    pub model: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub generated_json: Option<Value>,
    pub backend_id: Option<String>,
    pub dispatch_result: Option<Value>,
    pub cache_hit: bool,
    pub timing: TimingInfo,
    pub config_note: Option<String>,
}

/// Field-wise updates under one lock; readers always get a full snapshot.
#[derive(Default)]
pub struct LastCommandStore {
    inner: Mutex<LastCommand>,
}

impl LastCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a command as processing, clearing the previous outcome.
    pub fn begin(&self, command: &str, topic: &str, timing: TimingInfo) {
        let mut state = self.inner.lock().expect("last-command lock poisoned");
        *state = LastCommand {
            status: CommandStatus::Processing,
            command: Some(command.to_string()),
            topic: Some(topic.to_string()),
            started_at: Some(Utc::now()),
            timing,
            ..LastCommand::default()
        };
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut LastCommand),
    {
        let mut state = self.inner.lock().expect("last-command lock poisoned");
        f(&mut state);
    }

    pub fn complete(&self, elapsed_ms: f64, success: bool) {
        self.update(|state| {
            state.status = CommandStatus::Complete;
            state.ended_at = Some(Utc::now());
            state.elapsed_ms = Some(elapsed_ms);
            state.success = success;
        });
    }

    pub fn fail(&self, elapsed_ms: f64, error: &str) {
        self.update(|state| {
            state.status = CommandStatus::Error;
            state.ended_at = Some(Utc::now());
            state.elapsed_ms = Some(elapsed_ms);
            state.success = false;
            state.error = Some(error.to_string());
        });
    }

    pub fn snapshot(&self) -> LastCommand {
        self.inner.lock().expect("last-command lock poisoned").clone()
    }
}
