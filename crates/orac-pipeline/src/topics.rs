//! Topic registry: named routing profiles binding a model, sampling
//! settings, prompt prefix and an optional backend.
//!
//! Heartbeat state lives in its own sub-record and is mutated only by
//! `update_heartbeat`, which is forbidden from touching configuration
//! fields. Configuration updates conversely never touch heartbeat state, so
//! the two paths can race without merging.

use chrono::{DateTime, Utc};
use orac_core::{fsutil, Error, Result, SamplingProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The well-known topic that always exists and cannot be deleted.
pub const GENERAL_TOPIC: &str = "general";

/// Heartbeat age thresholds for derived liveness.
pub const HEARTBEAT_ACTIVE_SECS: i64 = 35;
pub const HEARTBEAT_IDLE_SECS: i64 = 70;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopicSettings {
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
    #[serde(default)]
    pub no_think: bool,
    #[serde(default)]
    pub force_json: bool,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful AI assistant.".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 500,
            no_think: false,
            force_json: false,
        }
    }
}

impl TopicSettings {
    pub fn sampling(&self) -> SamplingProfile {
        SamplingProfile {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
            json_mode: self.force_json,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GrammarConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Active,
    Idle,
    #[default]
    Unknown,
}

/// Liveness signal from an upstream wake-word instance, scoped per topic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: HeartbeatStatus,
    #[serde(default)]
    pub wake_word: Option<String>,
    #[serde(default)]
    pub trigger_count: u64,
}

/// Liveness derived from heartbeat age.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveStatus {
    Active,
    Idle,
    Stale,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub model: String,
    #[serde(default)]
    pub backend_id: Option<String>,
    #[serde(default)]
    pub settings: TopicSettings,
    #[serde(default)]
    pub grammar: GrammarConfig,
    #[serde(default)]
    pub auto_discovered: bool,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heartbeat: Heartbeat,
}

impl Topic {
    pub fn live_status(&self, now: DateTime<Utc>) -> LiveStatus {
        match self.heartbeat.last_seen {
            None => LiveStatus::Unknown,
            Some(last_seen) => {
                let age = (now - last_seen).num_seconds();
                if age < HEARTBEAT_ACTIVE_SECS {
                    LiveStatus::Active
                } else if age < HEARTBEAT_IDLE_SECS {
                    LiveStatus::Idle
                } else {
                    LiveStatus::Stale
                }
            }
        }
    }
}

/// Configuration update for a topic. Replaces the whole record except
/// protected metadata (`auto_discovered`, `first_seen`) and heartbeat state,
/// which only the heartbeat path mutates.
#[derive(Clone, Debug, Deserialize)]
pub struct TopicUpdate {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub model: String,
    #[serde(default)]
    pub backend_id: Option<String>,
    #[serde(default)]
    pub settings: TopicSettings,
    #[serde(default)]
    pub grammar: GrammarConfig,
}

/// Heartbeat-only update; carries no configuration fields.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct HeartbeatUpdate {
    pub status: Option<HeartbeatStatus>,
    pub wake_word: Option<String>,
    pub trigger_count: Option<u64>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Per-topic liveness plus summary counts for the status surface.
#[derive(Clone, Debug, Serialize)]
pub struct HeartbeatSummary {
    pub topics: BTreeMap<String, TopicLiveness>,
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub stale: usize,
    pub unknown: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct TopicLiveness {
    pub name: String,
    pub live_status: LiveStatus,
    pub heartbeat_status: HeartbeatStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub wake_word: Option<String>,
    pub trigger_count: u64,
    pub auto_discovered: bool,
}

#[derive(Serialize, Deserialize, Default)]
struct TopicsFile {
    topics: BTreeMap<String, Topic>,
}

pub struct TopicRegistry {
    topics_file: PathBuf,
    default_model: String,
    topics: RwLock<BTreeMap<String, Topic>>,
}

impl TopicRegistry {
    /// Load `topics.json` (missing file: empty registry) and make sure the
    /// `general` topic exists. A corrupt file is a startup error.
    pub async fn load(topics_file: PathBuf, default_model: String) -> Result<Self> {
        let topics = match tokio::fs::read(&topics_file).await {
            Ok(raw) => {
                let file: TopicsFile = serde_json::from_slice(&raw).map_err(|e| {
                    Error::config(format!(
                        "corrupt topics file {}: {e}",
                        topics_file.display()
                    ))
                })?;
                file.topics
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        let registry = Self {
            topics_file,
            default_model,
            topics: RwLock::new(topics),
        };
        registry.ensure_general().await?;
        Ok(registry)
    }

    async fn ensure_general(&self) -> Result<()> {
        let mut topics = self.topics.write().await;
        if topics.contains_key(GENERAL_TOPIC) {
            return Ok(());
        }
        info!("creating default '{GENERAL_TOPIC}' topic");
        topics.insert(
            GENERAL_TOPIC.to_string(),
            Topic {
                name: "General".to_string(),
                description: "General purpose assistant".to_string(),
                enabled: true,
                model: self.default_model.clone(),
                backend_id: None,
                settings: TopicSettings::default(),
                grammar: GrammarConfig::default(),
                auto_discovered: false,
                first_seen: Some(Utc::now()),
                last_used: None,
                heartbeat: Heartbeat::default(),
            },
        );
        self.persist(&topics).await
    }

    async fn persist(&self, topics: &BTreeMap<String, Topic>) -> Result<()> {
        let file = TopicsFile {
            topics: topics.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        fsutil::write_atomic(&self.topics_file, &json).await?;
        Ok(())
    }

    pub async fn get(&self, topic_id: &str) -> Option<Topic> {
        self.topics.read().await.get(topic_id).cloned()
    }

    pub async fn list(&self) -> BTreeMap<String, Topic> {
        self.topics.read().await.clone()
    }

    /// Return an existing topic or create one with defaults, flagged
    /// `auto_discovered`.
    pub async fn get_or_autocreate(&self, topic_id: &str) -> Result<Topic> {
        if let Some(topic) = self.get(topic_id).await {
            return Ok(topic);
        }
        let mut topics = self.topics.write().await;
        if let Some(topic) = topics.get(topic_id) {
            return Ok(topic.clone());
        }

        info!(topic = %topic_id, "auto-discovering topic");
        let pretty = topic_id.replace('_', " ");
        let topic = Topic {
            name: title_case(&pretty),
            description: format!("Auto-discovered topic for {pretty}"),
            enabled: true,
            model: self.default_model.clone(),
            backend_id: None,
            settings: TopicSettings::default(),
            grammar: GrammarConfig::default(),
            auto_discovered: true,
            first_seen: Some(Utc::now()),
            last_used: None,
            heartbeat: Heartbeat::default(),
        };
        topics.insert(topic_id.to_string(), topic.clone());
        self.persist(&topics).await?;
        Ok(topic)
    }

    /// Replace a topic's configuration. Protected metadata and heartbeat
    /// state carry over from the existing record.
    pub async fn update(&self, topic_id: &str, update: TopicUpdate) -> Result<Topic> {
        let mut topics = self.topics.write().await;
        let existing = topics
            .get(topic_id)
            .ok_or_else(|| Error::not_found(format!("topic '{topic_id}'")))?;

        let topic = Topic {
            name: update.name,
            description: update.description,
            enabled: update.enabled,
            model: update.model,
            backend_id: update.backend_id,
            settings: update.settings,
            grammar: update.grammar,
            auto_discovered: existing.auto_discovered,
            first_seen: existing.first_seen,
            last_used: existing.last_used,
            heartbeat: existing.heartbeat.clone(),
        };
        topics.insert(topic_id.to_string(), topic.clone());
        self.persist(&topics).await?;
        info!(topic = %topic_id, backend = ?topic.backend_id, "updated topic");
        Ok(topic)
    }

    /// Mutate heartbeat fields only. Unknown topics are auto-discovered
    /// first. Configuration fields are untouchable from this path.
    pub async fn update_heartbeat(
        &self,
        topic_id: &str,
        update: HeartbeatUpdate,
    ) -> Result<Topic> {
        self.get_or_autocreate(topic_id).await?;

        let mut topics = self.topics.write().await;
        let topic = topics
            .get_mut(topic_id)
            .ok_or_else(|| Error::not_found(format!("topic '{topic_id}'")))?;

        topic.heartbeat.last_seen = Some(update.last_seen.unwrap_or_else(Utc::now));
        if let Some(status) = update.status {
            topic.heartbeat.status = status;
        }
        if let Some(wake_word) = update.wake_word {
            topic.heartbeat.wake_word = Some(wake_word);
        }
        if let Some(trigger_count) = update.trigger_count {
            topic.heartbeat.trigger_count = trigger_count;
        }
        let topic = topic.clone();
        self.persist(&topics).await?;
        Ok(topic)
    }

    /// Attach or detach a backend. Attaching disables any static grammar:
    /// the backend-generated grammar supersedes it.
    pub async fn link_backend(
        &self,
        topic_id: &str,
        backend_id: Option<String>,
    ) -> Result<Topic> {
        let mut topics = self.topics.write().await;
        let topic = topics
            .get_mut(topic_id)
            .ok_or_else(|| Error::not_found(format!("topic '{topic_id}'")))?;

        match &backend_id {
            Some(id) => info!(topic = %topic_id, backend = %id, "linking topic to backend"),
            None => info!(topic = %topic_id, "unlinking topic from backend"),
        }
        topic.backend_id = backend_id;
        if topic.backend_id.is_some() {
            topic.grammar.enabled = false;
            topic.grammar.file = None;
        }
        let topic = topic.clone();
        self.persist(&topics).await?;
        Ok(topic)
    }

    pub async fn mark_used(&self, topic_id: &str) -> Result<()> {
        let mut topics = self.topics.write().await;
        if let Some(topic) = topics.get_mut(topic_id) {
            topic.last_used = Some(Utc::now());
            self.persist(&topics).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, topic_id: &str) -> Result<()> {
        if topic_id == GENERAL_TOPIC {
            return Err(Error::validation(format!(
                "the '{GENERAL_TOPIC}' topic cannot be deleted"
            )));
        }
        let mut topics = self.topics.write().await;
        if topics.remove(topic_id).is_none() {
            return Err(Error::not_found(format!("topic '{topic_id}'")));
        }
        self.persist(&topics).await?;
        info!(topic = %topic_id, "deleted topic");
        Ok(())
    }

    /// Soft-reference semantics: a topic whose linked backend no longer
    /// exists reads as unlinked.
    pub fn effective_backend_id(&self, topic: &Topic, backend_exists: bool) -> Option<String> {
        match (&topic.backend_id, backend_exists) {
            (Some(id), true) => Some(id.clone()),
            (Some(id), false) => {
                warn!(backend = %id, "topic references a deleted backend, treating as unlinked");
                None
            }
            (None, _) => None,
        }
    }

    pub async fn heartbeat_summary(&self) -> HeartbeatSummary {
        let now = Utc::now();
        let topics = self.topics.read().await;
        let mut summary = HeartbeatSummary {
            topics: BTreeMap::new(),
            total: topics.len(),
            active: 0,
            idle: 0,
            stale: 0,
            unknown: 0,
        };
        for (topic_id, topic) in topics.iter() {
            let live_status = topic.live_status(now);
            match live_status {
                LiveStatus::Active => summary.active += 1,
                LiveStatus::Idle => summary.idle += 1,
                LiveStatus::Stale => summary.stale += 1,
                LiveStatus::Unknown => summary.unknown += 1,
            }
            summary.topics.insert(
                topic_id.clone(),
                TopicLiveness {
                    name: topic.name.clone(),
                    live_status,
                    heartbeat_status: topic.heartbeat.status,
                    last_seen: topic.heartbeat.last_seen,
                    wake_word: topic.heartbeat.wake_word.clone(),
                    trigger_count: topic.heartbeat.trigger_count,
                    auto_discovered: topic.auto_discovered,
                },
            );
        }
        summary
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
