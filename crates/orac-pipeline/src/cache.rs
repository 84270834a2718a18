//! STT-response cache: normalized text → last-successful JSON output,
//! scoped per topic, LRU-evicted and snapshotted to disk.
//!
//! A snapshot failure degrades the cache to in-memory-only with a warning;
//! it never fails a request.

use chrono::{DateTime, Utc};
use orac_core::fsutil;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_SIZE: usize = 500;
const SNAPSHOT_VERSION: u32 = 1;

/// Cache-key normalization: trim, lowercase, collapse whitespace.
/// Idempotent by construction.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    topic_id: String,
    text: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub topic_id: String,
    /// Normalized STT text; doubles as the key within the topic.
    pub stt_text: String,
    pub json_output: serde_json::Value,
    pub entity_id: Option<String>,
    pub success_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl CacheEntry {
    fn key(&self) -> CacheKey {
        CacheKey {
            topic_id: self.topic_id.clone(),
            text: self.stt_text.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub total_hits: u64,
    pub cache_file: Option<String>,
}

/// Snapshot document. Entries are stored in LRU order, least-recent first,
/// so a load replays them into the same order.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    /// Least-recent first.
    order: VecDeque<CacheKey>,
    last_stored: Option<(CacheKey, Instant)>,
}

impl Inner {
    fn promote(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.clone());
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key)
    }
}

pub struct SttResponseCache {
    max_size: usize,
    cache_file: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl SttResponseCache {
    pub fn new(max_size: usize, cache_file: Option<PathBuf>) -> Self {
        Self {
            max_size,
            cache_file,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                last_stored: None,
            }),
        }
    }

    /// Build a cache and load its snapshot. Absent or corrupt snapshots
    /// start fresh with a warning.
    pub async fn load(max_size: usize, cache_file: PathBuf) -> Self {
        let cache = Self::new(max_size, Some(cache_file.clone()));

        match tokio::fs::read(&cache_file).await {
            Ok(raw) => match serde_json::from_slice::<Snapshot>(&raw) {
                Ok(snapshot) => {
                    let mut inner = cache.inner.lock().await;
                    for entry in snapshot.entries {
                        let key = entry.key();
                        inner.order.push_back(key.clone());
                        inner.entries.insert(key, entry);
                    }
                    info!(
                        entries = inner.entries.len(),
                        file = %cache_file.display(),
                        "loaded STT response cache"
                    );
                }
                Err(e) => {
                    warn!(file = %cache_file.display(), error = %e, "corrupt cache snapshot, starting fresh");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(file = %cache_file.display(), error = %e, "cache snapshot unreadable, starting fresh");
            }
        }
        cache
    }

    /// Look up and promote. A hit refreshes `last_used_at`.
    pub async fn get(&self, topic_id: &str, text: &str) -> Option<CacheEntry> {
        let key = CacheKey {
            topic_id: topic_id.to_string(),
            text: normalize(text),
        };
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(&key) {
            debug!(topic = %topic_id, text = %key.text, "cache miss");
            return None;
        }
        inner.promote(&key);
        let entry = inner.entries.get_mut(&key)?;
        entry.last_used_at = Utc::now();
        info!(topic = %topic_id, text = %key.text, hits = entry.success_count, "cache hit");
        Some(entry.clone())
    }

    /// Upsert a successful mapping, evict past `max_size`, remember the key
    /// for error correction, and persist.
    pub async fn store(
        &self,
        topic_id: &str,
        text: &str,
        json_output: serde_json::Value,
        entity_id: Option<String>,
    ) {
        let normalized = normalize(text);
        let key = CacheKey {
            topic_id: topic_id.to_string(),
            text: normalized.clone(),
        };
        let now = Utc::now();

        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.success_count += 1;
                entry.last_used_at = now;
                entry.json_output = json_output;
                if entity_id.is_some() {
                    entry.entity_id = entity_id;
                }
                debug!(topic = %topic_id, text = %normalized, count = entry.success_count, "cache update");
            }
            None => {
                inner.entries.insert(
                    key.clone(),
                    CacheEntry {
                        topic_id: topic_id.to_string(),
                        stt_text: normalized.clone(),
                        json_output,
                        entity_id,
                        success_count: 1,
                        created_at: now,
                        last_used_at: now,
                    },
                );
                info!(topic = %topic_id, text = %normalized, "cache store");
            }
        }
        inner.promote(&key);

        while inner.entries.len() > self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
                debug!(topic = %oldest.topic_id, text = %oldest.text, "cache evict (LRU)");
            } else {
                break;
            }
        }

        inner.last_stored = Some((key, Instant::now()));
        self.persist(&inner).await;
    }

    /// Error correction: drop the most recently stored entry if it was
    /// stored within `within`. Returns whether anything was removed.
    pub async fn remove_last(&self, within: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        let Some((key, stored_at)) = inner.last_stored.clone() else {
            info!("error correction: no recent cache entry to remove");
            return false;
        };
        if stored_at.elapsed() > within {
            info!(
                elapsed_secs = stored_at.elapsed().as_secs(),
                "error correction: last entry too old"
            );
            return false;
        }

        let removed = inner.remove(&key).is_some();
        inner.last_stored = None;
        if removed {
            info!(topic = %key.topic_id, text = %key.text, "error correction: removed cache entry");
            self.persist(&inner).await;
        }
        removed
    }

    /// Remove one specific entry. Returns whether it existed.
    pub async fn remove(&self, topic_id: &str, text: &str) -> bool {
        let key = CacheKey {
            topic_id: topic_id.to_string(),
            text: normalize(text),
        };
        let mut inner = self.inner.lock().await;
        let removed = inner.remove(&key).is_some();
        let was_last = matches!(inner.last_stored, Some((ref last, _)) if *last == key);
        if was_last {
            inner.last_stored = None;
        }
        if removed {
            self.persist(&inner).await;
        }
        removed
    }

    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        inner.last_stored = None;
        self.persist(&inner).await;
        info!(count, "cache cleared");
        count
    }

    /// Most-recent-first listing for operator surfaces.
    pub async fn list(&self, limit: usize, topic_filter: Option<&str>) -> Vec<CacheEntry> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .rev()
            .filter_map(|key| inner.entries.get(key))
            .filter(|entry| topic_filter.map_or(true, |t| entry.topic_id == t))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            max_size: self.max_size,
            total_hits: inner.entries.values().map(|e| e.success_count).sum(),
            cache_file: self
                .cache_file
                .as_ref()
                .map(|p| p.display().to_string()),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, inner: &Inner) {
        let Some(ref path) = self.cache_file else {
            return;
        };
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            entries: inner
                .order
                .iter()
                .filter_map(|key| inner.entries.get(key))
                .cloned()
                .collect(),
        };
        let json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "cache snapshot serialization failed");
                return;
            }
        };
        if let Err(e) = fsutil::write_atomic(path, &json).await {
            warn!(file = %path.display(), error = %e, "cache snapshot write failed, continuing in memory");
        }
    }
}
