//! Append-only performance log, one JSON object per line.

use chrono::{DateTime, Utc};
use orac_core::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerfRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub topic: String,
    pub elapsed_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_notes: Option<String>,
}

pub struct PerformanceLog {
    path: PathBuf,
    // Serializes appenders so interleaved writes cannot tear a line.
    write_lock: Mutex<()>,
}

impl PerformanceLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &PerfRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    /// Most recent `limit` records, newest first. Unparseable lines are
    /// skipped with a warning.
    pub async fn read(&self, limit: usize) -> Result<Vec<PerfRecord>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<PerfRecord> = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping unparseable performance log line"),
            }
        }
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
