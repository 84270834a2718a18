//! Process-level configuration and data-directory layout.
//!
//! Everything beyond these paths lives in the data-model files themselves
//! (backends, topics, model configs, favourites).

use crate::error::Result;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Root for backends, grammars, topics, caches and the performance log.
    pub data_dir: PathBuf,
    /// Directory scanned for `*.gguf` model files.
    pub models_dir: PathBuf,
    /// Path to the llama-server binary.
    pub llama_server_bin: PathBuf,
}

impl CoreConfig {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        models_dir: impl Into<PathBuf>,
        llama_server_bin: impl Into<PathBuf>,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            models_dir: models_dir.into(),
            llama_server_bin: llama_server_bin.into(),
        }
    }

    pub fn backends_dir(&self) -> PathBuf {
        self.data_dir.join("backends")
    }

    pub fn grammars_dir(&self) -> PathBuf {
        self.data_dir.join("grammars")
    }

    pub fn topics_file(&self) -> PathBuf {
        self.data_dir.join("topics.json")
    }

    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join("stt_cache.json")
    }

    pub fn favorites_file(&self) -> PathBuf {
        self.data_dir.join("favorites.json")
    }

    pub fn model_configs_file(&self) -> PathBuf {
        self.data_dir.join("model_configs.json")
    }

    pub fn performance_log(&self) -> PathBuf {
        self.data_dir.join("performance_log.jsonl")
    }

    /// Create the data directory tree. Called once at startup.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.data_dir.as_path(),
            &self.backends_dir(),
            &self.grammars_dir(),
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

}

/// Resolve a grammar reference against the grammars directory. Absolute
/// paths pass through untouched.
pub fn resolve_grammar_path(grammars_dir: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        grammars_dir.join(file)
    }
}
