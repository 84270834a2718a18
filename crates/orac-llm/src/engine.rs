//! The inference seam the pipeline talks to.

use async_trait::async_trait;
use orac_core::{Result, SamplingProfile};
use std::path::PathBuf;
use std::time::Duration;

/// What one generation run needs: which model, which grammar file (if any),
/// and which sampling settings. Two specs with equal keys share an
/// inference session.
#[derive(Clone, Debug)]
pub struct SessionSpec {
    pub model: String,
    pub grammar_file: Option<PathBuf>,
    pub sampling: SamplingProfile,
}

impl SessionSpec {
    pub fn key(&self) -> SessionKey {
        SessionKey(format!(
            "{}|{}|{}",
            self.model,
            self.grammar_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            self.sampling.fingerprint()
        ))
    }
}

/// Canonical session identity derived from a spec.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct GenerationResult {
    pub text: String,
    pub token_count: Option<u32>,
    pub elapsed_ms: f64,
}

/// Submit one prompt against a session, starting it if necessary. `generate`
/// appears atomic to callers; the deadline covers the wait for a busy
/// session as well as the generation itself.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(
        &self,
        spec: &SessionSpec,
        prompt: &str,
        deadline: Duration,
    ) -> Result<GenerationResult>;
}
