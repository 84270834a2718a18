//! Sampling settings carried from request/topic/model-default resolution
//! into the inference layer.

use serde::{Deserialize, Serialize};

/// Effective sampling settings for one inference session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingProfile {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_tokens: u32,
    #[serde(default)]
    pub json_mode: bool,
}

impl Default for SamplingProfile {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 500,
            json_mode: false,
        }
    }
}

impl SamplingProfile {
    /// Canonical textual form, used to key supervisor sessions. Two profiles
    /// with the same fingerprint share a llama-server instance.
    pub fn fingerprint(&self) -> String {
        format!(
            "t{:.2}-p{:.2}-k{}-n{}-j{}",
            self.temperature,
            self.top_p,
            self.top_k,
            self.max_tokens,
            if self.json_mode { 1 } else { 0 }
        )
    }

    /// Apply per-request overrides on top of this profile.
    pub fn with_overrides(&self, overrides: &SamplingOverrides) -> Self {
        Self {
            temperature: overrides.temperature.unwrap_or(self.temperature),
            top_p: overrides.top_p.unwrap_or(self.top_p),
            top_k: overrides.top_k.unwrap_or(self.top_k),
            max_tokens: overrides.max_tokens.unwrap_or(self.max_tokens),
            json_mode: overrides.json_mode.unwrap_or(self.json_mode),
        }
    }
}

/// Optional per-request sampling overrides; absent fields fall through to
/// topic settings, then model defaults.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SamplingOverrides {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub json_mode: Option<bool>,
}
