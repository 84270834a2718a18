//! Model discovery and the per-model configuration catalog.

use chrono::{DateTime, Utc};
use orac_core::{fsutil, Error, Result, SamplingProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// One `*.gguf` file in the models directory.
#[derive(Clone, Debug, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub async fn list_models(models_dir: &Path) -> Result<Vec<ModelInfo>> {
    let mut models = Vec::new();
    let mut dir = match tokio::fs::read_dir(models_dir).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(models),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("gguf") {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let meta = entry.metadata().await?;
        models.push(ModelInfo {
            name,
            size_bytes: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    models.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(models)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptFormat {
    /// Template with `{system_prompt}` and `{user_prompt}` placeholders.
    pub template: String,
}

impl Default for PromptFormat {
    fn default() -> Self {
        Self {
            template: "{system_prompt}\n\n{user_prompt}".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context_size: Option<u32>,
    #[serde(default)]
    pub prompt_format: Option<PromptFormat>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub recommended_settings: Option<SamplingProfile>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    models: BTreeMap<String, ModelConfig>,
}

/// Per-model prompt templates, default system prompts and recommended
/// sampling, loaded from `model_configs.json` (seeded on first run).
#[derive(Clone, Debug, Default)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelConfig>,
}

impl ModelCatalog {
    /// Load the catalog, writing the seed document if the file is missing.
    /// A corrupt file degrades to the seed defaults with a warning.
    pub async fn load_or_seed(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(raw) => match serde_json::from_slice::<CatalogFile>(&raw) {
                Ok(file) => Ok(Self {
                    models: file.models,
                }),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "corrupt model catalog, using defaults");
                    Ok(Self::seed())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let catalog = Self::seed();
                let file = CatalogFile {
                    models: catalog.models.clone(),
                };
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                fsutil::write_atomic(path, &serde_json::to_vec_pretty(&file)?).await?;
                info!(file = %path.display(), "seeded default model catalog");
                Ok(catalog)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn get(&self, model: &str) -> Option<&ModelConfig> {
        self.models.get(model)
    }

    pub fn models(&self) -> impl Iterator<Item = (&String, &ModelConfig)> {
        self.models.iter()
    }

    fn seed() -> Self {
        let qwen_template = "<|im_start|>system\n{system_prompt}\n<|im_end|>\n<|im_start|>user\n{user_prompt}\n<|im_end|>\n<|im_start|>assistant\n";
        let qwen_system = "/no_think\nYou are a JSON-only formatter. For each user input, respond with a single-line JSON object containing the keys: \"device\", \"action\", and \"location\". Do not include any explanations, comments, or additional text. Only output the JSON object.";
        let qwen_settings = SamplingProfile {
            temperature: 0.1,
            top_p: 0.9,
            top_k: 40,
            max_tokens: 50,
            json_mode: false,
        };

        let mut models = BTreeMap::new();
        for name in ["Qwen3-0.6B-Q4_K_M.gguf", "Qwen3-1.7B-Q4_K_M.gguf"] {
            models.insert(
                name.to_string(),
                ModelConfig {
                    description: format!(
                        "Qwen 3 {} chat model",
                        if name.contains("0.6B") { "0.6B" } else { "1.7B" }
                    ),
                    context_size: Some(2048),
                    prompt_format: Some(PromptFormat {
                        template: qwen_template.to_string(),
                    }),
                    system_prompt: Some(qwen_system.to_string()),
                    recommended_settings: Some(qwen_settings),
                },
            );
        }
        Self { models }
    }
}
