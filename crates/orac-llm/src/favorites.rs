//! Favourite models and the startup default, persisted as `favorites.json`.

use orac_core::{fsutil, Error, Result, SamplingProfile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Favorites {
    #[serde(default)]
    pub favorite_models: Vec<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_settings: SamplingProfile,
}

impl Default for Favorites {
    fn default() -> Self {
        Self {
            favorite_models: Vec::new(),
            default_model: None,
            default_settings: SamplingProfile {
                temperature: 0.7,
                top_p: 0.7,
                top_k: 40,
                max_tokens: 512,
                json_mode: false,
            },
        }
    }
}

impl Favorites {
    /// Load `favorites.json`, creating the default document if missing.
    pub async fn load_or_seed(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(favorites) => Ok(favorites),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "corrupt favorites file, using defaults");
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let favorites = Self::default();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                fsutil::write_atomic(path, &serde_json::to_vec_pretty(&favorites)?).await?;
                info!(file = %path.display(), "seeded default favorites");
                Ok(favorites)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Persist, keeping the invariant that the default model (if set) is
    /// listed among the favourites.
    pub async fn save(&mut self, path: &Path) -> Result<()> {
        if let Some(ref default) = self.default_model {
            if !self.favorite_models.contains(default) {
                self.favorite_models.push(default.clone());
            }
        }
        fsutil::write_atomic(path, &serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }
}
