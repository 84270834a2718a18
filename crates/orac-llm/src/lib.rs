//! llama.cpp server supervision: one managed subprocess per
//! `(model, grammar, sampling)` tuple, plus the model catalog and
//! favourites configuration.

pub mod engine;
pub mod favorites;
pub mod models;
pub mod session;
pub mod supervisor;

pub use engine::{GenerationResult, InferenceEngine, SessionKey, SessionSpec};
pub use favorites::Favorites;
pub use models::{list_models, ModelCatalog, ModelConfig, ModelInfo, PromptFormat};
pub use session::{SessionHealth, SessionState};
pub use supervisor::{LlamaSupervisor, SupervisorConfig};
