//! Tests for orac-llm: session keys, supervisor lookup failures, the model
//! catalog and favourites.

use orac_core::SamplingProfile;
use orac_llm::*;
use std::path::PathBuf;
use std::time::Duration;

fn test_dir() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("orac-llm-test-{}-{}", std::process::id(), id));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}

fn spec(model: &str, grammar: Option<&str>) -> SessionSpec {
    SessionSpec {
        model: model.to_string(),
        grammar_file: grammar.map(PathBuf::from),
        sampling: SamplingProfile::default(),
    }
}

// ===========================================================================
// SessionSpec keys
// ===========================================================================

#[test]
fn same_spec_shares_a_key() {
    assert_eq!(spec("q.gguf", None).key(), spec("q.gguf", None).key());
    assert_eq!(
        spec("q.gguf", Some("/g/a.gbnf")).key(),
        spec("q.gguf", Some("/g/a.gbnf")).key()
    );
}

#[test]
fn key_separates_model_grammar_and_sampling() {
    let base = spec("q.gguf", Some("/g/a.gbnf"));
    assert_ne!(base.key(), spec("other.gguf", Some("/g/a.gbnf")).key());
    assert_ne!(base.key(), spec("q.gguf", Some("/g/b.gbnf")).key());
    assert_ne!(base.key(), spec("q.gguf", None).key());

    let mut hot = base.clone();
    hot.sampling.temperature = 1.5;
    assert_ne!(base.key(), hot.key());
}

// ===========================================================================
// Supervisor lookups
// ===========================================================================

#[tokio::test]
async fn ensure_ready_fails_for_missing_model_without_spawning() {
    let dir = test_dir();
    let supervisor = LlamaSupervisor::new(SupervisorConfig::new(
        PathBuf::from("/nonexistent/llama-server"),
        dir.clone(),
    ));

    let err = supervisor
        .ensure_ready(&spec("no-such-model.gguf", None))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert!(supervisor.health().await.is_empty(), "no session was created");
    cleanup(&dir);
}

#[tokio::test]
async fn generate_surfaces_ensure_ready_failures() {
    let dir = test_dir();
    let supervisor = LlamaSupervisor::new(SupervisorConfig::new(
        PathBuf::from("/nonexistent/llama-server"),
        dir.clone(),
    ));

    use orac_llm::engine::InferenceEngine;
    let err = supervisor
        .generate(&spec("missing.gguf", None), "hello", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    cleanup(&dir);
}

// ===========================================================================
// model discovery
// ===========================================================================

#[tokio::test]
async fn list_models_finds_only_gguf_files() {
    let dir = test_dir();
    std::fs::write(dir.join("a.gguf"), b"x").unwrap();
    std::fs::write(dir.join("b.gguf"), b"xy").unwrap();
    std::fs::write(dir.join("notes.txt"), b"nope").unwrap();

    let models = list_models(&dir).await.unwrap();
    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["a.gguf", "b.gguf"]);
    assert_eq!(models[1].size_bytes, 2);
    cleanup(&dir);
}

#[tokio::test]
async fn list_models_tolerates_missing_directory() {
    let dir = test_dir();
    let models = list_models(&dir.join("missing")).await.unwrap();
    assert!(models.is_empty());
    cleanup(&dir);
}

// ===========================================================================
// catalog + favourites
// ===========================================================================

#[tokio::test]
async fn catalog_seeds_defaults_and_persists_them() {
    let dir = test_dir();
    let path = dir.join("model_configs.json");

    let catalog = ModelCatalog::load_or_seed(&path).await.unwrap();
    let config = catalog.get("Qwen3-0.6B-Q4_K_M.gguf").unwrap();
    assert!(config.prompt_format.as_ref().unwrap().template.contains("{system_prompt}"));
    assert!(config.system_prompt.as_ref().unwrap().starts_with("/no_think"));
    assert_eq!(config.recommended_settings.unwrap().max_tokens, 50);

    assert!(path.exists(), "seed document written on first run");
    let reloaded = ModelCatalog::load_or_seed(&path).await.unwrap();
    assert!(reloaded.get("Qwen3-1.7B-Q4_K_M.gguf").is_some());
    cleanup(&dir);
}

#[tokio::test]
async fn favorites_seed_and_save_keep_default_in_list() {
    let dir = test_dir();
    let path = dir.join("favorites.json");

    let mut favorites = Favorites::load_or_seed(&path).await.unwrap();
    assert!(favorites.default_model.is_none());
    assert_eq!(favorites.default_settings.max_tokens, 512);

    favorites.default_model = Some("Qwen3-0.6B-Q4_K_M.gguf".to_string());
    favorites.save(&path).await.unwrap();

    let reloaded = Favorites::load_or_seed(&path).await.unwrap();
    assert!(reloaded
        .favorite_models
        .contains(&"Qwen3-0.6B-Q4_K_M.gguf".to_string()));
    cleanup(&dir);
}
