//! Tests for the topic registry: bootstrap, auto-discovery, the
//! heartbeat/configuration separation, linkage and liveness.

use chrono::{Duration as ChronoDuration, Utc};
use orac_pipeline::topics::GENERAL_TOPIC;
use orac_pipeline::*;
use std::path::PathBuf;

const MODEL: &str = "Qwen3-0.6B-Q4_K_M.gguf";

fn test_dir() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("orac-topics-test-{}-{}", std::process::id(), id));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}

async fn registry(dir: &std::path::Path) -> TopicRegistry {
    TopicRegistry::load(dir.join("topics.json"), MODEL.to_string())
        .await
        .unwrap()
}

// ===========================================================================
// bootstrap
// ===========================================================================

#[tokio::test]
async fn general_topic_always_exists() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    let general = registry.get(GENERAL_TOPIC).await.unwrap();
    assert!(general.enabled);
    assert!(!general.auto_discovered);
    assert_eq!(general.model, MODEL);
    cleanup(&dir);
}

#[tokio::test]
async fn general_topic_cannot_be_deleted() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    let err = registry.delete(GENERAL_TOPIC).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(registry.get(GENERAL_TOPIC).await.is_some());
    cleanup(&dir);
}

#[tokio::test]
async fn registry_survives_reload() {
    let dir = test_dir();
    {
        let registry = registry(&dir).await;
        registry.get_or_autocreate("lounge").await.unwrap();
        registry
            .link_backend("lounge", Some("ha_12345678".to_string()))
            .await
            .unwrap();
    }
    let reloaded = registry(&dir).await;
    let lounge = reloaded.get("lounge").await.unwrap();
    assert_eq!(lounge.backend_id.as_deref(), Some("ha_12345678"));
    assert!(lounge.auto_discovered);
    cleanup(&dir);
}

#[tokio::test]
async fn corrupt_topics_file_fails_loudly() {
    let dir = test_dir();
    std::fs::write(dir.join("topics.json"), b"[[[").unwrap();
    assert!(
        TopicRegistry::load(dir.join("topics.json"), MODEL.to_string())
            .await
            .is_err()
    );
    cleanup(&dir);
}

// ===========================================================================
// auto-discovery
// ===========================================================================

#[tokio::test]
async fn unknown_topic_is_auto_discovered_with_defaults() {
    let dir = test_dir();
    let registry = registry(&dir).await;

    let topic = registry.get_or_autocreate("bedroom_lights").await.unwrap();
    assert!(topic.auto_discovered);
    assert!(topic.enabled);
    assert_eq!(topic.name, "Bedroom Lights");
    assert_eq!(topic.model, MODEL);
    assert!(topic.first_seen.is_some());

    // Second resolution returns the same topic, not a new one.
    let again = registry.get_or_autocreate("bedroom_lights").await.unwrap();
    assert_eq!(again.first_seen, topic.first_seen);
    cleanup(&dir);
}

// ===========================================================================
// update semantics
// ===========================================================================

#[tokio::test]
async fn update_preserves_protected_metadata() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    let original = registry.get_or_autocreate("lounge").await.unwrap();

    let updated = registry
        .update(
            "lounge",
            TopicUpdate {
                name: "Lounge".to_string(),
                description: String::new(),
                enabled: true,
                model: MODEL.to_string(),
                backend_id: Some("ha_x".to_string()),
                settings: TopicSettings::default(),
                grammar: GrammarConfig::default(),
            },
        )
        .await
        .unwrap();

    assert!(updated.auto_discovered, "auto_discovered is protected");
    assert_eq!(updated.first_seen, original.first_seen, "first_seen is protected");
    assert_eq!(updated.backend_id.as_deref(), Some("ha_x"));
    cleanup(&dir);
}

#[tokio::test]
async fn heartbeat_update_never_touches_configuration() {
    let dir = test_dir();
    let reg = registry(&dir).await;
    reg.get_or_autocreate("lounge").await.unwrap();
    reg
        .link_backend("lounge", Some("ha_x".to_string()))
        .await
        .unwrap();
    let before = reg.get("lounge").await.unwrap();

    let after = reg
        .update_heartbeat(
            "lounge",
            HeartbeatUpdate {
                status: Some(HeartbeatStatus::Active),
                wake_word: Some("computer".to_string()),
                trigger_count: Some(7),
                last_seen: None,
            },
        )
        .await
        .unwrap();

    // Heartbeat fields changed...
    assert_eq!(after.heartbeat.status, HeartbeatStatus::Active);
    assert_eq!(after.heartbeat.wake_word.as_deref(), Some("computer"));
    assert_eq!(after.heartbeat.trigger_count, 7);
    assert!(after.heartbeat.last_seen.is_some());

    // ...and every configuration field is bit-identical.
    assert_eq!(after.backend_id, before.backend_id);
    assert_eq!(after.model, before.model);
    assert_eq!(after.settings, before.settings);
    assert_eq!(after.grammar, before.grammar);
    assert_eq!(after.enabled, before.enabled);

    // The persisted file still records the linkage.
    let reloaded = registry(&dir).await;
    let on_disk = reloaded.get("lounge").await.unwrap();
    assert_eq!(on_disk.backend_id.as_deref(), Some("ha_x"));
    assert_eq!(on_disk.heartbeat.trigger_count, 7);
    cleanup(&dir);
}

#[tokio::test]
async fn heartbeat_auto_discovers_unknown_topics() {
    let dir = test_dir();
    let registry = registry(&dir).await;

    let topic = registry
        .update_heartbeat(
            "garage",
            HeartbeatUpdate {
                status: Some(HeartbeatStatus::Idle),
                ..HeartbeatUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(topic.auto_discovered);
    assert_eq!(topic.heartbeat.status, HeartbeatStatus::Idle);
    cleanup(&dir);
}

// ===========================================================================
// backend linkage
// ===========================================================================

#[tokio::test]
async fn linking_a_backend_disables_static_grammar() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    registry.get_or_autocreate("lounge").await.unwrap();
    registry
        .update(
            "lounge",
            TopicUpdate {
                name: "Lounge".to_string(),
                description: String::new(),
                enabled: true,
                model: MODEL.to_string(),
                backend_id: None,
                settings: TopicSettings::default(),
                grammar: GrammarConfig {
                    enabled: true,
                    file: Some("static.gbnf".to_string()),
                },
            },
        )
        .await
        .unwrap();

    let linked = registry
        .link_backend("lounge", Some("ha_x".to_string()))
        .await
        .unwrap();
    assert!(!linked.grammar.enabled);
    assert!(linked.grammar.file.is_none());

    let unlinked = registry.link_backend("lounge", None).await.unwrap();
    assert!(unlinked.backend_id.is_none());
    cleanup(&dir);
}

// ===========================================================================
// liveness
// ===========================================================================

#[tokio::test]
async fn live_status_follows_heartbeat_age_thresholds() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    let mut topic = registry.get_or_autocreate("lounge").await.unwrap();
    let now = Utc::now();

    assert_eq!(topic.live_status(now), LiveStatus::Unknown);

    topic.heartbeat.last_seen = Some(now - ChronoDuration::seconds(10));
    assert_eq!(topic.live_status(now), LiveStatus::Active);

    topic.heartbeat.last_seen = Some(now - ChronoDuration::seconds(50));
    assert_eq!(topic.live_status(now), LiveStatus::Idle);

    topic.heartbeat.last_seen = Some(now - ChronoDuration::seconds(120));
    assert_eq!(topic.live_status(now), LiveStatus::Stale);
    cleanup(&dir);
}

#[tokio::test]
async fn heartbeat_summary_counts_by_liveness() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    registry
        .update_heartbeat("lounge", HeartbeatUpdate::default())
        .await
        .unwrap();

    let summary = registry.heartbeat_summary().await;
    assert_eq!(summary.total, 2, "general plus lounge");
    assert_eq!(summary.active, 1);
    assert_eq!(summary.unknown, 1, "general has no heartbeat yet");
    assert!(summary.topics.contains_key("lounge"));
    cleanup(&dir);
}

#[tokio::test]
async fn mark_used_sets_last_used() {
    let dir = test_dir();
    let registry = registry(&dir).await;
    registry.get_or_autocreate("lounge").await.unwrap();
    registry.mark_used("lounge").await.unwrap();
    assert!(registry.get("lounge").await.unwrap().last_used.is_some());
    cleanup(&dir);
}
