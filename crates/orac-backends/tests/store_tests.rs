//! Tests for the device mapping store against a real filesystem.

use orac_backends::*;
use std::path::PathBuf;

fn test_dir() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("orac-store-test-{}-{}", std::process::id(), id));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}

fn connection() -> ConnectionConfig {
    ConnectionConfig {
        url: "http://homeassistant.local:8123".to_string(),
        token: "token".to_string(),
        verify_ssl: true,
        timeout_secs: 10,
    }
}

fn enable_patch(device_type: &str, location: &str) -> MappingPatch {
    MappingPatch {
        enabled: Some(true),
        device_type: Some(device_type.to_string()),
        location: Some(location.to_string()),
        ..MappingPatch::default()
    }
}

// ===========================================================================
// create / get / list
// ===========================================================================

#[tokio::test]
async fn create_backend_seeds_defaults() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();

    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    assert!(backend.id.starts_with("homeassistant_"));
    assert_eq!(backend.id.len(), "homeassistant_".len() + 8);
    assert_eq!(
        backend.device_types,
        vec!["lights", "heating", "media_player", "blinds", "switches"]
    );
    assert!(backend.locations.is_empty());
    assert!(backend.device_mappings.is_empty());
    cleanup(&dir);
}

#[tokio::test]
async fn backends_survive_reload() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();
    store
        .upsert_entity(&backend.id, "light.lounge_lamp", &enable_patch("lights", "lounge"))
        .await
        .unwrap();

    let reloaded = MappingStore::load(dir.clone()).await.unwrap();
    let record = reloaded.get(&backend.id).await.unwrap();
    assert_eq!(record.name, "Home");
    let mapping = &record.device_mappings["light.lounge_lamp"];
    assert!(mapping.enabled);
    assert_eq!(mapping.device_type, "lights");
    assert_eq!(mapping.location, "lounge");
    cleanup(&dir);
}

#[tokio::test]
async fn corrupt_backend_file_fails_loudly() {
    let dir = test_dir();
    std::fs::write(dir.join("broken.json"), b"{ not json").unwrap();
    assert!(MappingStore::load(dir.clone()).await.is_err());
    cleanup(&dir);
}

#[tokio::test]
async fn missing_directory_yields_empty_store() {
    let dir = test_dir();
    let missing = dir.join("nothing-here");
    let store = MappingStore::load(missing).await.unwrap();
    assert!(store.list().await.is_empty());
    cleanup(&dir);
}

// ===========================================================================
// upsert semantics
// ===========================================================================

#[tokio::test]
async fn upsert_preserves_original_name_and_domain() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    store
        .upsert_entity(
            &backend.id,
            "light.lounge_lamp",
            &MappingPatch {
                original_name: Some("Lounge Lamp".to_string()),
                domain: Some("light".to_string()),
                ..MappingPatch::default()
            },
        )
        .await
        .unwrap();

    // A label-only patch must not clobber what the fetch discovered.
    let mapping = store
        .upsert_entity(&backend.id, "light.lounge_lamp", &enable_patch("lights", "lounge"))
        .await
        .unwrap();
    assert_eq!(mapping.original_name, "Lounge Lamp");
    assert_eq!(mapping.domain, "light");
    cleanup(&dir);
}

#[tokio::test]
async fn empty_patch_is_a_noop_on_existing_mapping() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();
    let before = store
        .upsert_entity(&backend.id, "light.lounge_lamp", &enable_patch("lights", "lounge"))
        .await
        .unwrap();

    let after = store
        .upsert_entity(&backend.id, "light.lounge_lamp", &MappingPatch::default())
        .await
        .unwrap();
    assert_eq!(before, after);
    cleanup(&dir);
}

#[tokio::test]
async fn bulk_upsert_applies_patch_to_every_entity() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    let ids = vec!["light.a".to_string(), "light.b".to_string(), "light.c".to_string()];
    let updated = store
        .bulk_upsert(
            &backend.id,
            &ids,
            &MappingPatch {
                enabled: Some(true),
                ..MappingPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated, 3);

    let record = store.get(&backend.id).await.unwrap();
    assert!(ids.iter().all(|id| record.device_mappings[id].enabled));
    assert_eq!(record.statistics.enabled_entities, 3);
    cleanup(&dir);
}

// ===========================================================================
// vocabularies
// ===========================================================================

#[tokio::test]
async fn add_device_type_is_case_insensitive_noop() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    let before = store.add_device_type(&backend.id, "Lights").await.unwrap();
    assert_eq!(before.len(), 5, "existing label must not be duplicated");

    let after = store.add_device_type(&backend.id, "fans").await.unwrap();
    assert_eq!(after.len(), 6);
    assert!(after.contains(&"fans".to_string()));
    cleanup(&dir);
}

#[tokio::test]
async fn add_location_preserves_operator_casing() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    let locations = store.add_location(&backend.id, "Living Room").await.unwrap();
    assert_eq!(locations, vec!["Living Room"]);

    let locations = store.add_location(&backend.id, "living room").await.unwrap();
    assert_eq!(locations, vec!["Living Room"]);
    cleanup(&dir);
}

// ===========================================================================
// validation
// ===========================================================================

#[tokio::test]
async fn validate_mappings_reports_duplicate_pairs() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    store
        .upsert_entity(&backend.id, "light.a", &enable_patch("lights", "lounge"))
        .await
        .unwrap();
    store
        .upsert_entity(&backend.id, "light.b", &enable_patch("lights", "lounge"))
        .await
        .unwrap();
    store
        .upsert_entity(&backend.id, "light.c", &enable_patch("lights", "kitchen"))
        .await
        .unwrap();

    let conflicts = store.validate_mappings(&backend.id).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].device_type, "lights");
    assert_eq!(conflicts[0].location, "lounge");
    assert_eq!(conflicts[0].entity_ids, vec!["light.a", "light.b"]);
    cleanup(&dir);
}

#[tokio::test]
async fn disabled_mappings_do_not_conflict() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();

    store
        .upsert_entity(&backend.id, "light.a", &enable_patch("lights", "lounge"))
        .await
        .unwrap();
    let mut patch = enable_patch("lights", "lounge");
    patch.enabled = Some(false);
    store
        .upsert_entity(&backend.id, "light.b", &patch)
        .await
        .unwrap();

    assert!(store.validate_mappings(&backend.id).await.unwrap().is_empty());
    cleanup(&dir);
}

// ===========================================================================
// entity merge + delete
// ===========================================================================

#[tokio::test]
async fn merge_fetched_entities_keeps_operator_labels() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();
    store
        .upsert_entity(&backend.id, "light.lounge_lamp", &enable_patch("lights", "lounge"))
        .await
        .unwrap();

    let fetched = vec![
        EntityDescriptor {
            entity_id: "light.lounge_lamp".to_string(),
            domain: "light".to_string(),
            original_name: "Lounge Lamp".to_string(),
            state: Some("on".to_string()),
        },
        EntityDescriptor {
            entity_id: "switch.kettle".to_string(),
            domain: "switch".to_string(),
            original_name: "Kettle".to_string(),
            state: Some("off".to_string()),
        },
    ];
    let record = store
        .merge_fetched_entities(&backend.id, &fetched)
        .await
        .unwrap();

    let lamp = &record.device_mappings["light.lounge_lamp"];
    assert!(lamp.enabled, "operator labels survive a fetch");
    assert_eq!(lamp.device_type, "lights");
    assert_eq!(lamp.original_name, "Lounge Lamp");

    let kettle = &record.device_mappings["switch.kettle"];
    assert!(!kettle.enabled, "new entities arrive disabled");
    assert_eq!(kettle.domain, "switch");
    assert!(record.statistics.last_sync.is_some());
    cleanup(&dir);
}

#[tokio::test]
async fn delete_backend_removes_file_and_record() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();
    let file = dir.join(format!("{}.json", backend.id));
    assert!(file.exists());

    store.delete_backend(&backend.id).await.unwrap();
    assert!(!file.exists());
    assert!(store.get(&backend.id).await.is_none());

    assert!(store.delete_backend(&backend.id).await.is_err());
    cleanup(&dir);
}

// ===========================================================================
// entity resolution
// ===========================================================================

#[tokio::test]
async fn resolve_entity_is_case_insensitive() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend("Home", BackendType::HomeAssistant, connection())
        .await
        .unwrap();
    store
        .upsert_entity(&backend.id, "light.lounge_lamp", &enable_patch("lights", "Lounge"))
        .await
        .unwrap();

    let record = store.get(&backend.id).await.unwrap();
    let (entity_id, _) = record.resolve_entity("Lights", "lounge").unwrap();
    assert_eq!(entity_id, "light.lounge_lamp");
    assert!(record.resolve_entity("lights", "kitchen").is_none());
    cleanup(&dir);
}
