//! Tests for the GBNF grammar generator: vocabulary projection,
//! determinism, parsing and the dispatch service table.

use orac_backends::grammar::{parse_alternations, GrammarGenerator};
use orac_backends::ha::dispatch::build_service_call;
use orac_backends::*;
use orac_core::Action;
use std::path::PathBuf;

fn test_dir() -> PathBuf {
    let id = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("orac-grammar-test-{}-{}", std::process::id(), id));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}

async fn backend_with_mappings(dir: &std::path::Path) -> (MappingStore, BackendRecord) {
    let store = MappingStore::load(dir.to_path_buf()).await.unwrap();
    let backend = store
        .create_backend(
            "Home",
            BackendType::HomeAssistant,
            ConnectionConfig {
                url: "http://ha.local:8123".to_string(),
                token: String::new(),
                verify_ssl: true,
                timeout_secs: 10,
            },
        )
        .await
        .unwrap();

    for (entity, device_type, location, enabled) in [
        ("light.lounge_lamp", "lights", "lounge", true),
        ("climate.bedroom", "heating", "bedroom", true),
        ("light.kitchen", "lights", "kitchen", true),
        // Enabled but incomplete: no location. Must be excluded.
        ("switch.kettle", "switches", "", true),
        // Complete but disabled. Must be excluded.
        ("cover.hall", "blinds", "hall", false),
    ] {
        store
            .upsert_entity(
                &backend.id,
                entity,
                &MappingPatch {
                    enabled: Some(enabled),
                    device_type: Some(device_type.to_string()),
                    location: Some(location.to_string()),
                    ..MappingPatch::default()
                },
            )
            .await
            .unwrap();
    }

    let record = store.get(&backend.id).await.unwrap();
    (store, record)
}

// ===========================================================================
// grammar content
// ===========================================================================

#[tokio::test]
async fn grammar_vocabulary_matches_enabled_complete_mappings() {
    let dir = test_dir();
    let (_, record) = backend_with_mappings(&dir).await;
    let generator = GrammarGenerator::new(dir.join("grammars"));

    let artifact = generator.generate(&record).unwrap();

    let devices = parse_alternations(&artifact.text, "device");
    let locations = parse_alternations(&artifact.text, "location");
    assert_eq!(devices, vec!["heating", "lights"]);
    assert_eq!(locations, vec!["bedroom", "kitchen", "lounge"]);

    // UNKNOWN is present in the raw rules even though parsing filters it.
    assert!(artifact.text.contains("\"UNKNOWN\""));
    cleanup(&dir);
}

#[tokio::test]
async fn grammar_envelope_is_rigid() {
    let dir = test_dir();
    let (_, record) = backend_with_mappings(&dir).await;
    let generator = GrammarGenerator::new(dir.join("grammars"));

    let artifact = generator.generate(&record).unwrap();
    let root = artifact.text.lines().next().unwrap();
    assert_eq!(
        root,
        r#"root ::= "{\"device\":\"" device "\",\"action\":\"" action "\",\"location\":\"" location "\"}""#
    );
    cleanup(&dir);
}

#[tokio::test]
async fn grammar_action_palette_is_fixed() {
    let dir = test_dir();
    let (_, record) = backend_with_mappings(&dir).await;
    let generator = GrammarGenerator::new(dir.join("grammars"));

    let artifact = generator.generate(&record).unwrap();
    let actions = parse_alternations(&artifact.text, "action");
    for action in ["on", "off", "toggle", "open", "close", "hot", "quiet"] {
        assert!(actions.contains(&action.to_string()), "missing {action}");
    }
    assert!(artifact.text.contains("set-action ::= \"set \" pct"));
    assert!(artifact.text.contains("set-temp-action ::= \"set \" temp"));
    assert!(artifact.text.contains("\"0%\""));
    assert!(artifact.text.contains("\"100%\""));
    assert!(artifact.text.contains("\"5C\""));
    assert!(artifact.text.contains("\"30C\""));
    cleanup(&dir);
}

#[tokio::test]
async fn regeneration_is_byte_identical_for_unchanged_input() {
    let dir = test_dir();
    let (_, record) = backend_with_mappings(&dir).await;
    let generator = GrammarGenerator::new(dir.join("grammars"));

    let first = generator.generate_and_save(&record).await.unwrap();
    let on_disk_first = std::fs::read(&first.path).unwrap();
    let second = generator.generate_and_save(&record).await.unwrap();
    let on_disk_second = std::fs::read(&second.path).unwrap();

    assert_eq!(first.text, second.text);
    assert_eq!(on_disk_first, on_disk_second);
    cleanup(&dir);
}

#[tokio::test]
async fn grammar_fails_without_complete_mappings() {
    let dir = test_dir();
    let store = MappingStore::load(dir.clone()).await.unwrap();
    let backend = store
        .create_backend(
            "Empty",
            BackendType::HomeAssistant,
            ConnectionConfig {
                url: "http://ha.local:8123".to_string(),
                token: String::new(),
                verify_ssl: true,
                timeout_secs: 10,
            },
        )
        .await
        .unwrap();
    let record = store.get(&backend.id).await.unwrap();

    let generator = GrammarGenerator::new(dir.join("grammars"));
    assert!(generator.generate(&record).is_err());
    cleanup(&dir);
}

#[tokio::test]
async fn grammar_stats_carry_valid_combinations() {
    let dir = test_dir();
    let (_, record) = backend_with_mappings(&dir).await;
    let generator = GrammarGenerator::new(dir.join("grammars"));

    let artifact = generator.generate(&record).unwrap();
    assert_eq!(artifact.stats.valid_combination_count, 3);
    assert_eq!(artifact.stats.device_type_count, 2);
    assert_eq!(artifact.stats.location_count, 3);
    assert!(artifact
        .stats
        .valid_combinations
        .iter()
        .any(|c| c.entity_id == "light.lounge_lamp" && c.location == "lounge"));
    cleanup(&dir);
}

// ===========================================================================
// command heuristic
// ===========================================================================

#[tokio::test]
async fn test_command_finds_configured_pair() {
    let dir = test_dir();
    let (_, record) = backend_with_mappings(&dir).await;
    let generator = GrammarGenerator::new(dir.join("grammars"));

    let check = generator.test_command(&record, "turn on the lounge lights please");
    assert!(check.valid);
    assert_eq!(check.found_device.as_deref(), Some("lights"));
    assert_eq!(check.found_location.as_deref(), Some("lounge"));

    let check = generator.test_command(&record, "open the garage");
    assert!(!check.valid);
    assert!(check.found_device.is_none());

    let check = generator.test_command(&record, "heating in the kitchen");
    assert!(!check.valid, "pair exists in vocab but is not mapped");
    cleanup(&dir);
}

// ===========================================================================
// dispatch service table
// ===========================================================================

#[test]
fn light_actions_map_to_light_services() {
    let call = build_service_call("light", "on".parse::<Action>().unwrap(), "light.x").unwrap();
    assert_eq!((call.domain.as_str(), call.service.as_str()), ("light", "turn_on"));

    let call = build_service_call("light", "set 50%".parse::<Action>().unwrap(), "light.x").unwrap();
    assert_eq!(call.service, "turn_on");
    assert_eq!(call.data["brightness"], 127);
    assert_eq!(call.data["entity_id"], "light.x");
}

#[test]
fn climate_set_temperature_carries_payload() {
    let call =
        build_service_call("climate", "set 21C".parse::<Action>().unwrap(), "climate.bed").unwrap();
    assert_eq!(call.domain, "climate");
    assert_eq!(call.service, "set_temperature");
    assert_eq!(call.data["temperature"], 21);
}

#[test]
fn cover_direction_actions_map_to_cover_services() {
    for (action, service) in [("open", "open_cover"), ("up", "open_cover"), ("close", "close_cover"), ("down", "close_cover")] {
        let call = build_service_call("cover", action.parse::<Action>().unwrap(), "cover.x").unwrap();
        assert_eq!(call.service, service, "{action}");
    }
}

#[test]
fn unknown_domain_falls_back_to_generic_services() {
    let call = build_service_call("vacuum", "on".parse::<Action>().unwrap(), "vacuum.x").unwrap();
    assert_eq!(call.domain, "homeassistant");
    assert_eq!(call.service, "turn_on");
}

#[test]
fn unsupported_domain_action_pairs_are_rejected() {
    assert!(build_service_call("light", "set 21C".parse::<Action>().unwrap(), "light.x").is_err());
    assert!(build_service_call("climate", "loud".parse::<Action>().unwrap(), "climate.x").is_err());
}
