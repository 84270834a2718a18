//! GBNF grammar generation from device mappings.
//!
//! The grammar is a pure function of the backend's enabled, complete
//! mappings: vocabularies are sorted, the action palette is fixed, and
//! regenerating without mapping changes produces byte-identical output.

use crate::record::BackendRecord;
use chrono::{DateTime, Utc};
use orac_core::command::{SimpleAction, UNKNOWN};
use orac_core::{fsutil, Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

pub fn grammar_file_name(backend_id: &str) -> String {
    format!("backend_{backend_id}.gbnf")
}

/// A `(device_type, location)` pair backed by a concrete entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Combination {
    pub entity_id: String,
    pub device_type: String,
    pub location: String,
    pub original_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GrammarStats {
    pub device_types: Vec<String>,
    pub locations: Vec<String>,
    pub device_type_count: usize,
    pub location_count: usize,
    pub valid_combination_count: usize,
    pub valid_combinations: Vec<Combination>,
}

/// A generated grammar plus where it lives and what went into it.
#[derive(Clone, Debug)]
pub struct GrammarArtifact {
    pub text: String,
    pub path: PathBuf,
    pub stats: GrammarStats,
}

/// On-disk status of a backend's grammar, for operator surfaces.
#[derive(Clone, Debug, Serialize)]
pub struct GrammarStatus {
    pub grammar_file_exists: bool,
    pub grammar_file_path: String,
    pub grammar_file_size: Option<u64>,
    pub grammar_file_modified: Option<DateTime<Utc>>,
    pub total_devices: usize,
    pub enabled_devices: usize,
    pub mapped_devices: usize,
    pub device_types: Vec<String>,
    pub locations: Vec<String>,
    pub ready_for_generation: bool,
}

/// Heuristic check of an utterance against the configured vocabulary. Used
/// only by operator test surfaces; never authoritative.
#[derive(Clone, Debug, Serialize)]
pub struct CommandCheck {
    pub valid: bool,
    pub command: String,
    pub found_device: Option<String>,
    pub found_location: Option<String>,
    pub matched_entity: Option<Combination>,
    pub message: String,
}

pub struct GrammarGenerator {
    grammars_dir: PathBuf,
}

impl GrammarGenerator {
    pub fn new(grammars_dir: PathBuf) -> Self {
        Self { grammars_dir }
    }

    pub fn grammar_path(&self, backend_id: &str) -> PathBuf {
        self.grammars_dir.join(grammar_file_name(backend_id))
    }

    /// Project the record into a grammar. Fails if no enabled, complete
    /// mapping exists (there would be nothing for the model to say).
    pub fn generate(&self, record: &BackendRecord) -> Result<GrammarArtifact> {
        let stats = collect_stats(record);
        if stats.valid_combination_count == 0 {
            return Err(Error::validation(format!(
                "backend '{}' has no enabled device mappings with both device type and location set",
                record.id
            )));
        }

        let text = render_grammar(&stats.device_types, &stats.locations);
        Ok(GrammarArtifact {
            text,
            path: self.grammar_path(&record.id),
            stats,
        })
    }

    /// Generate and atomically write `backend_<id>.gbnf`.
    pub async fn generate_and_save(&self, record: &BackendRecord) -> Result<GrammarArtifact> {
        let artifact = self.generate(record)?;
        tokio::fs::create_dir_all(&self.grammars_dir).await?;
        fsutil::write_atomic(&artifact.path, artifact.text.as_bytes()).await?;
        info!(
            backend = %record.id,
            file = %artifact.path.display(),
            device_types = artifact.stats.device_type_count,
            locations = artifact.stats.location_count,
            "generated grammar"
        );
        Ok(artifact)
    }

    pub async fn status(&self, record: &BackendRecord) -> GrammarStatus {
        let stats = collect_stats(record);
        let path = self.grammar_path(&record.id);
        let meta = tokio::fs::metadata(&path).await.ok();
        GrammarStatus {
            grammar_file_exists: meta.is_some(),
            grammar_file_path: path.display().to_string(),
            grammar_file_size: meta.as_ref().map(|m| m.len()),
            grammar_file_modified: meta
                .as_ref()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from),
            total_devices: record.device_mappings.len(),
            enabled_devices: record.device_mappings.values().filter(|m| m.enabled).count(),
            mapped_devices: stats.valid_combination_count,
            device_types: stats.device_types,
            locations: stats.locations,
            ready_for_generation: stats.valid_combination_count > 0,
        }
    }

    /// Token-containment check: does the utterance mention a configured
    /// device type and location, and is that pair actually mapped?
    pub fn test_command(&self, record: &BackendRecord, command: &str) -> CommandCheck {
        let stats = collect_stats(record);
        let lower = command.to_lowercase();

        let found_device = stats
            .device_types
            .iter()
            .filter(|dt| *dt != UNKNOWN)
            .find(|dt| lower.contains(&dt.to_lowercase()))
            .cloned();
        let found_location = stats
            .locations
            .iter()
            .filter(|loc| *loc != UNKNOWN)
            .find(|loc| lower.contains(&loc.to_lowercase()))
            .cloned();

        let matched_entity = match (&found_device, &found_location) {
            (Some(device), Some(location)) => stats
                .valid_combinations
                .iter()
                .find(|c| {
                    c.device_type.eq_ignore_ascii_case(device)
                        && c.location.eq_ignore_ascii_case(location)
                })
                .cloned(),
            _ => None,
        };

        let (valid, message) = match (&found_device, &found_location, &matched_entity) {
            (_, _, Some(combo)) => (
                true,
                format!("valid command, maps to {}", combo.original_name),
            ),
            (None, _, _) => (false, "no configured device type found".to_string()),
            (_, None, _) => (false, "no configured location found".to_string()),
            _ => (
                false,
                "device/location combination not configured".to_string(),
            ),
        };

        CommandCheck {
            valid,
            command: command.to_string(),
            found_device,
            found_location,
            matched_entity,
            message,
        }
    }
}

fn collect_stats(record: &BackendRecord) -> GrammarStats {
    let mut device_types = BTreeSet::new();
    let mut locations = BTreeSet::new();
    let mut combinations = Vec::new();

    for (entity_id, mapping) in record.complete_mappings() {
        device_types.insert(mapping.device_type.clone());
        locations.insert(mapping.location.clone());
        combinations.push(Combination {
            entity_id: entity_id.clone(),
            device_type: mapping.device_type.clone(),
            location: mapping.location.clone(),
            original_name: if mapping.original_name.is_empty() {
                entity_id.clone()
            } else {
                mapping.original_name.clone()
            },
        });
    }

    let device_types: Vec<String> = device_types.into_iter().collect();
    let locations: Vec<String> = locations.into_iter().collect();
    GrammarStats {
        device_type_count: device_types.len(),
        location_count: locations.len(),
        valid_combination_count: combinations.len(),
        device_types,
        locations,
        valid_combinations: combinations,
    }
}

/// Render the grammar text. The JSON envelope is rigid: literal keys in
/// `device`, `action`, `location` order with no whitespace flexibility.
fn render_grammar(device_types: &[String], locations: &[String]) -> String {
    let mut lines = Vec::new();

    lines.push(
        r#"root ::= "{\"device\":\"" device "\",\"action\":\"" action "\",\"location\":\"" location "\"}""#
            .to_string(),
    );
    lines.push(String::new());
    lines.push(alternation_rule("device", device_types));
    lines.push(alternation_rule("location", locations));
    lines.push(String::new());

    let mut action_terms: Vec<String> = SimpleAction::ALL
        .iter()
        .map(|a| format!("\"{}\"", a.as_str()))
        .collect();
    action_terms.push(format!("\"{UNKNOWN}\""));
    action_terms.push("set-action".to_string());
    action_terms.push("set-temp-action".to_string());
    lines.push(format!("action ::= {}", action_terms.join(" | ")));

    let pct: Vec<String> = (0..=10).map(|n| format!("\"{}%\"", n * 10)).collect();
    lines.push(format!("pct ::= {}", pct.join(" | ")));

    let temp: Vec<String> = (5..=30).map(|n| format!("\"{n}C\"")).collect();
    lines.push(format!("temp ::= {}", temp.join(" | ")));

    lines.push("set-action ::= \"set \" pct".to_string());
    lines.push("set-temp-action ::= \"set \" temp".to_string());
    lines.push(String::new());

    lines.join("\n")
}

fn alternation_rule(name: &str, vocabulary: &[String]) -> String {
    let mut terms: Vec<String> = vocabulary.iter().map(|v| format!("\"{v}\"")).collect();
    if !vocabulary.iter().any(|v| v == UNKNOWN) {
        terms.push(format!("\"{UNKNOWN}\""));
    }
    format!("{name} ::= {}", terms.join(" | "))
}

/// Parse the `device`/`location`/`action` alternation literals back out of a
/// grammar file. The pipeline uses this to build its hint prompt.
pub fn parse_alternations(grammar_text: &str, rule: &str) -> Vec<String> {
    static LITERAL: OnceLock<Regex> = OnceLock::new();
    let literal = LITERAL.get_or_init(|| Regex::new(r#""([^"]+)""#).expect("literal regex"));

    let Ok(rule_line) = Regex::new(&format!(r"(?m)^{}\s*::=\s*(.+)$", regex::escape(rule)))
    else {
        return Vec::new();
    };
    let Some(captures) = rule_line.captures(grammar_text) else {
        return Vec::new();
    };

    literal
        .captures_iter(&captures[1])
        .map(|c| c[1].to_string())
        .filter(|t| t != UNKNOWN)
        .collect()
}

/// Load a grammar file from disk.
pub async fn read_grammar(path: &Path) -> Result<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}
