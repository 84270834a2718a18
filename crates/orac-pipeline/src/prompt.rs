//! Prompt shaping: wake-word stripping, error-correction detection, the
//! grammar-primed prompt and the template prompt.

use orac_backends::grammar::parse_alternations;
use orac_llm::ModelConfig;
use crate::topics::Topic;

/// Wake words STT front-ends leave on the transcription. Longer phrases
/// first so `hey computer` is not half-stripped.
pub const WAKE_WORDS: [&str; 5] = ["hey computer", "ok computer", "hey orac", "computer", "orac"];

/// Utterances that undo the most recent cache entry instead of running a
/// command.
pub const ERROR_CORRECTION_PHRASES: [&str; 3] = ["computer error", "orac error", "that was wrong"];

/// Strip a leading wake word plus trailing punctuation. Small models are
/// confused by the wake word, and the cache key must not contain it.
pub fn strip_wake_word(prompt: &str) -> &str {
    let trimmed = prompt.trim();
    let lower = trimmed.to_lowercase();

    for wake_word in WAKE_WORDS {
        if !lower.starts_with(wake_word) {
            continue;
        }
        let stripped = trimmed[wake_word.len()..].trim_start_matches([' ', ',', '.', ':', ';', '!', '?']);
        if !stripped.is_empty() {
            return stripped;
        }
    }
    trimmed
}

/// Exact or prefix match against the error-correction phrases.
pub fn is_error_correction(prompt: &str) -> bool {
    let normalized = prompt.trim().to_lowercase();
    ERROR_CORRECTION_PHRASES
        .iter()
        .any(|phrase| normalized == *phrase || normalized.starts_with(&format!("{phrase} ")))
}

/// Vocabulary lists parsed back out of a grammar file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GrammarOptions {
    pub devices: Vec<String>,
    pub locations: Vec<String>,
    pub actions: Vec<String>,
}

pub fn parse_grammar_options(grammar_text: &str) -> GrammarOptions {
    GrammarOptions {
        devices: parse_alternations(grammar_text, "device"),
        locations: parse_alternations(grammar_text, "location"),
        actions: parse_alternations(grammar_text, "action"),
    }
}

/// Grammar-constrained prompt: user prefix, an auto-generated hint listing
/// the allowed vocabulary, and the opening of the JSON envelope so the
/// model starts inside the required shape.
pub fn format_grammar_prompt(topic: &Topic, options: &GrammarOptions, user_prompt: &str) -> String {
    let prefix = topic.settings.system_prompt.trim();
    let prefix = if prefix.is_empty() {
        "/no_think Match input to JSON."
    } else {
        prefix
    };

    let hint = if options.devices.is_empty() && options.locations.is_empty() {
        "Output JSON with device, action, location. Use UNKNOWN if unclear.".to_string()
    } else {
        let devices = if options.devices.is_empty() {
            "UNKNOWN".to_string()
        } else {
            options.devices.join(", ")
        };
        let locations = if options.locations.is_empty() {
            "UNKNOWN".to_string()
        } else {
            options.locations.join(", ")
        };
        format!("Devices: [{devices}]. Locations: [{locations}]. Use UNKNOWN if no match.")
    };

    format!("{prefix} {hint}\n\nUser: {user_prompt}\nAssistant: {{\"device\":\"")
}

/// Template prompt for unconstrained runs, honouring the topic's
/// `no_think` and `force_json` switches and the model's template.
pub fn format_template_prompt(
    topic: &Topic,
    model_config: Option<&ModelConfig>,
    request_system_prompt: Option<&str>,
    user_prompt: &str,
    force_json: bool,
) -> String {
    let template = model_config
        .and_then(|c| c.prompt_format.as_ref())
        .map(|f| f.template.clone())
        .unwrap_or_else(|| "{system_prompt}\n\n{user_prompt}".to_string());

    let mut system_prompt = if force_json {
        "You must respond with valid JSON only. Do not include any explanations, thinking, or commentary outside the JSON structure.".to_string()
    } else {
        request_system_prompt
            .map(str::to_string)
            .or_else(|| {
                let topic_prompt = topic.settings.system_prompt.trim();
                (!topic_prompt.is_empty()).then(|| topic_prompt.to_string())
            })
            .or_else(|| model_config.and_then(|c| c.system_prompt.clone()))
            .unwrap_or_default()
    };

    if topic.settings.no_think && !system_prompt.starts_with("/no_think") {
        system_prompt = format!("/no_think\n\n{system_prompt}");
    }

    template
        .replace("{system_prompt}", &system_prompt)
        .replace("{user_prompt}", user_prompt)
}

/// Close off truncated grammar output: trim to the first balanced `{...}`
/// or append the closing characters. No semantic repair.
pub fn repair_json_response(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, c) in trimmed[start..].char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return trimmed[start..start + i + 1].to_string();
                    }
                }
                _ => {}
            }
        }
    }

    let mut repaired = trimmed.to_string();
    if !repaired.ends_with('"') {
        repaired.push('"');
    }
    repaired.push('}');
    repaired
}
