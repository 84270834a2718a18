//! Table-driven translation from `(entity domain, action)` to a Home
//! Assistant service call.

use orac_core::{Action, SimpleAction};
use serde_json::{json, Value};

pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: Value,
}

/// Build the native call for an action against an entity of the given
/// domain. Parameterised actions carry their payload: `set N%` becomes
/// `brightness` (0-255) on lights and `position` on covers; `set NC` becomes
/// `temperature` on climate entities.
pub fn build_service_call(
    domain: &str,
    action: Action,
    entity_id: &str,
) -> std::result::Result<ServiceCall, String> {
    use Action::*;
    use SimpleAction::*;

    let mut data = json!({ "entity_id": entity_id });

    let (call_domain, service): (&str, &str) = match (domain, action) {
        ("light", Simple(On)) => ("light", "turn_on"),
        ("light", Simple(Off)) => ("light", "turn_off"),
        ("light", Simple(Toggle)) => ("light", "toggle"),
        ("light", SetPercent(pct)) => {
            data["brightness"] = json!(u32::from(pct) * 255 / 100);
            ("light", "turn_on")
        }

        ("climate", Simple(On)) => ("climate", "turn_on"),
        ("climate", Simple(Off)) => ("climate", "turn_off"),
        ("climate", SetTemperature(temp)) => {
            data["temperature"] = json!(temp);
            ("climate", "set_temperature")
        }

        ("cover", Simple(Open)) | ("cover", Simple(Up)) => ("cover", "open_cover"),
        ("cover", Simple(Close)) | ("cover", Simple(Down)) => ("cover", "close_cover"),
        ("cover", Simple(Toggle)) => ("cover", "toggle"),
        ("cover", SetPercent(pct)) => {
            data["position"] = json!(pct);
            ("cover", "set_cover_position")
        }

        ("media_player", Simple(On)) => ("media_player", "turn_on"),
        ("media_player", Simple(Off)) => ("media_player", "turn_off"),
        ("media_player", Simple(Loud)) => ("media_player", "volume_up"),
        ("media_player", Simple(Quiet)) => ("media_player", "volume_down"),

        ("switch", Simple(On)) => ("switch", "turn_on"),
        ("switch", Simple(Off)) => ("switch", "turn_off"),
        ("switch", Simple(Toggle)) => ("switch", "toggle"),

        // Domains without a specific table go through the generic services.
        (_, Simple(On)) => ("homeassistant", "turn_on"),
        (_, Simple(Off)) => ("homeassistant", "turn_off"),
        (_, Simple(Toggle)) => ("homeassistant", "toggle"),

        (domain, action) => {
            return Err(format!(
                "action '{action}' is not supported for domain '{domain}'"
            ))
        }
    };

    Ok(ServiceCall {
        domain: call_domain.to_string(),
        service: service.to_string(),
        data,
    })
}
