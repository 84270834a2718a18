//! The `{device, action, location}` command triple and its action palette.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel emitted by the grammar when the model cannot match a field.
pub const UNKNOWN: &str = "UNKNOWN";

/// A command as emitted by a grammar-constrained model run.
///
/// `device` and `location` are vocabulary labels from the backend's device
/// mappings; `action` is drawn from the fixed palette below.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub device: String,
    pub action: String,
    pub location: String,
}

impl Command {
    /// Parse a model response into a command. Requires `device` and `action`;
    /// a missing `location` defaults to `UNKNOWN`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let obj = value.as_object()?;
        let device = obj.get("device")?.as_str()?.to_string();
        let action = obj.get("action")?.as_str()?.to_string();
        let location = obj
            .get("location")
            .and_then(|v| v.as_str())
            .unwrap_or(UNKNOWN)
            .to_string();
        Some(Self {
            device,
            action,
            location,
        })
    }

    pub fn parsed_action(&self) -> Option<Action> {
        self.action.parse().ok()
    }

    /// Any field left at the grammar's UNKNOWN sentinel.
    pub fn has_unknown(&self) -> bool {
        self.device == UNKNOWN || self.action == UNKNOWN || self.location == UNKNOWN
    }
}

/// One-word actions from the grammar palette.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SimpleAction {
    On,
    Off,
    Toggle,
    Open,
    Close,
    Up,
    Down,
    High,
    Low,
    Medium,
    Warm,
    Cold,
    Hot,
    Loud,
    Quiet,
}

impl SimpleAction {
    pub const ALL: [SimpleAction; 15] = [
        SimpleAction::On,
        SimpleAction::Off,
        SimpleAction::Toggle,
        SimpleAction::Open,
        SimpleAction::Close,
        SimpleAction::Up,
        SimpleAction::Down,
        SimpleAction::High,
        SimpleAction::Low,
        SimpleAction::Medium,
        SimpleAction::Warm,
        SimpleAction::Cold,
        SimpleAction::Hot,
        SimpleAction::Loud,
        SimpleAction::Quiet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SimpleAction::On => "on",
            SimpleAction::Off => "off",
            SimpleAction::Toggle => "toggle",
            SimpleAction::Open => "open",
            SimpleAction::Close => "close",
            SimpleAction::Up => "up",
            SimpleAction::Down => "down",
            SimpleAction::High => "high",
            SimpleAction::Low => "low",
            SimpleAction::Medium => "medium",
            SimpleAction::Warm => "warm",
            SimpleAction::Cold => "cold",
            SimpleAction::Hot => "hot",
            SimpleAction::Loud => "loud",
            SimpleAction::Quiet => "quiet",
        }
    }
}

/// Parsed form of the `action` field.
///
/// Parameterised actions are textual: `set N%` with N a multiple of ten in
/// 0..=100, and `set NC` with N in 5..=30 (degrees Celsius).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Simple(SimpleAction),
    SetPercent(u8),
    SetTemperature(i8),
    Unknown,
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == UNKNOWN {
            return Ok(Action::Unknown);
        }
        if let Some(rest) = s.strip_prefix("set ") {
            if let Some(pct) = rest.strip_suffix('%') {
                let n: u8 = pct.parse().map_err(|_| ())?;
                if n <= 100 && n % 10 == 0 {
                    return Ok(Action::SetPercent(n));
                }
                return Err(());
            }
            if let Some(temp) = rest.strip_suffix('C') {
                let n: i8 = temp.parse().map_err(|_| ())?;
                if (5..=30).contains(&n) {
                    return Ok(Action::SetTemperature(n));
                }
                return Err(());
            }
            return Err(());
        }
        SimpleAction::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .map(|a| Action::Simple(*a))
            .ok_or(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Simple(a) => write!(f, "{}", a.as_str()),
            Action::SetPercent(n) => write!(f, "set {n}%"),
            Action::SetTemperature(n) => write!(f, "set {n}C"),
            Action::Unknown => write!(f, "{UNKNOWN}"),
        }
    }
}
