//! Per-command stage timing and the bounded history used for trend
//! analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::VecDeque;

/// Pipeline stages a command passes through, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    WakeWordDetected,
    SttRequestSent,
    SttTranscriptionReceived,
    LlmInferenceStart,
    LlmInferenceEnd,
    DispatcherStart,
    DispatcherComplete,
    HaApiCall,
    HaResponse,
}

/// Named stage windows derived from the raw timestamps.
const STAGE_WINDOWS: [(&str, Stage, Stage); 4] = [
    (
        "speech_to_text",
        Stage::SttRequestSent,
        Stage::SttTranscriptionReceived,
    ),
    (
        "llm_inference",
        Stage::LlmInferenceStart,
        Stage::LlmInferenceEnd,
    ),
    (
        "dispatcher",
        Stage::DispatcherStart,
        Stage::DispatcherComplete,
    ),
    ("home_assistant", Stage::HaApiCall, Stage::HaResponse),
];

#[derive(Clone, Debug, Serialize)]
pub struct Bottleneck {
    pub stage: &'static str,
    pub duration_ms: f64,
    pub percent: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimedCommand {
    pub command_id: String,
    pub timestamps: BTreeMap<Stage, DateTime<Utc>>,
}

impl TimedCommand {
    pub fn new() -> Self {
        Self {
            command_id: format!("cmd_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            timestamps: BTreeMap::new(),
        }
    }

    pub fn mark(&mut self, stage: Stage) {
        self.mark_at(stage, Utc::now());
    }

    pub fn mark_at(&mut self, stage: Stage, timestamp: DateTime<Utc>) {
        self.timestamps.insert(stage, timestamp);
    }

    /// Milliseconds between two marked stages, if both are present.
    pub fn duration(&self, start: Stage, end: Stage) -> Option<f64> {
        let start = self.timestamps.get(&start)?;
        let end = self.timestamps.get(&end)?;
        Some((*end - *start).num_microseconds()? as f64 / 1000.0)
    }

    /// First-to-last span across every marked stage.
    pub fn total_duration(&self) -> Option<f64> {
        let first = self.timestamps.values().min()?;
        let last = self.timestamps.values().max()?;
        Some((*last - *first).num_microseconds()? as f64 / 1000.0)
    }

    /// Stage windows taking at least `threshold_percent` of the total,
    /// slowest first.
    pub fn bottlenecks(&self, threshold_percent: f64) -> Vec<Bottleneck> {
        let Some(total) = self.total_duration() else {
            return Vec::new();
        };
        if total <= 0.0 {
            return Vec::new();
        }

        let mut bottlenecks: Vec<Bottleneck> = STAGE_WINDOWS
            .iter()
            .filter_map(|(name, start, end)| {
                let duration_ms = self.duration(*start, *end)?;
                let percent = duration_ms / total * 100.0;
                (percent >= threshold_percent).then_some(Bottleneck {
                    stage: name,
                    duration_ms,
                    percent,
                })
            })
            .collect();
        bottlenecks.sort_by(|a, b| b.duration_ms.total_cmp(&a.duration_ms));
        bottlenecks
    }

    /// Human-readable breakdown for the status surface.
    pub fn breakdown(&self) -> String {
        let mut lines = vec![format!("Command {}", self.command_id)];
        let total = self.total_duration();
        for (name, start, end) in STAGE_WINDOWS {
            if let Some(duration) = self.duration(start, end) {
                let percent = total.map(|t| duration / t * 100.0).unwrap_or(0.0);
                lines.push(format!("  {name:<16} {duration:>8.0}ms ({percent:.1}%)"));
            }
        }
        if let Some(total) = total {
            lines.push(format!("Total: {total:.1}ms"));
        }
        for bottleneck in self.bottlenecks(25.0).iter().take(2) {
            lines.push(format!(
                "  bottleneck: {} {:.0}ms ({:.0}%)",
                bottleneck.stage, bottleneck.duration_ms, bottleneck.percent
            ));
        }
        lines.join("\n")
    }
}

impl Default for TimedCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Stable,
    Improving,
    Degrading,
    InsufficientData,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrendReport {
    pub trend: Trend,
    pub change_percent: f64,
    pub first_half_avg_ms: f64,
    pub second_half_avg_ms: f64,
    pub sample_size: usize,
}

/// Fixed-capacity ring of completed commands.
pub struct CommandHistory {
    max_size: usize,
    commands: VecDeque<TimedCommand>,
}

impl CommandHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            commands: VecDeque::new(),
        }
    }

    pub fn add(&mut self, command: TimedCommand) {
        self.commands.push_back(command);
        while self.commands.len() > self.max_size {
            self.commands.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn latest(&self, count: usize) -> Vec<TimedCommand> {
        self.commands.iter().rev().take(count).cloned().collect()
    }

    pub fn average_duration(&self) -> Option<f64> {
        let durations: Vec<f64> = self
            .commands
            .iter()
            .filter_map(|c| c.total_duration())
            .collect();
        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    }

    /// Average duration of each stage window across the ring.
    pub fn stage_averages(&self) -> BTreeMap<&'static str, f64> {
        let mut totals: BTreeMap<&'static str, (f64, usize)> = BTreeMap::new();
        for command in &self.commands {
            for (name, start, end) in STAGE_WINDOWS {
                if let Some(duration) = command.duration(start, end) {
                    let slot = totals.entry(name).or_insert((0.0, 0));
                    slot.0 += duration;
                    slot.1 += 1;
                }
            }
        }
        totals
            .into_iter()
            .map(|(name, (total, count))| (name, total / count as f64))
            .collect()
    }

    /// Compare the two halves of the ring. Within a ±5% band the trend is
    /// stable; beyond it, degrading (slower) or improving (faster).
    pub fn trend(&self) -> TrendReport {
        if self.commands.len() < 2 {
            return TrendReport {
                trend: Trend::InsufficientData,
                change_percent: 0.0,
                first_half_avg_ms: 0.0,
                second_half_avg_ms: 0.0,
                sample_size: self.commands.len(),
            };
        }

        let mid = self.commands.len() / 2;
        let avg = |commands: &[&TimedCommand]| -> f64 {
            let sum: f64 = commands
                .iter()
                .map(|c| c.total_duration().unwrap_or(0.0))
                .sum();
            sum / commands.len() as f64
        };
        let all: Vec<&TimedCommand> = self.commands.iter().collect();
        let first_half_avg_ms = avg(&all[..mid]);
        let second_half_avg_ms = avg(&all[mid..]);

        let change_percent = if first_half_avg_ms > 0.0 {
            (second_half_avg_ms - first_half_avg_ms) / first_half_avg_ms * 100.0
        } else {
            0.0
        };

        let trend = if change_percent.abs() < 5.0 {
            Trend::Stable
        } else if change_percent > 0.0 {
            Trend::Degrading
        } else {
            Trend::Improving
        };

        TrendReport {
            trend,
            change_percent,
            first_half_avg_ms,
            second_half_avg_ms,
            sample_size: self.commands.len(),
        }
    }
}
