//! Reflection and intervention records
//!
//! Workers periodically emit a structured [`SelfReport`]. Each report is
//! stored on the plan as a [`ReflectionSignal`]; when a rule fires the signal
//! is marked triggered and an [`InterventionSignal`] is derived from it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// What the worker intends to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[default]
    Continue,
    Pivot,
    Escalate,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Pivot => write!(f, "pivot"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "pivot" => Ok(Self::Pivot),
            "escalate" => Ok(Self::Escalate),
            other => Err(format!("Unknown decision: {}", other)),
        }
    }
}

/// Why an intervention was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionReason {
    AgentEscalated,
    LowConfidence,
    MultipleBlockers,
    ConfidenceDeclining,
    Stalled,
}

impl std::fmt::Display for InterventionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AgentEscalated => write!(f, "agent_escalated"),
            Self::LowConfidence => write!(f, "low_confidence"),
            Self::MultipleBlockers => write!(f, "multiple_blockers"),
            Self::ConfidenceDeclining => write!(f, "confidence_declining"),
            Self::Stalled => write!(f, "stalled"),
        }
    }
}

/// A worker's structured account of its progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfReport {
    /// Percent of the current step done (0-100)
    pub progress: u8,

    /// Confidence the step will succeed (0-100)
    pub confidence: u8,

    #[serde(default)]
    pub blockers: Vec<String>,

    #[serde(default)]
    pub files_completed: Vec<String>,

    #[serde(default)]
    pub decision: Decision,

    #[serde(default)]
    pub notes: Option<String>,
}

impl SelfReport {
    /// Parse a report from tool input or an embedded JSON object
    ///
    /// Percentages are clamped to 0-100. `progress` and `confidence` are
    /// required; everything else defaults.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        debug!("SelfReport::from_value: called");
        let progress = percent(value, "progress")?;
        let confidence = percent(value, "confidence")?;

        let decision = match value.get("decision").and_then(Value::as_str) {
            Some(s) => s.parse()?,
            None => Decision::Continue,
        };

        Ok(Self {
            progress,
            confidence,
            blockers: string_list(value, "blockers"),
            files_completed: string_list(value, "files_completed"),
            decision,
            notes: value
                .get("notes")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(String::from),
        })
    }

    /// Find a self-report JSON object inside free text
    ///
    /// Accepts a bare object or one wrapped in a fenced code block. Returns
    /// None when no parseable report is present.
    pub fn from_text(text: &str) -> Option<Self> {
        debug!(text_len = text.len(), "SelfReport::from_text: called");
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end <= start {
            return None;
        }
        let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
        Self::from_value(&value).ok()
    }
}

fn percent(value: &Value, key: &str) -> Result<u8, String> {
    let raw = value
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| format!("{} is required and must be a number", key))?;
    Ok(raw.round().clamp(0.0, 100.0) as u8)
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// A self-report as recorded on the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionSignal {
    /// Worker that produced the report
    pub worker_id: String,

    /// 1-based step the worker was on
    pub step_index: usize,

    /// Loop iteration (run-wide) when the report arrived
    pub iteration: u32,

    pub progress: u8,

    pub files_completed: Vec<String>,

    pub blockers: Vec<String>,

    pub confidence: u8,

    pub decision: Decision,

    pub notes: Option<String>,

    /// Whether a rule fired for this report
    pub triggered: bool,

    pub reason: Option<InterventionReason>,

    pub recorded_at: i64,

    /// When a supervisor acknowledged the intervention
    #[serde(default)]
    pub acknowledged_at: Option<i64>,
}

impl ReflectionSignal {
    pub fn new(worker_id: impl Into<String>, step_index: usize, iteration: u32, report: SelfReport, now: i64) -> Self {
        Self {
            worker_id: worker_id.into(),
            step_index,
            iteration,
            progress: report.progress,
            files_completed: report.files_completed,
            blockers: report.blockers,
            confidence: report.confidence,
            decision: report.decision,
            notes: report.notes,
            triggered: false,
            reason: None,
            recorded_at: now,
            acknowledged_at: None,
        }
    }

    /// Mark this report as having fired a rule
    pub fn trigger(&mut self, reason: InterventionReason) {
        self.triggered = true;
        self.reason = Some(reason);
    }
}

/// Escalation raised to a supervising process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionSignal {
    pub worker_id: String,

    pub project_id: String,

    pub task_id: String,

    pub step_index: usize,

    pub reason: InterventionReason,

    /// Confidence of the triggering report
    pub confidence: u8,

    /// Blockers of the triggering report
    pub blockers: Vec<String>,

    pub raised_at: i64,

    pub acknowledged: bool,

    pub acknowledged_at: Option<i64>,
}

impl InterventionSignal {
    /// Derive an intervention from a triggered reflection
    ///
    /// Returns None if the reflection did not trigger.
    pub fn from_reflection(project_id: &str, task_id: &str, signal: &ReflectionSignal) -> Option<Self> {
        let reason = signal.reason.filter(|_| signal.triggered)?;
        Some(Self {
            worker_id: signal.worker_id.clone(),
            project_id: project_id.to_string(),
            task_id: task_id.to_string(),
            step_index: signal.step_index,
            reason,
            confidence: signal.confidence,
            blockers: signal.blockers.clone(),
            raised_at: signal.recorded_at,
            acknowledged: signal.acknowledged_at.is_some(),
            acknowledged_at: signal.acknowledged_at,
        })
    }
}
