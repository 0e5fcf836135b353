//! Shared deterministic types for the gate core.
//!
//! These types define stable contracts between core components. They must not
//! depend on external state or I/O and stay deterministic across runs.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Execution status recorded for one phase of a step.
///
/// The four known statuses are closed; anything else the log contains is kept
/// verbatim in `Unrecognized` so the completion validator can report it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhaseStatus {
    Executed,
    Skipped,
    InProgress,
    NotExecuted,
    Unrecognized(String),
}

impl PhaseStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "EXECUTED" => Self::Executed,
            "SKIPPED" => Self::Skipped,
            "IN_PROGRESS" => Self::InProgress,
            "NOT_EXECUTED" => Self::NotExecuted,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Executed => "EXECUTED",
            Self::Skipped => "SKIPPED",
            Self::InProgress => "IN_PROGRESS",
            Self::NotExecuted => "NOT_EXECUTED",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized phase record from the execution log.
///
/// Built only by the parser. A timestamp correction yields a new event via
/// [`PhaseEvent::with_timestamp`]; events are never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseEvent {
    /// Position of the source record in the log's record list.
    pub record_index: usize,
    pub step_id: String,
    pub phase_name: String,
    pub status: PhaseStatus,
    /// Free-form outcome; for `SKIPPED` this is the skip reason.
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
    pub turns_used: Option<u32>,
    pub tokens_used: Option<u64>,
}

impl PhaseEvent {
    /// Copy of this event carrying a corrected timestamp.
    pub fn with_timestamp(&self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..self.clone()
        }
    }
}

/// Result of checking one step against the phase schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionResult {
    pub valid: bool,
    /// One stable message per violated phase rule, in schema order.
    pub errors: Vec<String>,
}

impl CompletionResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Why a timestamp was judged fabricated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionReason {
    PreTask,
    Future,
}

impl CorrectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreTask => "pre_task",
            Self::Future => "future",
        }
    }
}

/// A log record whose timestamp lies outside the plausible task window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectableEntry {
    pub record_index: usize,
    pub step_id: String,
    pub phase_name: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub original_timestamp: DateTime<Utc>,
    pub reason: CorrectionReason,
}

/// A single integrity finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityWarning {
    pub message: String,
    /// Index into [`IntegrityReport::correctable_entries`] when this finding
    /// can be fixed by a timestamp correction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<usize>,
}

/// Outcome of the log integrity scan: warnings plus a correction plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub warnings: Vec<IntegrityWarning>,
    pub correctable_entries: Vec<CorrectableEntry>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn messages(&self) -> Vec<&str> {
        self.warnings.iter().map(|w| w.message.as_str()).collect()
    }

    pub(crate) fn warn(&mut self, message: String) {
        self.warnings.push(IntegrityWarning {
            message,
            correction: None,
        });
    }

    pub(crate) fn warn_correctable(&mut self, message: String, entry: CorrectableEntry) {
        self.correctable_entries.push(entry);
        self.warnings.push(IntegrityWarning {
            message,
            correction: Some(self.correctable_entries.len() - 1),
        });
    }
}

/// Everything the gate knows about one "agent stopped" callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubagentStopContext {
    pub log_path: PathBuf,
    pub project_id: String,
    pub step_id: String,
    pub task_start_time: Option<DateTime<Utc>>,
    /// True when the host is calling back after a previous block.
    pub stop_hook_active: bool,
    pub cwd: Option<PathBuf>,
    pub turns_used: Option<u32>,
    pub tokens_used: Option<u64>,
    /// Caller-supplied id correlating every audit event of this invocation.
    pub hook_id: Option<String>,
    /// Globs describing the files this step may touch.
    pub allowed_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Allow,
    Block,
}

/// Final answer returned to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    pub action: DecisionAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            action: DecisionAction::Allow,
            reason: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: DecisionAction::Block,
            reason: Some(reason.into()),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.action == DecisionAction::Allow
    }
}

/// Canonical `YYYY-MM-DDTHH:MM:SSZ` rendering used in logs and audit events.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn serialize_timestamp<S: serde::Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(timestamp))
}
