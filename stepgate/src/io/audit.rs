//! Audit trail for gate decisions.
//!
//! # Separation of Concerns
//!
//! - **Audit events (this module)**: product output appended as JSONL. Always
//!   written, unaffected by `RUST_LOG`, never able to change a decision.
//! - **Tracing (`logging`)**: developer diagnostics on stderr.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LogIntegrityWarning,
    LogIntegrityCorrected,
    LogParseAnomaly,
    HookSubagentStopPassed,
    HookSubagentStopFailed,
    ScopeViolation,
    CommitVerified,
    CommitNotVerified,
}

/// One audit record. Absent correlation fields are omitted, never `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Sink for audit events. Implementations must never fail the caller.
pub trait AuditLogWriter {
    fn log_event(&self, event: AuditEvent);
}

/// Appends one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonlAuditWriter {
    path: PathBuf,
}

impl JsonlAuditWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")
    }
}

impl AuditLogWriter for JsonlAuditWriter {
    fn log_event(&self, event: AuditEvent) {
        if let Err(err) = self.append(&event) {
            warn!(
                path = %self.path.display(),
                event_type = ?event.event_type,
                error = %err,
                "failed to append audit event"
            );
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditWriter;

impl AuditLogWriter for NullAuditWriter {
    fn log_event(&self, _event: AuditEvent) {}
}

/// Read back a JSONL audit file, skipping unparseable lines.
pub fn read_audit_log(path: &Path) -> std::io::Result<Vec<AuditEvent>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
