//! Read-only report for `stepgate inspect`.
//!
//! Runs the same parse, integrity and completion checks as a hook decision
//! but never rewrites the log or appends audit events.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::completion::validate_completion;
use crate::core::correction::{PlannedCorrection, plan_corrections};
use crate::core::integrity::validate_integrity;
use crate::core::parser::ParseAnomaly;
use crate::core::schema::Schema;
use crate::core::types::{CompletionResult, IntegrityReport};
use crate::io::execution_log::ExecutionLogReader;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectReport {
    pub step_id: String,
    pub project_id: String,
    /// Parsed events across all steps.
    pub event_count: usize,
    /// Parsed events belonging to `step_id`.
    pub step_event_count: usize,
    pub anomalies: Vec<ParseAnomaly>,
    pub completion: CompletionResult,
    pub integrity: IntegrityReport,
    pub planned_corrections: Vec<PlannedCorrection>,
}

/// Build the report for `step_id` as of `now`.
pub fn inspect_log(
    reader: &dyn ExecutionLogReader,
    schema: &Schema,
    log_path: &Path,
    step_id: &str,
    task_start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<InspectReport> {
    let parsed = reader
        .read_log(log_path)
        .with_context(|| format!("inspect {}", log_path.display()))?;
    let project_id = reader.read_project_id(log_path).unwrap_or_default();
    let integrity = validate_integrity(step_id, &parsed.events, schema, task_start_time, now);
    let planned_corrections =
        plan_corrections(step_id, &integrity.correctable_entries, task_start_time, now);
    // Completion is judged on the events as they would read after correction.
    let corrected: Vec<_> = parsed
        .events
        .iter()
        .map(|event| {
            planned_corrections
                .iter()
                .find(|planned| planned.entry.record_index == event.record_index)
                .map_or_else(
                    || event.clone(),
                    |planned| event.with_timestamp(planned.corrected_timestamp),
                )
        })
        .collect();
    let completion = validate_completion(step_id, &corrected, schema);
    Ok(InspectReport {
        step_id: step_id.to_string(),
        project_id,
        event_count: parsed.events.len(),
        step_event_count: parsed
            .events
            .iter()
            .filter(|event| event.step_id == step_id)
            .count(),
        anomalies: parsed.anomalies,
        completion,
        integrity,
        planned_corrections,
    })
}
