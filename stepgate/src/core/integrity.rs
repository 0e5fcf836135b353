//! Zero-trust checks over the execution log.
//!
//! Three independent scans, all producing warnings and never errors:
//! - phase names of the target step must exist in the schema;
//! - no other step may have written inside the current task window;
//! - timestamps must be plausible: no step may be dated in the future, and
//!   the target step may not predate the task start. Only the target step's
//!   entries become correctable, and pre-task ones only beyond the tolerance
//!   band.

use chrono::{DateTime, Duration, Utc};

use crate::core::schema::Schema;
use crate::core::types::{
    CorrectableEntry, CorrectionReason, IntegrityReport, PhaseEvent, format_timestamp,
};

/// Pre-task displacement (seconds) treated as clock skew rather than fabrication.
pub const PRE_TASK_TOLERANCE_SECS: i64 = 60;

/// Minimum length of an unknown phase name before substring matching applies.
const MIN_SUBSTRING_LEN: usize = 3;

/// Scan `events` (all steps) for anomalies relevant to `step_id`.
pub fn validate_integrity(
    step_id: &str,
    events: &[PhaseEvent],
    schema: &Schema,
    task_start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    check_phase_names(step_id, events, schema, &mut report);
    if let Some(start) = task_start_time {
        check_foreign_steps(step_id, events, start, now, &mut report);
    }
    check_timestamps(step_id, events, task_start_time, now, &mut report);
    report
}

fn check_phase_names(step_id: &str, events: &[PhaseEvent], schema: &Schema, report: &mut IntegrityReport) {
    for event in events.iter().filter(|event| event.step_id == step_id) {
        if schema.contains_phase(&event.phase_name) {
            continue;
        }
        let message = match suggest_phase(&event.phase_name, schema) {
            Some(suggestion) => format!(
                "Unrecognized phase name '{}' (did you mean '{}'?)",
                event.phase_name, suggestion
            ),
            None => format!("Unrecognized phase name '{}'", event.phase_name),
        };
        report.warn(message);
    }
}

fn check_foreign_steps(
    step_id: &str,
    events: &[PhaseEvent],
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    report: &mut IntegrityReport,
) {
    let mut reported: Vec<&str> = Vec::new();
    for event in events {
        if event.step_id == step_id || reported.contains(&event.step_id.as_str()) {
            continue;
        }
        if event.timestamp >= start && event.timestamp <= now {
            reported.push(&event.step_id);
            report.warn(format!(
                "Foreign step_id '{}' found in task window",
                event.step_id
            ));
        }
    }
}

fn check_timestamps(
    step_id: &str,
    events: &[PhaseEvent],
    task_start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    report: &mut IntegrityReport,
) {
    for event in events {
        let target = event.step_id == step_id;
        if event.timestamp > now {
            let after = format!(
                "{} is after now {}",
                format_timestamp(&event.timestamp),
                format_timestamp(&now)
            );
            if target {
                report.warn_correctable(
                    format!("Future timestamp for phase '{}': {after}", event.phase_name),
                    correctable(event, CorrectionReason::Future),
                );
            } else {
                report.warn(format!(
                    "Future timestamp for step '{}' phase '{}': {after}",
                    event.step_id, event.phase_name
                ));
            }
            continue;
        }
        if !target {
            continue;
        }
        let Some(start) = task_start_time else {
            continue;
        };
        if event.timestamp >= start {
            continue;
        }
        if event.timestamp < start - Duration::seconds(PRE_TASK_TOLERANCE_SECS) {
            report.warn_correctable(
                format!(
                    "Pre-task timestamp for phase '{}': {} is before task start {}",
                    event.phase_name,
                    format_timestamp(&event.timestamp),
                    format_timestamp(&start)
                ),
                correctable(event, CorrectionReason::PreTask),
            );
        } else {
            let skew = (start - event.timestamp).num_seconds();
            report.warn(format!(
                "Pre-task timestamp for phase '{}': {} is {}s before task start {} (within {}s tolerance)",
                event.phase_name,
                format_timestamp(&event.timestamp),
                skew,
                format_timestamp(&start),
                PRE_TASK_TOLERANCE_SECS
            ));
        }
    }
}

fn correctable(event: &PhaseEvent, reason: CorrectionReason) -> CorrectableEntry {
    CorrectableEntry {
        record_index: event.record_index,
        step_id: event.step_id.clone(),
        phase_name: event.phase_name.clone(),
        original_timestamp: event.timestamp,
        reason,
    }
}

/// Best-effort "did you mean" for an unknown phase name.
///
/// Prefix/substring relatives win; otherwise the nearest phase by edit
/// distance is offered when it is within a third of the longer name.
pub fn suggest_phase<'a>(name: &str, schema: &'a Schema) -> Option<&'a str> {
    let upper = name.trim().to_uppercase();
    if upper.is_empty() {
        return None;
    }
    let candidates: Vec<(&'a str, String)> = schema
        .phases()
        .iter()
        .map(|phase| (phase.as_str(), phase.to_uppercase()))
        .collect();

    if upper.chars().count() >= MIN_SUBSTRING_LEN {
        let related = candidates
            .iter()
            .filter(|(_, phase)| {
                phase.contains(upper.as_str())
                    || (phase.chars().count() >= MIN_SUBSTRING_LEN
                        && upper.starts_with(phase.as_str()))
            })
            .min_by_key(|(_, phase)| levenshtein(&upper, phase));
        if let Some((original, _)) = related {
            return Some(*original);
        }
    }

    candidates
        .iter()
        .map(|(original, phase)| (*original, levenshtein(&upper, phase)))
        .filter(|(original, distance)| {
            let longest = upper.chars().count().max(original.chars().count());
            distance * 3 <= longest
        })
        .min_by_key(|(_, distance)| *distance)
        .map(|(original, _)| original)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
