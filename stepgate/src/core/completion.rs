//! Step completion rules.
//!
//! A step is complete when every schema phase has a satisfying latest record:
//! - `EXECUTED` with a non-empty outcome, or
//! - `SKIPPED` with a reason carrying a valid (non-blocking) prefix.
//!
//! Presence is checked in schema order; execution order is not enforced.

use std::collections::HashMap;

use crate::core::schema::{Schema, SkipCategory};
use crate::core::types::{CompletionResult, PhaseEvent, PhaseStatus};

/// Validate that `step_id` satisfies every phase in `schema`.
///
/// `events` may contain records of any step; later records for the same phase
/// supersede earlier ones.
pub fn validate_completion(step_id: &str, events: &[PhaseEvent], schema: &Schema) -> CompletionResult {
    let latest = latest_by_phase(step_id, events);
    let errors = schema
        .phases()
        .iter()
        .filter_map(|phase| phase_error(phase, latest.get(phase.as_str()).copied(), schema))
        .collect();
    CompletionResult::from_errors(errors)
}

fn latest_by_phase<'a>(step_id: &str, events: &'a [PhaseEvent]) -> HashMap<&'a str, &'a PhaseEvent> {
    let mut latest = HashMap::new();
    for event in events.iter().filter(|event| event.step_id == step_id) {
        latest.insert(event.phase_name.as_str(), event);
    }
    latest
}

fn phase_error(phase: &str, event: Option<&PhaseEvent>, schema: &Schema) -> Option<String> {
    let Some(event) = event else {
        return Some(format!("{phase}: Phase missing from log"));
    };
    let outcome = event.outcome.as_str();
    match &event.status {
        PhaseStatus::Executed if outcome.is_empty() => {
            Some(format!("{phase}: EXECUTED phase missing outcome"))
        }
        PhaseStatus::Executed => None,
        PhaseStatus::InProgress => Some(format!("{phase}: left IN_PROGRESS (incomplete)")),
        PhaseStatus::NotExecuted => Some(format!("{phase}: not executed")),
        PhaseStatus::Skipped if outcome.is_empty() => {
            Some(format!("{phase}: SKIPPED phase missing skip reason"))
        }
        PhaseStatus::Skipped => match schema.classify_skip(outcome) {
            SkipCategory::Valid => None,
            SkipCategory::Blocking => Some(format!("{phase}: DEFERRED/blocking skip: {outcome}")),
            SkipCategory::Unknown => Some(format!("{phase}: invalid skip reason: {outcome}")),
        },
        PhaseStatus::Unrecognized(raw) => Some(format!("{phase}: unrecognized status '{raw}'")),
    }
}
