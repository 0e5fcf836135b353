//! Timestamp correction planning.
//!
//! Correctable entries of the target step are spread evenly across the task
//! window in log order. Planned times are whole seconds (the structured
//! record precision), strictly increasing where the window allows, and always
//! clamped to `[ceil(task_start), floor(now)]`. An empty window (task start
//! after `now`) plans nothing; the entries stay plain warnings.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::types::{CorrectableEntry, format_timestamp};

/// A correctable entry paired with the timestamp that replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCorrection {
    #[serde(flatten)]
    pub entry: CorrectableEntry,
    #[serde(serialize_with = "serialize_ts")]
    pub corrected_timestamp: DateTime<Utc>,
}

/// Plan replacement timestamps for `step_id`'s correctable entries.
///
/// Without a known task start the window collapses to `now`: entries are
/// placed one second apart, ending at `now`.
pub fn plan_corrections(
    step_id: &str,
    entries: &[CorrectableEntry],
    task_start_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<PlannedCorrection> {
    let mut targets: Vec<&CorrectableEntry> = entries
        .iter()
        .filter(|entry| entry.step_id == step_id)
        .collect();
    targets.sort_by_key(|entry| entry.record_index);
    if targets.is_empty() {
        return Vec::new();
    }

    let upper = floor_second(now);
    let count = targets.len() as i64;
    let lower = match task_start_time {
        Some(start) => ceil_second(start),
        None => upper - Duration::seconds(count - 1),
    };
    if lower > upper {
        return Vec::new();
    }
    let span = (upper - lower).num_seconds();

    let mut planned = Vec::with_capacity(targets.len());
    let mut previous: Option<DateTime<Utc>> = None;
    for (position, entry) in targets.into_iter().enumerate() {
        let slot = position as i64 + 1;
        let mut candidate = match task_start_time {
            Some(_) => lower + Duration::seconds(span * slot / (count + 1)),
            None => lower + Duration::seconds(slot - 1),
        };
        if let Some(prev) = previous {
            if candidate <= prev {
                candidate = prev + Duration::seconds(1);
            }
        }
        let corrected = candidate.clamp(lower, upper);
        previous = Some(corrected);
        planned.push(PlannedCorrection {
            entry: entry.clone(),
            corrected_timestamp: corrected,
        });
    }
    planned
}

fn floor_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
}

fn ceil_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_second(ts);
    if floored == ts {
        ts
    } else {
        floored + Duration::seconds(1)
    }
}

fn serialize_ts<S: serde::Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}
