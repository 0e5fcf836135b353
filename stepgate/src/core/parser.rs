//! Execution log record parsing.
//!
//! A log's `events` array mixes two encodings:
//! - legacy: `"step_id|phase_name|status|outcome|timestamp"`
//! - structured: `{"sid", "p", "s", "d", "t", "tu"?, "tk"?}`
//!
//! Each raw record is kept as a [`LogRecord`] so it can be re-serialized
//! untouched or rewritten with only its timestamp changed. Malformed records
//! become [`ParseAnomaly`] entries; parsing never stops at a bad record.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::types::{PhaseEvent, PhaseStatus, format_timestamp};

/// A delimited legacy record, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRecord {
    raw: String,
}

/// A structured mapping record, kept with its original key order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRecord {
    fields: Map<String, Value>,
}

/// One raw record of the execution log, discriminated by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Legacy(LegacyRecord),
    Structured(StructuredRecord),
}

/// A record that could not be normalized into a [`PhaseEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseAnomaly {
    pub record_index: usize,
    pub reason: String,
}

/// Normalized events plus the anomalies met along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLog {
    pub events: Vec<PhaseEvent>,
    pub anomalies: Vec<ParseAnomaly>,
}

impl LogRecord {
    /// Detect the record encoding from the JSON shape.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(raw) => Ok(Self::Legacy(LegacyRecord { raw: raw.clone() })),
            Value::Object(fields) => Ok(Self::Structured(StructuredRecord {
                fields: fields.clone(),
            })),
            other => Err(format!(
                "expected string or object record, found {}",
                json_kind(other)
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Legacy(record) => Value::String(record.raw.clone()),
            Self::Structured(record) => Value::Object(record.fields.clone()),
        }
    }

    /// Copy of this record with only its time field replaced.
    pub fn with_timestamp(&self, timestamp: &DateTime<Utc>) -> Self {
        let formatted = format_timestamp(timestamp);
        match self {
            Self::Legacy(record) => {
                let raw = match record.raw.rsplit_once('|') {
                    Some((head, _)) => format!("{head}|{formatted}"),
                    None => record.raw.clone(),
                };
                Self::Legacy(LegacyRecord { raw })
            }
            Self::Structured(record) => {
                let mut fields = record.fields.clone();
                fields.insert("t".to_string(), Value::String(formatted));
                Self::Structured(StructuredRecord { fields })
            }
        }
    }

    /// Normalize into a [`PhaseEvent`].
    pub fn to_event(&self, record_index: usize) -> Result<PhaseEvent, String> {
        match self {
            Self::Legacy(record) => parse_legacy(&record.raw, record_index),
            Self::Structured(record) => parse_structured(&record.fields, record_index),
        }
    }
}

/// Parse every raw record, collecting anomalies instead of failing.
pub fn parse_records(records: &[Value]) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    for (record_index, value) in records.iter().enumerate() {
        let result = LogRecord::from_value(value).and_then(|record| record.to_event(record_index));
        match result {
            Ok(event) => parsed.events.push(event),
            Err(reason) => parsed.anomalies.push(ParseAnomaly {
                record_index,
                reason,
            }),
        }
    }
    parsed
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_legacy(raw: &str, record_index: usize) -> Result<PhaseEvent, String> {
    let mut head = raw.splitn(4, '|');
    let (Some(step_id), Some(phase_name), Some(status), Some(rest)) =
        (head.next(), head.next(), head.next(), head.next())
    else {
        return Err(format!("expected 5 '|'-separated fields in '{raw}'"));
    };
    let Some((outcome, timestamp)) = rest.rsplit_once('|') else {
        return Err(format!("expected 5 '|'-separated fields in '{raw}'"));
    };
    build_event(
        record_index,
        step_id,
        phase_name,
        status,
        outcome,
        timestamp,
        None,
        None,
    )
}

fn parse_structured(fields: &Map<String, Value>, record_index: usize) -> Result<PhaseEvent, String> {
    let step_id = required_str(fields, "sid")?;
    let phase_name = required_str(fields, "p")?;
    let status = required_str(fields, "s")?;
    let outcome = required_str(fields, "d")?;
    let timestamp = required_str(fields, "t")?;
    let turns_used = fields
        .get("tu")
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok());
    let tokens_used = fields.get("tk").and_then(Value::as_u64);
    build_event(
        record_index,
        step_id,
        phase_name,
        status,
        outcome,
        timestamp,
        turns_used,
        tokens_used,
    )
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    record_index: usize,
    step_id: &str,
    phase_name: &str,
    status: &str,
    outcome: &str,
    timestamp: &str,
    turns_used: Option<u32>,
    tokens_used: Option<u64>,
) -> Result<PhaseEvent, String> {
    let step_id = step_id.trim();
    let phase_name = phase_name.trim();
    if step_id.is_empty() {
        return Err("empty step_id".to_string());
    }
    if phase_name.is_empty() {
        return Err("empty phase_name".to_string());
    }
    let timestamp =
        parse_timestamp(timestamp).ok_or_else(|| format!("invalid timestamp '{timestamp}'"))?;
    Ok(PhaseEvent {
        record_index,
        step_id: step_id.to_string(),
        phase_name: phase_name.to_string(),
        status: PhaseStatus::parse(status),
        outcome: outcome.trim().to_string(),
        timestamp,
        turns_used,
        tokens_used,
    })
}

fn required_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
    match fields.get(key) {
        Some(Value::String(value)) => Ok(value),
        Some(other) => Err(format!(
            "field '{key}' must be a string, found {}",
            json_kind(other)
        )),
        None => Err(format!("missing field '{key}'")),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
