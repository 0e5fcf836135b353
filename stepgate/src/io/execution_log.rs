//! Execution log storage.
//!
//! The log is a JSON document:
//! ```json
//! {"project_id": "feature-x", "events": ["01-01|PREPARE|EXECUTED|PASS|2026-01-01T10:00:00Z", {"sid": "01-01", ...}]}
//! ```
//! Reads never fail on a single bad record (see [`crate::core::parser`]); only
//! an unreadable or structurally broken document is a [`LogAccessError`].
//! Rewrites keep the document's layout: a single-line file stays compact,
//! anything else is pretty-printed.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::parser::{LogRecord, ParsedLog, parse_records};
use crate::core::types::PhaseEvent;

#[derive(Debug, Error)]
pub enum LogAccessError {
    #[error("read execution log {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse execution log {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed execution log {}: {detail}", .path.display())]
    Shape { path: PathBuf, detail: String },
    #[error("write execution log {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Replace the timestamp of the record at `record_index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRewrite {
    pub record_index: usize,
    pub timestamp: DateTime<Utc>,
}

/// Read and rewrite access to an execution log.
pub trait ExecutionLogReader {
    /// Parse every record of the log, collecting per-record anomalies.
    fn read_log(&self, path: &Path) -> Result<ParsedLog, LogAccessError>;

    fn read_all_events(&self, path: &Path) -> Result<Vec<PhaseEvent>, LogAccessError> {
        Ok(self.read_log(path)?.events)
    }

    fn read_project_id(&self, path: &Path) -> Result<String, LogAccessError>;

    /// Replace the given records' timestamps, keeping every other byte of
    /// meaning (ordering, other records, each record's encoding) intact.
    fn rewrite_timestamps(
        &self,
        path: &Path,
        rewrites: &[TimestampRewrite],
    ) -> Result<(), LogAccessError>;
}

/// File-backed JSON execution log.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExecutionLog;

impl ExecutionLogReader for JsonExecutionLog {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn read_log(&self, path: &Path) -> Result<ParsedLog, LogAccessError> {
        let document = load_document(path)?;
        let parsed = parse_records(events_of(path, &document)?);
        debug!(
            events = parsed.events.len(),
            anomalies = parsed.anomalies.len(),
            "execution log parsed"
        );
        Ok(parsed)
    }

    fn read_project_id(&self, path: &Path) -> Result<String, LogAccessError> {
        let document = load_document(path)?;
        match document.get("project_id") {
            Some(Value::String(id)) => Ok(id.clone()),
            _ => Err(LogAccessError::Shape {
                path: path.to_path_buf(),
                detail: "missing string 'project_id'".to_string(),
            }),
        }
    }

    #[instrument(skip_all, fields(path = %path.display(), rewrites = rewrites.len()))]
    fn rewrite_timestamps(
        &self,
        path: &Path,
        rewrites: &[TimestampRewrite],
    ) -> Result<(), LogAccessError> {
        if rewrites.is_empty() {
            return Ok(());
        }
        let contents = read_contents(path)?;
        let layout = Layout::of(&contents);
        let mut document = parse_document(path, &contents)?;
        let shape_error = |detail: String| LogAccessError::Shape {
            path: path.to_path_buf(),
            detail,
        };
        let events = match document.get_mut("events") {
            Some(Value::Array(events)) => events,
            _ => return Err(shape_error("missing 'events' array".to_string())),
        };
        for rewrite in rewrites {
            let slot = events.get_mut(rewrite.record_index).ok_or_else(|| {
                shape_error(format!("no record at index {}", rewrite.record_index))
            })?;
            let record = LogRecord::from_value(slot)
                .map_err(|detail| shape_error(format!("record {}: {detail}", rewrite.record_index)))?;
            *slot = record.with_timestamp(&rewrite.timestamp).to_value();
        }
        let buf = layout.render(path, document)?;
        write_atomic(path, &buf)?;
        debug!("execution log rewritten");
        Ok(())
    }
}

/// Write a fresh execution log document (used by tooling and tests).
pub fn write_log(path: &Path, project_id: &str, records: &[Value]) -> Result<(), LogAccessError> {
    let mut document = Map::new();
    document.insert("project_id".to_string(), Value::String(project_id.to_string()));
    document.insert("events".to_string(), Value::Array(records.to_vec()));
    let buf = Layout::Pretty.render(path, document)?;
    write_atomic(path, &buf)
}

/// Serialized shape of a log document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// One line, no insignificant whitespace.
    Compact { trailing_newline: bool },
    Pretty,
}

impl Layout {
    fn of(contents: &str) -> Self {
        let body = contents.trim_end();
        if body.contains('\n') {
            Self::Pretty
        } else {
            Self::Compact {
                trailing_newline: body.len() != contents.len(),
            }
        }
    }

    fn render(self, path: &Path, document: Map<String, Value>) -> Result<String, LogAccessError> {
        let document = Value::Object(document);
        let (rendered, newline) = match self {
            Self::Compact { trailing_newline } => (serde_json::to_string(&document), trailing_newline),
            Self::Pretty => (serde_json::to_string_pretty(&document), true),
        };
        let mut buf = rendered.map_err(|source| LogAccessError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if newline {
            buf.push('\n');
        }
        Ok(buf)
    }
}

/// Raw record values of the log, in order.
pub fn read_raw_records(path: &Path) -> Result<Vec<Value>, LogAccessError> {
    let document = load_document(path)?;
    Ok(events_of(path, &document)?.to_vec())
}

fn load_document(path: &Path) -> Result<Map<String, Value>, LogAccessError> {
    parse_document(path, &read_contents(path)?)
}

fn read_contents(path: &Path) -> Result<String, LogAccessError> {
    fs::read_to_string(path).map_err(|source| LogAccessError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_document(path: &Path, contents: &str) -> Result<Map<String, Value>, LogAccessError> {
    let value: Value = serde_json::from_str(contents).map_err(|source| LogAccessError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Object(document) => Ok(document),
        _ => Err(LogAccessError::Shape {
            path: path.to_path_buf(),
            detail: "top level must be an object".to_string(),
        }),
    }
}

fn events_of<'a>(path: &Path, document: &'a Map<String, Value>) -> Result<&'a [Value], LogAccessError> {
    match document.get("events") {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(events)) => Ok(events.as_slice()),
        Some(_) => Err(LogAccessError::Shape {
            path: path.to_path_buf(),
            detail: "'events' must be an array".to_string(),
        }),
    }
}

/// Atomically replace `path` (temp file + rename).
fn write_atomic(path: &Path, contents: &str) -> Result<(), LogAccessError> {
    let write_error = |source| LogAccessError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    let mut tmp: OsString = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    fs::write(&tmp_path, contents).map_err(write_error)?;
    fs::rename(&tmp_path, path).map_err(write_error)?;
    Ok(())
}
