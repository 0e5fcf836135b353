//! Test-only builders, fakes and a throwaway git repository.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::parser::ParsedLog;
use crate::core::schema::Schema;
use crate::core::types::{PhaseEvent, PhaseStatus, format_timestamp};
use crate::io::audit::{AuditEvent, AuditEventType, AuditLogWriter};
use crate::io::commit::{CommitVerification, CommitVerifier};
use crate::io::execution_log::{
    ExecutionLogReader, JsonExecutionLog, LogAccessError, TimestampRewrite,
};
use crate::io::git::Git;
use crate::io::scope::{ScopeChecker, ScopeResult};

/// Parse an RFC 3339 literal; panics on malformed input.
pub fn utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .unwrap_or_else(|err| panic!("bad test timestamp {raw}: {err}"))
        .with_timezone(&Utc)
}

/// Event at a fixed, unremarkable timestamp.
pub fn event(step_id: &str, phase: &str, status: PhaseStatus, outcome: &str) -> PhaseEvent {
    event_at(step_id, phase, status, outcome, utc("2026-01-01T10:00:00Z"))
}

pub fn event_at(
    step_id: &str,
    phase: &str,
    status: PhaseStatus,
    outcome: &str,
    timestamp: DateTime<Utc>,
) -> PhaseEvent {
    PhaseEvent {
        record_index: 0,
        step_id: step_id.to_string(),
        phase_name: phase.to_string(),
        status,
        outcome: outcome.to_string(),
        timestamp,
        turns_used: None,
        tokens_used: None,
    }
}

/// Every schema phase `EXECUTED` with outcome `PASS`.
pub fn executed_step(step_id: &str, schema: &Schema) -> Vec<PhaseEvent> {
    executed_step_at(step_id, schema, utc("2026-01-01T10:00:00Z"))
}

/// Like [`executed_step`], phase `i` stamped at `base + i` minutes, with
/// record indexes in order.
pub fn executed_step_at(step_id: &str, schema: &Schema, base: DateTime<Utc>) -> Vec<PhaseEvent> {
    schema
        .phases()
        .iter()
        .enumerate()
        .map(|(index, phase)| {
            let minutes = i64::try_from(index).unwrap_or(i64::MAX);
            PhaseEvent {
                record_index: index,
                ..event_at(
                    step_id,
                    phase,
                    PhaseStatus::Executed,
                    "PASS",
                    base + Duration::minutes(minutes),
                )
            }
        })
        .collect()
}

/// `"step|phase|status|outcome|timestamp"` record.
pub fn legacy_record(
    step_id: &str,
    phase: &str,
    status: &str,
    outcome: &str,
    timestamp: &str,
) -> Value {
    json!(format!("{step_id}|{phase}|{status}|{outcome}|{timestamp}"))
}

/// `{"sid", "p", "s", "d", "t"}` record.
pub fn structured_record(
    step_id: &str,
    phase: &str,
    status: &str,
    outcome: &str,
    timestamp: &str,
) -> Value {
    json!({"sid": step_id, "p": phase, "s": status, "d": outcome, "t": timestamp})
}

/// Structured records for every schema phase, `EXECUTED`/`PASS`, one minute apart.
pub fn executed_records(step_id: &str, schema: &Schema, base: DateTime<Utc>) -> Vec<Value> {
    executed_step_at(step_id, schema, base)
        .iter()
        .map(|event| {
            structured_record(
                &event.step_id,
                &event.phase_name,
                event.status.as_str(),
                &event.outcome,
                &format_timestamp(&event.timestamp),
            )
        })
        .collect()
}

/// Captures audit events in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditWriter {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditWriter {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }

    pub fn types(&self) -> Vec<AuditEventType> {
        self.events().iter().map(|event| event.event_type).collect()
    }
}

impl AuditLogWriter for RecordingAuditWriter {
    fn log_event(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

/// Scope checker returning a canned result.
#[derive(Debug, Default)]
pub struct StaticScopeChecker {
    pub out_of_scope_files: Vec<String>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl StaticScopeChecker {
    pub fn reporting(files: &[&str]) -> Self {
        Self {
            out_of_scope_files: files.iter().map(|file| (*file).to_string()).collect(),
            calls: Mutex::default(),
        }
    }

    /// Pattern lists passed to each call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl ScopeChecker for StaticScopeChecker {
    fn check_scope(&self, _project_root: &Path, allowed_patterns: &[String]) -> Result<ScopeResult> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(allowed_patterns.to_vec());
        Ok(ScopeResult::from_files(self.out_of_scope_files.clone()))
    }
}

/// Commit verifier returning a canned result.
#[derive(Debug, Default)]
pub struct StaticCommitVerifier {
    pub result: CommitVerification,
}

impl StaticCommitVerifier {
    pub fn verified(hash: &str) -> Self {
        Self {
            result: CommitVerification {
                verified: true,
                commit_hash: Some(hash.to_string()),
                commit_date: Some("2026-01-01T10:30:00+00:00".to_string()),
                commit_subject: Some("feat: step".to_string()),
            },
        }
    }
}

impl CommitVerifier for StaticCommitVerifier {
    fn verify_commit(&self, _step_id: &str, _cwd: &Path) -> Result<CommitVerification> {
        Ok(self.result.clone())
    }
}

/// Reads like [`JsonExecutionLog`] but refuses every rewrite.
#[derive(Debug, Default)]
pub struct FailingLogReader;

impl ExecutionLogReader for FailingLogReader {
    fn read_log(&self, path: &Path) -> Result<ParsedLog, LogAccessError> {
        JsonExecutionLog.read_log(path)
    }

    fn read_project_id(&self, path: &Path) -> Result<String, LogAccessError> {
        JsonExecutionLog.read_project_id(path)
    }

    fn rewrite_timestamps(
        &self,
        path: &Path,
        _rewrites: &[TimestampRewrite],
    ) -> Result<(), LogAccessError> {
        Err(LogAccessError::Write {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only log"),
        })
    }
}

/// A git repository in a temp dir with one commit (`README.md`).
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let repo = Self {
            dir: tempfile::tempdir()?,
        };
        repo.git().output(&["init", "--quiet"])?;
        std::fs::write(repo.join("README.md"), "# test\n")?;
        repo.commit_all("chore: initial")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn git(&self) -> Git {
        Git::new(self.dir.path())
    }

    /// Stage everything and commit (empty commits allowed).
    pub fn commit_all(&self, message: &str) -> Result<()> {
        let git = self.git();
        git.output(&["add", "-A"])?;
        git.output(&[
            "-c",
            "user.name=stepgate-test",
            "-c",
            "user.email=test@stepgate.invalid",
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--allow-empty",
            "-m",
            message,
        ])?;
        Ok(())
    }
}
