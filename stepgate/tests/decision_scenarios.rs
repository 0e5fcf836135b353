//! End-to-end decision scenarios.
//!
//! Each test writes a real execution log to a temp dir and drives
//! `DecisionService` against it with a fixed clock and in-memory fakes for
//! audit, scope and commit lookup.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use stepgate::core::parser::{LogRecord, parse_records};
use stepgate::core::schema::Schema;
use stepgate::core::types::{
    Decision, DecisionAction, PhaseStatus, SubagentStopContext, format_timestamp,
};
use stepgate::decision::{DecisionError, DecisionService, Ports};
use stepgate::io::audit::AuditEventType;
use stepgate::io::clock::FixedClock;
use stepgate::io::commit::CommitVerifier;
use stepgate::io::execution_log::{
    ExecutionLogReader, JsonExecutionLog, LogAccessError, read_raw_records, write_log,
};
use stepgate::test_support::{
    FailingLogReader, RecordingAuditWriter, StaticCommitVerifier, StaticScopeChecker,
    executed_records, legacy_record, structured_record, utc,
};

const STEP: &str = "01-01";

fn task_start() -> DateTime<Utc> {
    utc("2026-01-01T10:00:00Z")
}

fn now() -> DateTime<Utc> {
    utc("2026-01-01T11:00:00Z")
}

/// Every phase executed from 10:05 on, one minute apart.
fn complete_records() -> Vec<Value> {
    executed_records(STEP, &Schema::default(), utc("2026-01-01T10:05:00Z"))
}

fn position(records: &[Value], phase: &str) -> usize {
    records
        .iter()
        .position(|record| record["p"] == phase)
        .unwrap_or_else(|| panic!("no {phase} record"))
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: PathBuf,
    log_path: PathBuf,
    audit: RecordingAuditWriter,
    scope: StaticScopeChecker,
    clock: FixedClock,
}

impl Fixture {
    fn with_records(records: &[Value]) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        let log_path = root.join("docs/feature/x/execution-log.json");
        write_log(&log_path, "feature-x", records).expect("write log");
        Self {
            _temp: temp,
            root,
            log_path,
            audit: RecordingAuditWriter::default(),
            scope: StaticScopeChecker::default(),
            clock: FixedClock(now()),
        }
    }

    fn context(&self) -> SubagentStopContext {
        SubagentStopContext {
            log_path: self.log_path.clone(),
            project_id: "feature-x".to_string(),
            step_id: STEP.to_string(),
            task_start_time: Some(task_start()),
            cwd: Some(self.root.clone()),
            hook_id: Some("hook-1".to_string()),
            allowed_patterns: vec!["src/**".to_string()],
            ..SubagentStopContext::default()
        }
    }

    fn service<'a>(
        &'a self,
        log: &'a dyn ExecutionLogReader,
        commit_verifier: Option<&'a dyn CommitVerifier>,
    ) -> DecisionService<'a> {
        DecisionService::new(
            Schema::default(),
            Ports {
                log,
                audit: &self.audit,
                scope: &self.scope,
                clock: &self.clock,
                commit_verifier,
            },
        )
    }

    fn decide(&self, ctx: &SubagentStopContext) -> Decision {
        self.service(&JsonExecutionLog, None).validate(ctx)
    }

    fn raw_records(&self) -> Vec<Value> {
        read_raw_records(&self.log_path).expect("raw records")
    }
}

fn timestamp_of(record: &Value) -> DateTime<Utc> {
    let record = LogRecord::from_value(record).expect("record");
    record.to_event(0).expect("event").timestamp
}

#[test]
fn complete_step_with_approved_skip_is_allowed() {
    let mut records = complete_records();
    let refactor = position(&records, "REFACTOR_CONTINUOUS");
    records[refactor] = structured_record(
        STEP,
        "REFACTOR_CONTINUOUS",
        "SKIPPED",
        "APPROVED_SKIP:Clean",
        "2026-01-01T10:10:00Z",
    );
    let red = position(&records, "RED_ACCEPTANCE");
    records[red]["d"] = json!("FAIL");
    let fixture = Fixture::with_records(&records);

    let decision = fixture.decide(&fixture.context());

    assert_eq!(decision.action, DecisionAction::Allow);
    assert_eq!(decision.reason, None);
    assert_eq!(
        fixture.audit.types(),
        vec![AuditEventType::HookSubagentStopPassed]
    );
    let passed = &fixture.audit.events()[0];
    assert_eq!(passed.data["scope_violations"], json!(0));
    assert_eq!(passed.feature_name.as_deref(), Some("feature-x"));
    assert_eq!(passed.step_id.as_deref(), Some(STEP));
    assert_eq!(passed.hook_id.as_deref(), Some("hook-1"));
    assert_eq!(passed.timestamp, "2026-01-01T11:00:00Z");
}

#[test]
fn missing_commit_phase_blocks() {
    let mut records = complete_records();
    records.remove(position(&records, "COMMIT"));
    let fixture = Fixture::with_records(&records);

    let decision = fixture.decide(&fixture.context());

    assert_eq!(decision.action, DecisionAction::Block);
    let reason = decision.reason.expect("reason");
    assert_eq!(reason, "Step 01-01 incomplete: COMMIT: Phase missing from log");
    let failed = fixture.audit.of_type(AuditEventType::HookSubagentStopFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].data["errors"],
        json!(["COMMIT: Phase missing from log"])
    );
    assert!(failed[0].data.get("allowed_despite_failure").is_none());
    assert!(
        fixture
            .audit
            .of_type(AuditEventType::HookSubagentStopPassed)
            .is_empty()
    );
}

#[test]
fn unknown_phase_name_warns_with_suggestion() {
    let mut records = complete_records();
    records.push(structured_record(
        STEP,
        "REFACTOR",
        "EXECUTED",
        "PASS",
        "2026-01-01T10:20:00Z",
    ));
    let fixture = Fixture::with_records(&records);

    let decision = fixture.decide(&fixture.context());

    assert!(decision.is_allow());
    let warnings = fixture.audit.of_type(AuditEventType::LogIntegrityWarning);
    assert_eq!(warnings.len(), 1);
    let message = warnings[0].data["warning"].as_str().expect("message");
    assert!(message.contains("Unrecognized phase name 'REFACTOR'"));
    assert!(message.contains("REFACTOR_CONTINUOUS"));
}

#[test]
fn fabricated_pre_task_timestamp_is_corrected() {
    let mut records = complete_records();
    let prepare = position(&records, "PREPARE");
    records[prepare]["t"] = json!("2026-01-01T08:00:00Z");
    let fixture = Fixture::with_records(&records);

    let decision = fixture.decide(&fixture.context());

    assert!(decision.is_allow());
    let corrected = fixture.audit.of_type(AuditEventType::LogIntegrityCorrected);
    assert_eq!(corrected.len(), 1);
    assert_eq!(corrected[0].data["phase_name"], json!("PREPARE"));
    assert_eq!(corrected[0].data["reason"], json!("pre_task"));
    assert_eq!(
        corrected[0].data["original_timestamp"],
        json!("2026-01-01T08:00:00Z")
    );
    assert!(
        fixture
            .audit
            .of_type(AuditEventType::LogIntegrityWarning)
            .is_empty()
    );

    let rewritten = timestamp_of(&fixture.raw_records()[prepare]);
    assert!(rewritten >= task_start() && rewritten <= now());
    assert_ne!(rewritten, utc("2026-01-01T08:00:00Z"));
    assert_eq!(
        corrected[0].data["corrected_timestamp"],
        json!(format_timestamp(&rewritten))
    );
}

#[test]
fn pre_task_skew_within_tolerance_only_warns() {
    let mut records = complete_records();
    let prepare = position(&records, "PREPARE");
    records[prepare]["t"] = json!("2026-01-01T09:59:30Z");
    let fixture = Fixture::with_records(&records);
    let before = fixture.raw_records();

    let decision = fixture.decide(&fixture.context());

    assert!(decision.is_allow());
    let warnings = fixture.audit.of_type(AuditEventType::LogIntegrityWarning);
    assert_eq!(warnings.len(), 1);
    let message = warnings[0].data["warning"].as_str().expect("message");
    assert!(message.contains("Pre-task timestamp"));
    assert!(message.contains("within 60s tolerance"));
    assert!(
        fixture
            .audit
            .of_type(AuditEventType::LogIntegrityCorrected)
            .is_empty()
    );
    assert_eq!(fixture.raw_records(), before);
}

#[test]
fn empty_log_on_retry_is_allowed_without_checks() {
    let fixture = Fixture::with_records(&[]);
    let ctx = SubagentStopContext {
        stop_hook_active: true,
        ..fixture.context()
    };

    let decision = fixture.decide(&ctx);

    assert!(decision.is_allow());
    assert!(fixture.audit.events().is_empty());
    assert!(fixture.scope.calls().is_empty());
}

#[test]
fn empty_log_on_first_stop_blocks() {
    let fixture = Fixture::with_records(&[]);

    let decision = fixture.decide(&fixture.context());

    assert_eq!(decision.action, DecisionAction::Block);
    let reason = decision.reason.expect("reason");
    assert!(reason.starts_with("Step 01-01 incomplete: PREPARE: Phase missing from log; "));
    assert!(reason.ends_with("COMMIT: Phase missing from log"));
}

#[test]
fn incomplete_step_on_retry_is_allowed_and_recorded() {
    let mut records = complete_records();
    let green = position(&records, "GREEN");
    records[green]["s"] = json!(PhaseStatus::InProgress.as_str());
    let fixture = Fixture::with_records(&records);
    let ctx = SubagentStopContext {
        stop_hook_active: true,
        ..fixture.context()
    };

    let decision = fixture.decide(&ctx);

    assert!(decision.is_allow());
    let failed = fixture.audit.of_type(AuditEventType::HookSubagentStopFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].data["allowed_despite_failure"], json!(true));
    assert_eq!(
        failed[0].data["errors"],
        json!(["GREEN: left IN_PROGRESS (incomplete)"])
    );
}

#[test]
fn second_run_after_correction_corrects_nothing() {
    let mut records = complete_records();
    let prepare = position(&records, "PREPARE");
    records[prepare]["t"] = json!("2026-01-01T08:00:00Z");
    let commit = position(&records, "COMMIT");
    records[commit]["t"] = json!("2026-01-01T12:30:00Z");
    let fixture = Fixture::with_records(&records);

    assert!(fixture.decide(&fixture.context()).is_allow());
    assert_eq!(
        fixture
            .audit
            .of_type(AuditEventType::LogIntegrityCorrected)
            .len(),
        2
    );
    let after_first = fixture.raw_records();

    let again = RecordingAuditWriter::default();
    let service = DecisionService::new(
        Schema::default(),
        Ports {
            log: &JsonExecutionLog,
            audit: &again,
            scope: &fixture.scope,
            clock: &fixture.clock,
            commit_verifier: None,
        },
    );
    assert!(service.validate(&fixture.context()).is_allow());

    assert!(again.of_type(AuditEventType::LogIntegrityCorrected).is_empty());
    assert!(again.of_type(AuditEventType::LogIntegrityWarning).is_empty());
    assert_eq!(fixture.raw_records(), after_first);
}

#[test]
fn task_start_after_now_leaves_log_untouched_on_every_run() {
    let fixture = Fixture::with_records(&complete_records());
    let ctx = SubagentStopContext {
        task_start_time: Some(utc("2026-01-01T12:00:00Z")),
        ..fixture.context()
    };
    let before = fixture.raw_records();

    assert!(fixture.decide(&ctx).is_allow());
    assert!(fixture.decide(&ctx).is_allow());

    assert!(
        fixture
            .audit
            .of_type(AuditEventType::LogIntegrityCorrected)
            .is_empty()
    );
    let warnings = fixture.audit.of_type(AuditEventType::LogIntegrityWarning);
    assert_eq!(warnings.len(), 2 * before.len());
    assert!(warnings.iter().all(|warning| {
        warning.data["warning"]
            .as_str()
            .is_some_and(|message| message.starts_with("Pre-task timestamp"))
            && warning.data.get("correction_failed").is_none()
    }));
    assert_eq!(fixture.raw_records(), before);
}

#[test]
fn future_record_of_another_step_warns() {
    let mut records = complete_records();
    records.push(structured_record(
        "01-02",
        "GREEN",
        "EXECUTED",
        "PASS",
        "2030-01-01T00:00:00Z",
    ));
    let fixture = Fixture::with_records(&records);
    let before = fixture.raw_records();

    assert!(fixture.decide(&fixture.context()).is_allow());

    let warnings = fixture.audit.of_type(AuditEventType::LogIntegrityWarning);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].data["warning"],
        json!(
            "Future timestamp for step '01-02' phase 'GREEN': 2030-01-01T00:00:00Z is after now 2026-01-01T11:00:00Z"
        )
    );
    assert!(
        fixture
            .audit
            .of_type(AuditEventType::LogIntegrityCorrected)
            .is_empty()
    );
    assert_eq!(fixture.raw_records(), before);
}

#[test]
fn future_timestamp_correction_is_used_for_completion() {
    let mut records = complete_records();
    let review = position(&records, "REVIEW");
    records[review]["t"] = json!("2026-01-02T09:00:00Z");
    let fixture = Fixture::with_records(&records);

    assert!(fixture.decide(&fixture.context()).is_allow());

    let corrected = fixture.audit.of_type(AuditEventType::LogIntegrityCorrected);
    assert_eq!(corrected.len(), 1);
    assert_eq!(corrected[0].data["reason"], json!("future"));
    let rewritten = timestamp_of(&fixture.raw_records()[review]);
    assert!(rewritten <= now());
}

#[test]
fn failed_rewrite_falls_back_to_warning() {
    let mut records = complete_records();
    let prepare = position(&records, "PREPARE");
    records[prepare]["t"] = json!("2026-01-01T08:00:00Z");
    let fixture = Fixture::with_records(&records);
    let before = fixture.raw_records();

    let decision = fixture
        .service(&FailingLogReader, None)
        .validate(&fixture.context());

    assert!(decision.is_allow());
    assert!(
        fixture
            .audit
            .of_type(AuditEventType::LogIntegrityCorrected)
            .is_empty()
    );
    let warnings = fixture.audit.of_type(AuditEventType::LogIntegrityWarning);
    assert_eq!(warnings.len(), 1);
    assert!(
        warnings[0].data["warning"]
            .as_str()
            .expect("message")
            .contains("Pre-task timestamp for phase 'PREPARE'")
    );
    assert!(
        warnings[0].data["correction_failed"]
            .as_str()
            .expect("failure")
            .contains("read-only log")
    );
    assert_eq!(fixture.raw_records(), before);
}

#[test]
fn unreadable_log_fails_closed() {
    let fixture = Fixture::with_records(&[]);
    let ctx = SubagentStopContext {
        log_path: fixture.root.join("missing/execution-log.json"),
        stop_hook_active: true,
        ..fixture.context()
    };

    let err = fixture
        .service(&JsonExecutionLog, None)
        .try_validate(&ctx)
        .expect_err("missing log");
    assert!(matches!(
        err,
        DecisionError::LogAccess(LogAccessError::Read { .. })
    ));

    let decision = fixture.decide(&ctx);
    assert_eq!(decision.action, DecisionAction::Block);
    assert!(decision.reason.expect("reason").contains("execution-log.json"));
    let failed = fixture.audit.of_type(AuditEventType::HookSubagentStopFailed);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].data.contains_key("error"));
}

#[test]
fn malformed_document_fails_closed() {
    let fixture = Fixture::with_records(&[]);
    std::fs::write(&fixture.log_path, "{ not json").expect("corrupt log");

    let decision = fixture.decide(&fixture.context());

    assert_eq!(decision.action, DecisionAction::Block);
}

#[test]
fn mixed_encodings_survive_correction() {
    let mut records = complete_records();
    let prepare = position(&records, "PREPARE");
    records[prepare] = legacy_record(STEP, "PREPARE", "EXECUTED", "PASS", "2026-01-01T08:00:00Z");
    let red = position(&records, "RED_UNIT");
    records[red] = legacy_record(STEP, "RED_UNIT", "EXECUTED", "PASS", "2026-01-01T10:07:00Z");
    let green = position(&records, "GREEN");
    records[green]["tu"] = json!(7);
    records[green]["note"] = json!("kept");
    let fixture = Fixture::with_records(&records);

    assert!(fixture.decide(&fixture.context()).is_allow());

    let after = fixture.raw_records();
    assert_eq!(after.len(), records.len());
    let corrected = after[prepare].as_str().expect("legacy stays a string");
    assert!(corrected.starts_with("01-01|PREPARE|EXECUTED|PASS|"));
    assert!(!corrected.ends_with("08:00:00Z"));
    for (index, (original, stored)) in records.iter().zip(&after).enumerate() {
        if index != prepare {
            assert_eq!(original, stored, "record {index} changed");
        }
    }
    assert_eq!(parse_records(&after).anomalies, Vec::new());
}

#[test]
fn scope_violations_are_warnings_only() {
    let mut fixture = Fixture::with_records(&complete_records());
    fixture.scope = StaticScopeChecker::reporting(&["notes.txt", "tmp/scratch.rs"]);

    let decision = fixture.decide(&fixture.context());

    assert!(decision.is_allow());
    let violations = fixture.audit.of_type(AuditEventType::ScopeViolation);
    assert_eq!(violations.len(), 2);
    assert_eq!(violations[0].data["file"], json!("notes.txt"));
    assert_eq!(violations[0].data["severity"], json!("WARNING"));
    let passed = fixture.audit.of_type(AuditEventType::HookSubagentStopPassed);
    assert_eq!(passed[0].data["scope_violations"], json!(2));

    let calls = fixture.scope.calls();
    assert_eq!(
        calls,
        vec![vec![
            "src/**".to_string(),
            "docs/feature/x/execution-log.json".to_string()
        ]]
    );
}

#[test]
fn scope_check_skipped_without_patterns() {
    let fixture = Fixture::with_records(&complete_records());
    let ctx = SubagentStopContext {
        allowed_patterns: Vec::new(),
        ..fixture.context()
    };

    assert!(fixture.decide(&ctx).is_allow());
    assert!(fixture.scope.calls().is_empty());
}

#[test]
fn commit_lookup_follows_a_pass() {
    let fixture = Fixture::with_records(&complete_records());
    let found = StaticCommitVerifier::verified("abc123");

    let decision = fixture
        .service(&JsonExecutionLog, Some(&found))
        .validate(&fixture.context());

    assert!(decision.is_allow());
    assert_eq!(
        fixture.audit.types(),
        vec![
            AuditEventType::HookSubagentStopPassed,
            AuditEventType::CommitVerified
        ]
    );
    let verified = &fixture.audit.of_type(AuditEventType::CommitVerified)[0];
    assert_eq!(verified.data["commit_hash"], json!("abc123"));
    assert_eq!(verified.data["commit_subject"], json!("feat: step"));
}

#[test]
fn missing_commit_is_reported_not_blocking() {
    let fixture = Fixture::with_records(&complete_records());
    let nothing = StaticCommitVerifier::default();

    let decision = fixture
        .service(&JsonExecutionLog, Some(&nothing))
        .validate(&fixture.context());

    assert!(decision.is_allow());
    let events = fixture.audit.of_type(AuditEventType::CommitNotVerified);
    assert_eq!(events.len(), 1);
    assert!(events[0].data.get("commit_hash").is_none());
}

#[test]
fn correlation_fields_are_omitted_when_unknown() {
    let mut records = complete_records();
    records.remove(position(&records, "COMMIT"));
    let fixture = Fixture::with_records(&records);
    let ctx = SubagentStopContext {
        project_id: String::new(),
        hook_id: None,
        turns_used: Some(14),
        ..fixture.context()
    };

    fixture.decide(&ctx);

    let event = &fixture.audit.events()[0];
    // Falls back to the log document's project id.
    assert_eq!(event.feature_name.as_deref(), Some("feature-x"));
    assert_eq!(event.data["turns_used"], json!(14));
    assert!(event.data.get("tokens_used").is_none());
    let rendered = serde_json::to_string(event).expect("serialize");
    assert!(!rendered.contains("null"), "{rendered}");
    assert!(!rendered.contains("hook_id"), "{rendered}");
}

#[test]
fn malformed_records_are_reported_and_skipped() {
    let mut records = complete_records();
    records.push(json!(null));
    records.push(json!("01-01|GREEN|EXECUTED"));
    let fixture = Fixture::with_records(&records);

    assert!(fixture.decide(&fixture.context()).is_allow());

    let anomalies = fixture.audit.of_type(AuditEventType::LogParseAnomaly);
    assert_eq!(anomalies.len(), 2);
    assert_eq!(anomalies[0].data["record_index"], json!(records.len() - 2));
    assert_eq!(anomalies[1].data["record_index"], json!(records.len() - 1));
}

#[test]
fn foreign_step_in_window_warns() {
    let mut records = complete_records();
    records.push(structured_record(
        "01-02",
        "PREPARE",
        "EXECUTED",
        "PASS",
        "2026-01-01T10:30:00Z",
    ));
    records.push(structured_record(
        "01-02",
        "GREEN",
        "EXECUTED",
        "PASS",
        "2026-01-01T10:31:00Z",
    ));
    let fixture = Fixture::with_records(&records);

    assert!(fixture.decide(&fixture.context()).is_allow());

    let warnings = fixture.audit.of_type(AuditEventType::LogIntegrityWarning);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].data["warning"],
        json!("Foreign step_id '01-02' found in task window")
    );
}
