//! Orchestration for a single "agent stopped" decision.
//!
//! Stages run in a fixed order, each observing the previous stage's output:
//!
//! ```text
//! Start -> IntegrityCorrected -> CompletionChecked -> ScopeChecked -> Decided
//! ```
//!
//! Integrity warnings, scope violations and commit lookups are advisory and
//! never block. Only an incomplete step blocks, and only when the host is not
//! already retrying after a block.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::completion::validate_completion;
use crate::core::correction::{PlannedCorrection, plan_corrections};
use crate::core::integrity::validate_integrity;
use crate::core::parser::ParseAnomaly;
use crate::core::schema::Schema;
use crate::core::types::{
    CompletionResult, Decision, IntegrityReport, PhaseEvent, SubagentStopContext, format_timestamp,
};
use crate::io::audit::{AuditEvent, AuditEventType, AuditLogWriter};
use crate::io::clock::TimeProvider;
use crate::io::commit::CommitVerifier;
use crate::io::execution_log::{ExecutionLogReader, LogAccessError, TimestampRewrite};
use crate::io::scope::ScopeChecker;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    LogAccess(#[from] LogAccessError),
}

/// Decision pipeline stage, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Start,
    IntegrityCorrected,
    CompletionChecked,
    ScopeChecked,
    Decided,
}

/// Collaborators the service drives.
pub struct Ports<'a> {
    pub log: &'a dyn ExecutionLogReader,
    pub audit: &'a dyn AuditLogWriter,
    pub scope: &'a dyn ScopeChecker,
    pub clock: &'a dyn TimeProvider,
    pub commit_verifier: Option<&'a dyn CommitVerifier>,
}

/// Validates a step's execution log and decides whether the agent may stop.
pub struct DecisionService<'a> {
    schema: Schema,
    ports: Ports<'a>,
}

/// Per-invocation correlation data stamped onto every audit event.
struct Invocation<'c> {
    ctx: &'c SubagentStopContext,
    now: DateTime<Utc>,
    feature_name: Option<String>,
}

impl<'a> DecisionService<'a> {
    pub fn new(schema: Schema, ports: Ports<'a>) -> Self {
        Self { schema, ports }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decide for `ctx`, failing closed when the log cannot be read.
    pub fn validate(&self, ctx: &SubagentStopContext) -> Decision {
        match self.try_validate(ctx) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(step_id = %ctx.step_id, error = %err, "execution log unreadable; blocking");
                let inv = Invocation {
                    ctx,
                    now: self.ports.clock.now(),
                    feature_name: non_empty(&ctx.project_id),
                };
                let mut data = Map::new();
                data.insert("error".to_string(), json!(err.to_string()));
                self.emit(&inv, AuditEventType::HookSubagentStopFailed, data);
                Decision::block(format!("Execution log unreadable ({err}); refusing to accept step {}", ctx.step_id))
            }
        }
    }

    /// Decide for `ctx`, propagating log access failures to the caller.
    #[instrument(skip_all, fields(step_id = %ctx.step_id, retry = ctx.stop_hook_active))]
    pub fn try_validate(&self, ctx: &SubagentStopContext) -> Result<Decision, DecisionError> {
        let mut stage = Stage::Start;
        debug!(?stage, log = %ctx.log_path.display(), "decision started");
        let parsed = self.ports.log.read_log(&ctx.log_path)?;
        let inv = Invocation {
            ctx,
            now: self.ports.clock.now(),
            feature_name: self.feature_name(ctx),
        };

        if parsed.events.is_empty() && ctx.stop_hook_active {
            info!("empty execution log on retry; allowing");
            return Ok(Decision::allow());
        }
        self.emit_anomalies(&inv, &parsed.anomalies);

        let events = self.correct_integrity(&inv, parsed.events);
        stage = Stage::IntegrityCorrected;
        debug!(?stage, events = events.len());

        let completion = validate_completion(&ctx.step_id, &events, &self.schema);
        stage = Stage::CompletionChecked;
        debug!(?stage, valid = completion.valid, errors = completion.errors.len());
        if !completion.valid {
            return Ok(self.decide_incomplete(&inv, completion));
        }

        let violations = self.check_scope(&inv);
        stage = Stage::ScopeChecked;
        debug!(?stage, violations);

        let mut data = Map::new();
        data.insert("scope_violations".to_string(), json!(violations));
        self.emit(&inv, AuditEventType::HookSubagentStopPassed, data);
        self.verify_commit(&inv);

        stage = Stage::Decided;
        debug!(?stage, "step accepted");
        Ok(Decision::allow())
    }

    fn feature_name(&self, ctx: &SubagentStopContext) -> Option<String> {
        non_empty(&ctx.project_id).or_else(|| {
            match self.ports.log.read_project_id(&ctx.log_path) {
                Ok(id) => non_empty(&id),
                Err(err) => {
                    debug!(error = %err, "no project id in execution log");
                    None
                }
            }
        })
    }

    fn emit_anomalies(&self, inv: &Invocation<'_>, anomalies: &[ParseAnomaly]) {
        for anomaly in anomalies {
            warn!(
                record_index = anomaly.record_index,
                reason = %anomaly.reason,
                "skipping malformed execution log record"
            );
            let mut data = Map::new();
            data.insert("record_index".to_string(), json!(anomaly.record_index));
            data.insert("reason".to_string(), json!(anomaly.reason));
            self.emit(inv, AuditEventType::LogParseAnomaly, data);
        }
    }

    /// Run the integrity scan, apply timestamp corrections, and return the
    /// events later stages must observe.
    fn correct_integrity(&self, inv: &Invocation<'_>, events: Vec<PhaseEvent>) -> Vec<PhaseEvent> {
        let ctx = inv.ctx;
        let report = validate_integrity(
            &ctx.step_id,
            &events,
            &self.schema,
            ctx.task_start_time,
            inv.now,
        );
        let plan = plan_corrections(
            &ctx.step_id,
            &report.correctable_entries,
            ctx.task_start_time,
            inv.now,
        );

        let failure = if plan.is_empty() {
            None
        } else {
            let rewrites: Vec<TimestampRewrite> = plan
                .iter()
                .map(|planned| TimestampRewrite {
                    record_index: planned.entry.record_index,
                    timestamp: planned.corrected_timestamp,
                })
                .collect();
            match self.ports.log.rewrite_timestamps(&ctx.log_path, &rewrites) {
                Ok(()) => {
                    info!(corrections = plan.len(), "corrected implausible timestamps");
                    None
                }
                Err(err) => {
                    warn!(error = %err, "timestamp correction failed; reporting as warnings");
                    Some(err.to_string())
                }
            }
        };

        self.emit_integrity(inv, &report, &plan, failure.as_deref());

        if failure.is_some() || plan.is_empty() {
            return events;
        }
        events
            .into_iter()
            .map(|event| {
                match plan
                    .iter()
                    .find(|planned| planned.entry.record_index == event.record_index)
                {
                    Some(planned) => event.with_timestamp(planned.corrected_timestamp),
                    None => event,
                }
            })
            .collect()
    }

    fn emit_integrity(
        &self,
        inv: &Invocation<'_>,
        report: &IntegrityReport,
        plan: &[PlannedCorrection],
        failure: Option<&str>,
    ) {
        for warning in &report.warnings {
            let planned = warning
                .correction
                .and_then(|index| report.correctable_entries.get(index))
                .and_then(|entry| {
                    plan.iter()
                        .find(|planned| planned.entry.record_index == entry.record_index)
                });
            let mut data = Map::new();
            match (planned, failure) {
                (Some(planned), None) => {
                    data.insert("phase_name".to_string(), json!(planned.entry.phase_name));
                    data.insert("reason".to_string(), json!(planned.entry.reason.as_str()));
                    data.insert(
                        "original_timestamp".to_string(),
                        json!(format_timestamp(&planned.entry.original_timestamp)),
                    );
                    data.insert(
                        "corrected_timestamp".to_string(),
                        json!(format_timestamp(&planned.corrected_timestamp)),
                    );
                    data.insert("record_index".to_string(), json!(planned.entry.record_index));
                    self.emit(inv, AuditEventType::LogIntegrityCorrected, data);
                }
                (planned, failure) => {
                    warn!(warning = %warning.message, "log integrity warning");
                    data.insert("warning".to_string(), json!(warning.message));
                    if let (Some(_), Some(failure)) = (planned, failure) {
                        data.insert("correction_failed".to_string(), json!(failure));
                    }
                    self.emit(inv, AuditEventType::LogIntegrityWarning, data);
                }
            }
        }
    }

    fn decide_incomplete(&self, inv: &Invocation<'_>, completion: CompletionResult) -> Decision {
        let ctx = inv.ctx;
        let mut data = Map::new();
        data.insert("errors".to_string(), json!(completion.errors));
        if ctx.stop_hook_active {
            info!("step incomplete on retry; allowing to avoid a stop loop");
            data.insert("allowed_despite_failure".to_string(), json!(true));
            self.emit(inv, AuditEventType::HookSubagentStopFailed, data);
            return Decision::allow();
        }
        self.emit(inv, AuditEventType::HookSubagentStopFailed, data);
        Decision::block(format!(
            "Step {} incomplete: {}",
            ctx.step_id,
            completion.errors.join("; ")
        ))
    }

    /// Emit one `SCOPE_VIOLATION` per out-of-scope file; returns the count.
    fn check_scope(&self, inv: &Invocation<'_>) -> usize {
        let ctx = inv.ctx;
        if ctx.allowed_patterns.is_empty() {
            debug!("no allowed patterns declared; skipping scope check");
            return 0;
        }
        let Some(root) = ctx.cwd.as_deref() else {
            debug!("no working directory; skipping scope check");
            return 0;
        };
        let mut patterns = ctx.allowed_patterns.clone();
        if let Some(log_pattern) = relative_log_path(&ctx.log_path, root) {
            patterns.push(log_pattern);
        }
        let result = match self.ports.scope.check_scope(root, &patterns) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "scope check failed; treating as clean");
                return 0;
            }
        };
        for file in &result.out_of_scope_files {
            warn!(file = %file, "file changed outside declared scope");
            let mut data = Map::new();
            data.insert("file".to_string(), json!(file));
            data.insert("severity".to_string(), json!("WARNING"));
            self.emit(inv, AuditEventType::ScopeViolation, data);
        }
        result.out_of_scope_files.len()
    }

    fn verify_commit(&self, inv: &Invocation<'_>) {
        let ctx = inv.ctx;
        let (Some(verifier), Some(cwd)) = (self.ports.commit_verifier, ctx.cwd.as_deref()) else {
            return;
        };
        let mut data = Map::new();
        match verifier.verify_commit(&ctx.step_id, cwd) {
            Ok(result) if result.verified => {
                insert_opt(&mut data, "commit_hash", result.commit_hash);
                insert_opt(&mut data, "commit_date", result.commit_date);
                insert_opt(&mut data, "commit_subject", result.commit_subject);
                self.emit(inv, AuditEventType::CommitVerified, data);
            }
            Ok(_) => {
                debug!("no commit found for step");
                self.emit(inv, AuditEventType::CommitNotVerified, data);
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "commit verification failed");
                data.insert("error".to_string(), json!(format!("{err:#}")));
                self.emit(inv, AuditEventType::CommitNotVerified, data);
            }
        }
    }

    fn emit(&self, inv: &Invocation<'_>, event_type: AuditEventType, mut data: Map<String, Value>) {
        let ctx = inv.ctx;
        if let Some(turns) = ctx.turns_used {
            data.insert("turns_used".to_string(), json!(turns));
        }
        if let Some(tokens) = ctx.tokens_used {
            data.insert("tokens_used".to_string(), json!(tokens));
        }
        self.ports.audit.log_event(AuditEvent {
            event_type,
            timestamp: format_timestamp(&inv.now),
            feature_name: inv.feature_name.clone(),
            step_id: non_empty(&ctx.step_id),
            hook_id: ctx.hook_id.clone(),
            data,
        });
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn insert_opt(data: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        data.insert(key.to_string(), json!(value));
    }
}

/// The execution log as a `/`-separated path relative to `root`, if inside it.
fn relative_log_path(log_path: &Path, root: &Path) -> Option<String> {
    let relative: PathBuf = if log_path.is_relative() {
        log_path.to_path_buf()
    } else {
        log_path.strip_prefix(root).ok()?.to_path_buf()
    };
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
