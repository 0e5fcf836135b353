//! Host adapter for the "agent stopped" callback.
//!
//! The host writes a JSON payload to stdin and reads a decision from stdout:
//!
//! ```json
//! {"execution_log_path": "docs/feature/x/execution-log.json", "step_id": "01-01", "cwd": "/repo"}
//! ```
//!
//! A payload or config that cannot be understood still yields a `block`
//! response, so the host never mistakes a gate failure for approval.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use ulid::Ulid;

use crate::core::parser::parse_timestamp;
use crate::core::types::{Decision, SubagentStopContext};
use crate::decision::{DecisionService, Ports};
use crate::exit_codes;
use crate::io::audit::{AuditLogWriter, JsonlAuditWriter, NullAuditWriter};
use crate::io::clock::SystemClock;
use crate::io::commit::{CommitVerifier, GitCommitVerifier};
use crate::io::config::{DEFAULT_CONFIG_PATH, GateConfig, load_config};
use crate::io::execution_log::JsonExecutionLog;
use crate::io::scope::GitScopeChecker;

/// Raw payload sent by the host.
#[derive(Debug, Clone, Deserialize)]
pub struct HookPayload {
    pub execution_log_path: PathBuf,
    pub step_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub task_start_time: Option<String>,
    #[serde(default)]
    pub stop_hook_active: bool,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub turns_used: Option<u32>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub hook_id: Option<String>,
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
}

impl HookPayload {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse hook payload")
    }

    /// Validate the payload and normalize it into a decision context.
    pub fn into_context(self) -> Result<SubagentStopContext> {
        let step_id = self.step_id.trim().to_string();
        if step_id.is_empty() {
            bail!("step_id must not be empty");
        }
        if self.execution_log_path.as_os_str().is_empty() {
            bail!("execution_log_path must not be empty");
        }
        let task_start_time = match self.task_start_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                parse_timestamp(raw).ok_or_else(|| anyhow!("invalid task_start_time '{raw}'"))?,
            ),
        };
        let log_path = match &self.cwd {
            Some(cwd) if self.execution_log_path.is_relative() => {
                cwd.join(&self.execution_log_path)
            }
            _ => self.execution_log_path,
        };
        let hook_id = self
            .hook_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Ulid::new().to_string());
        Ok(SubagentStopContext {
            log_path,
            project_id: self.project_id.trim().to_string(),
            step_id,
            task_start_time,
            stop_hook_active: self.stop_hook_active,
            cwd: self.cwd,
            turns_used: self.turns_used,
            tokens_used: self.tokens_used,
            hook_id: Some(hook_id),
            allowed_patterns: self.allowed_patterns,
        })
    }
}

/// What the binary prints and how it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResponse {
    pub decision: Decision,
    pub exit_code: i32,
}

impl HookResponse {
    fn decided(decision: Decision) -> Self {
        let exit_code = if decision.is_allow() {
            exit_codes::OK
        } else {
            exit_codes::BLOCK
        };
        Self {
            decision,
            exit_code,
        }
    }

    /// Fail-closed response for input that could not be evaluated.
    pub fn invalid(err: &anyhow::Error) -> Self {
        Self {
            decision: Decision::block(format!("stepgate could not evaluate the stop: {err:#}")),
            exit_code: exit_codes::INVALID,
        }
    }

    /// Single-line JSON for stdout.
    pub fn render(&self) -> String {
        serde_json::to_string(&self.decision).unwrap_or_else(|err| {
            warn!(error = %err, "serialize decision");
            r#"{"decision":"block","reason":"stepgate failed to render its decision"}"#.to_string()
        })
    }
}

/// Handle one callback end to end. Never fails; problems become a block.
#[instrument(skip_all)]
pub fn handle_subagent_stop(raw_payload: &str, config_path: Option<&Path>) -> HookResponse {
    match prepare(raw_payload, config_path) {
        Ok((ctx, config, project_root)) => {
            HookResponse::decided(decide(&ctx, &config, &project_root))
        }
        Err(err) => {
            warn!(error = %format!("{err:#}"), "rejecting hook payload");
            HookResponse::invalid(&err)
        }
    }
}

fn prepare(
    raw_payload: &str,
    config_path: Option<&Path>,
) -> Result<(SubagentStopContext, GateConfig, PathBuf)> {
    let ctx = HookPayload::parse(raw_payload)?.into_context()?;
    let project_root = match &ctx.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().context("resolve current directory")?,
    };
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_root.join(DEFAULT_CONFIG_PATH));
    let config = load_config(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    debug!(config = %config_path.display(), step_id = %ctx.step_id, "hook prepared");
    Ok((ctx, config, project_root))
}

fn decide(ctx: &SubagentStopContext, config: &GateConfig, project_root: &Path) -> Decision {
    let schema = match config.schema() {
        Ok(schema) => schema,
        Err(err) => return Decision::block(format!("invalid phase schema: {err}")),
    };
    let audit: Box<dyn AuditLogWriter> = if config.audit.enabled {
        Box::new(JsonlAuditWriter::new(config.audit_log_path(project_root)))
    } else {
        Box::new(NullAuditWriter)
    };
    let verifier = GitCommitVerifier::new(config.commit.trailer.clone());
    let commit_verifier: Option<&dyn CommitVerifier> = if config.commit.verify {
        Some(&verifier)
    } else {
        None
    };
    let service = DecisionService::new(
        schema,
        Ports {
            log: &JsonExecutionLog,
            audit: audit.as_ref(),
            scope: &GitScopeChecker,
            clock: &SystemClock,
            commit_verifier,
        },
    );
    service.validate(ctx)
}
