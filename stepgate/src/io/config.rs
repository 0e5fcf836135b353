//! Gate configuration stored under `.stepgate/config.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::schema::{
    DEFAULT_BLOCKING_SKIP_PREFIXES, DEFAULT_PHASES, DEFAULT_VALID_SKIP_PREFIXES, Schema,
    SchemaError, to_strings,
};

/// Default config location relative to the project root.
pub const DEFAULT_CONFIG_PATH: &str = ".stepgate/config.toml";

/// Gate configuration (TOML).
///
/// Intended to be edited by humans; missing fields default to the seven-phase
/// TDD schema and a project-local audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct GateConfig {
    pub schema: SchemaConfig,
    pub audit: AuditConfig,
    pub commit: CommitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchemaConfig {
    /// Phases every step must satisfy, in order.
    pub phases: Vec<String>,
    /// Skip reasons starting with one of these are accepted.
    pub valid_skip_prefixes: Vec<String>,
    /// Skip reasons starting with one of these block completion.
    pub blocking_skip_prefixes: Vec<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            phases: to_strings(&DEFAULT_PHASES),
            valid_skip_prefixes: to_strings(&DEFAULT_VALID_SKIP_PREFIXES),
            blocking_skip_prefixes: to_strings(&DEFAULT_BLOCKING_SKIP_PREFIXES),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Append decision events to `log_path`; when false they are discarded.
    pub enabled: bool,
    /// JSONL audit log, relative to the project root unless absolute.
    pub log_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: PathBuf::from(".stepgate/audit.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    /// Look for a commit carrying the step trailer once a step passes.
    pub verify: bool,
    /// Trailer key, e.g. `Step-Id: 01-01`.
    pub trailer: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            verify: true,
            trailer: "Step-Id".to_string(),
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<()> {
        self.schema().map_err(|err| anyhow!("invalid [schema]: {err}"))?;
        if self.audit.enabled && self.audit.log_path.as_os_str().is_empty() {
            return Err(anyhow!("audit.log_path must not be empty"));
        }
        if self.commit.verify && self.commit.trailer.trim().is_empty() {
            return Err(anyhow!("commit.trailer must not be empty when commit.verify = true"));
        }
        Ok(())
    }

    /// Build the validated phase schema.
    pub fn schema(&self) -> Result<Schema, SchemaError> {
        Schema::new(
            self.schema.phases.clone(),
            self.schema.valid_skip_prefixes.clone(),
            self.schema.blocking_skip_prefixes.clone(),
        )
    }

    /// Audit log location resolved against `project_root`.
    pub fn audit_log_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.audit.log_path)
    }
}

/// Read and validate the gate config; a missing file means defaults.
pub fn load_config(path: &Path) -> Result<GateConfig> {
    let cfg = match fs::read_to_string(path) {
        Ok(text) => toml::from_str::<GateConfig>(&text)
            .with_context(|| format!("invalid TOML in {}", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => GateConfig::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("read config {}", path.display()));
        }
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Validate and persist `cfg`, replacing `path` via a sibling temp file.
pub fn write_config(path: &Path, cfg: &GateConfig) -> Result<()> {
    cfg.validate()?;
    let text = format!("{}\n", toml::to_string_pretty(cfg).context("render config as TOML")?);
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let staging = path.with_extension("toml.tmp");
    fs::write(&staging, text).with_context(|| format!("write {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| format!("move config into {}", path.display()))
}
