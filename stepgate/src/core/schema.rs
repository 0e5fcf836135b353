//! Phase schema: the ordered phases every step must satisfy, plus the skip
//! vocabulary that decides whether a skipped phase is acceptable.

use std::collections::HashSet;

use thiserror::Error;

/// Seven-phase TDD cycle enforced when no schema is configured.
pub const DEFAULT_PHASES: [&str; 7] = [
    "PREPARE",
    "RED_ACCEPTANCE",
    "RED_UNIT",
    "GREEN",
    "REVIEW",
    "REFACTOR_CONTINUOUS",
    "COMMIT",
];

pub const DEFAULT_VALID_SKIP_PREFIXES: [&str; 4] = [
    "APPROVED_SKIP",
    "NOT_APPLICABLE",
    "BLOCKED_BY_DEPENDENCY",
    "CHECKPOINT_PENDING",
];

pub const DEFAULT_BLOCKING_SKIP_PREFIXES: [&str; 1] = ["DEFERRED"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema must declare at least one phase")]
    EmptyPhases,
    #[error("duplicate phase '{0}' in schema")]
    DuplicatePhase(String),
    #[error("skip prefixes must be non-empty")]
    EmptyPrefix,
    #[error("valid skip prefix '{valid}' overlaps blocking prefix '{blocking}'")]
    OverlappingPrefixes { valid: String, blocking: String },
}

/// Classification of a skip reason against the schema vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCategory {
    Valid,
    Blocking,
    Unknown,
}

/// Validated phase schema. Construct once and pass by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    phases: Vec<String>,
    valid_skip_prefixes: Vec<String>,
    blocking_skip_prefixes: Vec<String>,
}

impl Schema {
    pub fn new(
        phases: Vec<String>,
        valid_skip_prefixes: Vec<String>,
        blocking_skip_prefixes: Vec<String>,
    ) -> Result<Self, SchemaError> {
        if phases.is_empty() {
            return Err(SchemaError::EmptyPhases);
        }
        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.as_str()) {
                return Err(SchemaError::DuplicatePhase(phase.clone()));
            }
        }
        if valid_skip_prefixes
            .iter()
            .chain(&blocking_skip_prefixes)
            .any(|prefix| prefix.is_empty())
        {
            return Err(SchemaError::EmptyPrefix);
        }
        for valid in &valid_skip_prefixes {
            for blocking in &blocking_skip_prefixes {
                if valid.starts_with(blocking.as_str()) || blocking.starts_with(valid.as_str()) {
                    return Err(SchemaError::OverlappingPrefixes {
                        valid: valid.clone(),
                        blocking: blocking.clone(),
                    });
                }
            }
        }
        Ok(Self {
            phases,
            valid_skip_prefixes,
            blocking_skip_prefixes,
        })
    }

    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    pub fn contains_phase(&self, name: &str) -> bool {
        self.phases.iter().any(|phase| phase == name)
    }

    pub fn valid_skip_prefixes(&self) -> &[String] {
        &self.valid_skip_prefixes
    }

    pub fn blocking_skip_prefixes(&self) -> &[String] {
        &self.blocking_skip_prefixes
    }

    /// Classify a skip reason. Blocking prefixes take precedence.
    pub fn classify_skip(&self, reason: &str) -> SkipCategory {
        if self
            .blocking_skip_prefixes
            .iter()
            .any(|prefix| reason.starts_with(prefix.as_str()))
        {
            SkipCategory::Blocking
        } else if self
            .valid_skip_prefixes
            .iter()
            .any(|prefix| reason.starts_with(prefix.as_str()))
        {
            SkipCategory::Valid
        } else {
            SkipCategory::Unknown
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            phases: to_strings(&DEFAULT_PHASES),
            valid_skip_prefixes: to_strings(&DEFAULT_VALID_SKIP_PREFIXES),
            blocking_skip_prefixes: to_strings(&DEFAULT_BLOCKING_SKIP_PREFIXES),
        }
    }
}

pub(crate) fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
