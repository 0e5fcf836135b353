//! Scope checker port and its git-backed implementation.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::core::scope::ScopeMatcher;
use crate::io::git::Git;

/// Files changed since the last commit that fall outside the allowed globs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeResult {
    pub has_violations: bool,
    pub out_of_scope_files: Vec<String>,
}

impl ScopeResult {
    pub fn from_files(out_of_scope_files: Vec<String>) -> Self {
        Self {
            has_violations: !out_of_scope_files.is_empty(),
            out_of_scope_files,
        }
    }
}

pub trait ScopeChecker {
    fn check_scope(&self, project_root: &Path, allowed_patterns: &[String]) -> Result<ScopeResult>;
}

/// Diffs the working tree (plus untracked files) against HEAD.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitScopeChecker;

impl ScopeChecker for GitScopeChecker {
    #[instrument(skip_all, fields(root = %project_root.display(), patterns = allowed_patterns.len()))]
    fn check_scope(&self, project_root: &Path, allowed_patterns: &[String]) -> Result<ScopeResult> {
        let matcher = ScopeMatcher::new(allowed_patterns).context("compile allowed patterns")?;
        let changed = Git::new(project_root)
            .changed_paths()
            .context("list changed files")?;
        let outside = matcher.out_of_scope(&changed);
        debug!(
            changed = changed.len(),
            out_of_scope = outside.len(),
            "scope checked"
        );
        Ok(ScopeResult::from_files(outside))
    }
}
