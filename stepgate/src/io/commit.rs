//! Commit verification port.
//!
//! A step counts as committed when some commit message carries the trailer
//! `<trailer>: <step_id>`.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::io::git::Git;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitVerification {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_subject: Option<String>,
}

pub trait CommitVerifier {
    fn verify_commit(&self, step_id: &str, cwd: &Path) -> Result<CommitVerification>;
}

/// Searches git history for a step trailer.
#[derive(Debug, Clone)]
pub struct GitCommitVerifier {
    trailer: String,
}

impl GitCommitVerifier {
    pub fn new(trailer: impl Into<String>) -> Self {
        Self {
            trailer: trailer.into(),
        }
    }
}

impl Default for GitCommitVerifier {
    fn default() -> Self {
        Self::new("Step-Id")
    }
}

impl CommitVerifier for GitCommitVerifier {
    fn verify_commit(&self, step_id: &str, cwd: &Path) -> Result<CommitVerification> {
        let needle = format!("{}: {}", self.trailer, step_id);
        let found = Git::new(cwd).find_commit_containing(&needle)?;
        Ok(match found {
            Some(commit) => CommitVerification {
                verified: true,
                commit_hash: Some(commit.hash),
                commit_date: Some(commit.date),
                commit_subject: Some(commit.subject),
            },
            None => CommitVerification::default(),
        })
    }
}
