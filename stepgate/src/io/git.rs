//! Thin `git` subprocess wrapper for scope and commit checks.
//!
//! Status is read with `-z`, so paths arrive unquoted and renames carry both
//! names as separate NUL-terminated fields.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

/// A commit located by [`Git::find_commit_containing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    /// Committer date, strict ISO-8601.
    pub date: String,
    pub subject: String,
}

/// Runs `git` inside one repository directory.
#[derive(Debug, Clone)]
pub struct Git {
    repo_dir: PathBuf,
}

impl Git {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    /// Paths changed in the working tree or index against HEAD, untracked
    /// files included. Sorted, without duplicates; renames and copies report
    /// the destination.
    #[instrument(skip_all)]
    pub fn changed_paths(&self) -> Result<Vec<String>> {
        let raw = self.output(&["status", "--porcelain=v1", "-z", "-uall"])?;
        let mut paths = parse_status_z(&raw)?;
        paths.sort();
        paths.dedup();
        debug!(changed = paths.len(), "read working tree status");
        Ok(paths)
    }

    /// Newest commit whose message contains `needle` verbatim.
    #[instrument(skip_all, fields(needle = %needle))]
    pub fn find_commit_containing(&self, needle: &str) -> Result<Option<CommitInfo>> {
        let grep = format!("--grep={needle}");
        let raw = self.output(&[
            "log",
            "-1",
            "--fixed-strings",
            &grep,
            "--format=%H%x1f%cI%x1f%s",
        ])?;
        let line = raw.trim();
        if line.is_empty() {
            debug!("no commit carries the needle");
            return Ok(None);
        }
        parse_commit_line(line).map(Some)
    }

    /// Run `git <args>` and return stdout; a non-zero exit is an error
    /// carrying stderr.
    pub fn output(&self, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .with_context(|| format!("run git {}", args.join(" ")))?;
        if !out.status.success() {
            bail!(
                "git {} exited with {}: {}",
                args.join(" "),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

/// Parse `git status --porcelain=v1 -z` output into current paths.
fn parse_status_z(raw: &str) -> Result<Vec<String>> {
    let mut fields = raw.split('\0').filter(|field| !field.is_empty());
    let mut paths = Vec::new();
    while let Some(field) = fields.next() {
        let (Some(code), Some(path)) = (field.get(..2), field.get(3..)) else {
            bail!("malformed status entry '{field}'");
        };
        if code.contains(['R', 'C']) {
            // The source path follows as its own field.
            fields.next();
        }
        paths.push(path.to_string());
    }
    Ok(paths)
}

fn parse_commit_line(line: &str) -> Result<CommitInfo> {
    let parts: Vec<&str> = line.splitn(3, '\u{1f}').collect();
    match parts.as_slice() {
        [hash, date, subject] if !hash.is_empty() => Ok(CommitInfo {
            hash: (*hash).to_string(),
            date: (*date).to_string(),
            subject: (*subject).to_string(),
        }),
        _ => bail!("unrecognized git log output '{line}'"),
    }
}
