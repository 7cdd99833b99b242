//! Git adapter for project checkouts.
//!
//! Every version-control operation projman needs is a `git` subprocess call,
//! so we keep a small, explicit wrapper around them. Network operations
//! (clone, pull) run with a timeout and never prompt for credentials.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::commits::{CommitSummary, LOG_FORMAT, parse_log};
use crate::core::types::Refusal;
use crate::io::process::run_command_with_timeout;

const NETWORK_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;
const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    network_timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    /// Limit applied to clone and pull.
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into `dest` (which must not exist yet).
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub fn clone_into(url: &str, dest: &Path, timeout: Duration) -> Result<Git> {
        let dest = &std::path::absolute(dest)
            .with_context(|| format!("resolve clone destination {}", dest.display()))?;
        let parent = dest
            .parent()
            .with_context(|| format!("clone destination has no parent {}", dest.display()))?;
        info!("cloning repository");
        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .arg("--")
            .arg(url)
            .arg(dest)
            .current_dir(parent)
            .env("GIT_TERMINAL_PROMPT", "0");
        let output = run_command_with_timeout(cmd, timeout, NETWORK_OUTPUT_LIMIT_BYTES)
            .context("spawn git clone")?;
        if output.timed_out {
            return Err(anyhow!("git clone timed out after {:?}", timeout));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(exit_code = ?output.status.code(), "git clone failed");
            return Err(anyhow!("git clone failed: {}", stderr.trim()));
        }
        Ok(Git::new(dest).with_network_timeout(timeout))
    }

    /// Fast-forward the current branch from its upstream.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn pull(&self) -> Result<()> {
        debug!("pulling");
        let mut cmd = Command::new("git");
        cmd.args(["pull", "--ff-only"])
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        let output =
            run_command_with_timeout(cmd, self.network_timeout, NETWORK_OUTPUT_LIMIT_BYTES)
                .context("spawn git pull")?;
        if output.timed_out {
            return Err(anyhow!("git pull timed out after {:?}", self.network_timeout));
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git pull failed: {}", stderr.trim()));
        }
        Ok(())
    }

    /// Return the current branch name, or `None` on detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            debug!("detached HEAD");
            return Ok(None);
        }
        Ok(Some(name))
    }

    /// Return the current HEAD sha.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Return the current HEAD short SHA.
    pub fn head_short_sha(&self, len: usize) -> Result<String> {
        let arg = format!("--short={len}");
        let out = self.run_capture(&["rev-parse", &arg, "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries for tracked files in porcelain format.
    pub fn status_tracked(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "--untracked-files=no"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// True when tracked files have uncommitted changes.
    ///
    /// Untracked files (the virtual environment, `config.json`) never count.
    #[instrument(skip_all)]
    pub fn is_dirty(&self) -> Result<bool> {
        let entries = self.status_tracked()?;
        for entry in &entries {
            debug!(code = %entry.code, path = %entry.path, "uncommitted change");
        }
        if !entries.is_empty() {
            warn!(changed = entries.len(), "worktree has uncommitted changes");
        }
        Ok(!entries.is_empty())
    }

    /// Check whether `reference` (e.g. `refs/remotes/origin/HEAD`) exists.
    pub fn ref_exists(&self, reference: &str) -> Result<bool> {
        let status = self
            .run(&["rev-parse", "--verify", "--quiet", reference])?
            .status;
        Ok(status.success())
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        self.ref_exists(&format!("refs/heads/{branch}"))
    }

    /// Resolve `rev` to a full commit sha, refusing unknown revisions.
    pub fn resolve_commit(&self, rev: &str) -> Result<String> {
        let rev = rev.trim();
        if rev.is_empty() || rev.starts_with('-') {
            return Err(Refusal::UnknownCommit(rev.to_string()).into());
        }
        let spec = format!("{rev}^{{commit}}");
        let output = self.run(&["rev-parse", "--verify", "--quiet", &spec])?;
        if !output.status.success() {
            return Err(Refusal::UnknownCommit(rev.to_string()).into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Checkout a branch or commit (commits leave HEAD detached).
    #[instrument(skip_all, fields(rev = %rev))]
    pub fn checkout(&self, rev: &str) -> Result<()> {
        debug!(rev, "checking out");
        self.run_checked(&["checkout", "--quiet", rev])?;
        Ok(())
    }

    /// Ref whose history is offered for switching: the remote default branch
    /// when known, so that switching to an old commit does not hide newer ones.
    pub fn default_log_ref(&self) -> Result<String> {
        if self.ref_exists("refs/remotes/origin/HEAD")? {
            return Ok("origin/HEAD".to_string());
        }
        Ok("HEAD".to_string())
    }

    /// Commits reachable from `rev`, newest first.
    pub fn log(&self, rev: &str, limit: usize) -> Result<Vec<CommitSummary>> {
        let format = format!("--format={LOG_FORMAT}");
        let max = format!("--max-count={limit}");
        let out = self.run_capture(&["log", &format, &max, rev, "--"])?;
        parse_log(&out)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M app.py").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: " M".to_string(),
                path: "app.py".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.py -> new.py").expect("parse");
        assert_eq!(e.path, "new.py");
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_status_line("M").is_err());
    }
}
