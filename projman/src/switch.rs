//! Listing commits and switching a project's checkout.

use std::path::Path;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::commits::CommitSummary;
use crate::core::types::Refusal;
use crate::io::git::Git;
use crate::io::project_config::{load_project_config, write_project_config};

/// Outcome of a checkout switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub from: String,
    pub to: String,
    /// Branch checked out, or `None` when HEAD is now detached at `to`.
    pub branch: Option<String>,
}

/// List up to `limit` commits of the project's default history, newest first.
///
/// The listing is cached in the project config; a failure to write the cache
/// is logged and does not fail the listing.
#[instrument(skip_all, fields(project = %project.display(), limit = limit))]
pub fn list_commits(project: &Path, git: &Git, limit: usize) -> Result<Vec<CommitSummary>> {
    let rev = git.default_log_ref()?;
    let commits = git.log(&rev, limit)?;

    let cached = load_project_config(project).and_then(|mut cfg| {
        cfg.commits = Some(commits.clone());
        write_project_config(project, &cfg)
    });
    if let Err(err) = cached {
        warn!(err = %format!("{err:#}"), "failed to cache commit list");
    }
    Ok(commits)
}

/// Switch the checkout to `rev` (a commit sha, sha prefix, or branch name).
///
/// Refuses when tracked files have uncommitted changes or `rev` is unknown.
#[instrument(skip_all, fields(workdir = %git.workdir().display(), rev = %rev))]
pub fn switch_commit(git: &Git, rev: &str) -> Result<SwitchOutcome> {
    if git.is_dirty()? {
        return Err(Refusal::DirtyWorktree.into());
    }

    let rev = rev.trim();
    let branch = if !rev.is_empty() && git.branch_exists(rev)? {
        Some(rev.to_string())
    } else {
        None
    };
    let target = git.resolve_commit(rev)?;

    let from = git.head_sha()?;
    git.checkout(branch.as_deref().unwrap_or(&target))?;
    info!(from = %from, to = %target, branch = ?branch, "switched checkout");
    Ok(SwitchOutcome {
        from,
        to: target,
        branch,
    })
}
