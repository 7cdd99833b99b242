//! Orchestration for pulling projects and refreshing their dependencies.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::progress::{DONE, Reporter, UPDATE_PULLED};
use crate::core::types::Refusal;
use crate::io::git::Git;
use crate::io::projects::list_projects;
use crate::io::venv::{Provisioner, VenvPaths, requirements_path};

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub previous_head: String,
    pub head: String,
    /// Whether `requirements.txt` was (re)installed.
    pub dependencies_installed: bool,
    /// Whether a missing environment had to be created.
    pub env_created: bool,
}

impl UpdateOutcome {
    pub fn changed(&self) -> bool {
        self.previous_head != self.head
    }
}

/// Pull `project` and reinstall its dependencies.
///
/// Projects switched to a specific commit (detached HEAD) are refused: there
/// is no branch to pull into.
pub fn update_project<P: Provisioner + ?Sized, R: Reporter + ?Sized>(
    project: &Path,
    git: &Git,
    provisioner: &P,
    reporter: &R,
) -> Result<UpdateOutcome> {
    reporter.progress(0);
    let previous_head = git.head_sha()?;
    if git.current_branch()?.is_none() {
        let short = previous_head.chars().take(7).collect::<String>();
        return Err(Refusal::DetachedHead(short).into());
    }

    reporter.message("pulling");
    git.pull()?;
    let head = git.head_sha()?;
    reporter.progress(UPDATE_PULLED);

    let mut env_created = false;
    let dependencies_installed = if VenvPaths::locate(project).is_none() {
        reporter.message("creating virtual environment");
        env_created = true;
        provisioner.setup_env(project)?
    } else if requirements_path(project).is_file() {
        reporter.message("updating dependencies");
        provisioner.install_requirements(project)?
    } else {
        false
    };

    reporter.progress(DONE);
    info!(
        project = %project.display(),
        changed = previous_head != head,
        dependencies_installed,
        "project updated"
    );
    Ok(UpdateOutcome {
        previous_head,
        head,
        dependencies_installed,
        env_created,
    })
}

/// Update every tracked project except those in `skip`.
///
/// Failures are collected per project and never abort the batch.
pub fn update_all<P: Provisioner + ?Sized, R: Reporter + ?Sized>(
    projects_dir: &Path,
    git_for: impl Fn(&Path) -> Git,
    provisioner: &P,
    reporter: &R,
    skip: &HashSet<String>,
) -> Result<Vec<(String, Result<UpdateOutcome>)>> {
    let names = list_projects(projects_dir)?;
    let mut results = Vec::with_capacity(names.len());
    for name in names {
        if skip.contains(&name) {
            debug!(name = %name, "skipping busy project");
            continue;
        }
        let path = projects_dir.join(&name);
        let git = git_for(&path);
        let result = update_project(&path, &git, provisioner, reporter)
            .with_context(|| format!("update {name}"));
        if let Err(err) = &result {
            warn!(name = %name, err = %format!("{err:#}"), "update failed");
        }
        results.push((name, result));
    }
    Ok(results)
}
