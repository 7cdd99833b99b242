//! Orchestration for cloning a new project.
//!
//! Cloning is the first lifecycle step: fetch the repository into the projects
//! directory, then provision its virtual environment and dependencies.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::progress::{CLONE_FETCHED, DONE, Reporter};
use crate::core::repo_url::project_name_from_url;
use crate::core::types::Refusal;
use crate::io::git::Git;
use crate::io::settings::Settings;
use crate::io::venv::Provisioner;

/// Outcome of a successful clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOutcome {
    pub name: String,
    pub path: PathBuf,
    /// Whether `requirements.txt` was installed.
    pub dependencies_installed: bool,
}

/// Clone `url` into the projects directory and set up its environment.
///
/// A failed clone removes the partial checkout. A failed environment setup
/// keeps the checkout so the user can fix the interpreter and update.
pub fn clone_project<P: Provisioner + ?Sized, R: Reporter + ?Sized>(
    settings: &Settings,
    url: &str,
    provisioner: &P,
    reporter: &R,
) -> Result<CloneOutcome> {
    let name = project_name_from_url(url)?;
    let path = settings.projects_dir.join(&name);
    if path.exists() {
        return Err(Refusal::AlreadyExists(name).into());
    }
    settings.ensure_projects_dir()?;

    reporter.progress(0);
    reporter.message(&format!("cloning {name}"));
    if let Err(err) = Git::clone_into(url.trim(), &path, settings.setup_timeout()) {
        if path.exists()
            && let Err(cleanup) = fs::remove_dir_all(&path)
        {
            warn!(err = %cleanup, path = %path.display(), "failed to remove partial clone");
        }
        return Err(err).with_context(|| format!("clone {name}"));
    }

    reporter.progress(CLONE_FETCHED);
    reporter.message("creating virtual environment");
    let dependencies_installed = provisioner
        .setup_env(&path)
        .with_context(|| format!("set up environment for {name}"))?;

    reporter.progress(DONE);
    reporter.message(&format!("{name} is ready"));
    info!(name = %name, dependencies_installed, "project cloned");
    Ok(CloneOutcome {
        name,
        path,
        dependencies_installed,
    })
}
