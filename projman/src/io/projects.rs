//! The projects directory: one git checkout per subdirectory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::repo_url::validate_project_name;
use crate::core::types::Refusal;
use crate::io::git::Git;
use crate::io::project_config::load_project_config;
use crate::io::venv::VenvPaths;

/// Names of tracked projects (subdirectories containing `.git`), sorted.
pub fn list_projects(projects_dir: &Path) -> Result<Vec<String>> {
    if !projects_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    let entries = fs::read_dir(projects_dir)
        .with_context(|| format!("read projects dir {}", projects_dir.display()))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !is_project_dir(&path) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    debug!(count = names.len(), "listed projects");
    Ok(names)
}

pub fn is_project_dir(path: &Path) -> bool {
    path.is_dir() && path.join(".git").exists()
}

/// Path for project `name`, validating that the name is a plain directory name.
pub fn project_path(projects_dir: &Path, name: &str) -> Result<PathBuf, Refusal> {
    validate_project_name(name)?;
    Ok(projects_dir.join(name))
}

/// Path of an existing tracked project.
pub fn resolve_existing(projects_dir: &Path, name: &str) -> Result<PathBuf, Refusal> {
    let path = project_path(projects_dir, name)?;
    if !is_project_dir(&path) {
        return Err(Refusal::NotFound(name.to_string()));
    }
    Ok(path)
}

/// Listing row for a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub path: PathBuf,
    pub run_file: Option<String>,
    /// `None` when HEAD cannot be read (e.g. an empty repository).
    pub head: Option<String>,
    /// `None` on detached HEAD.
    pub branch: Option<String>,
    pub has_env: bool,
}

/// Gather listing details; git failures degrade to `None` fields.
pub fn describe_project(projects_dir: &Path, name: &str) -> Result<ProjectInfo> {
    let path = resolve_existing(projects_dir, name)?;
    let config = load_project_config(&path)?;
    let git = Git::new(&path);
    Ok(ProjectInfo {
        name: name.to_string(),
        run_file: config.run_file,
        head: git.head_short_sha(7).ok(),
        branch: git.current_branch().ok().flatten(),
        has_env: VenvPaths::locate(&path).is_some(),
        path,
    })
}
