//! Per-project config stored as `config.json` in the project directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::settings::write_atomic;
use crate::core::commits::CommitSummary;

pub const CONFIG_FILE: &str = "config.json";

/// Project config. Unknown keys are preserved across rewrites.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectConfig {
    /// Entry script, relative to the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_file: Option<String>,

    /// Commits from the last listing, newest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commits: Option<Vec<CommitSummary>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProjectConfig {
    /// Absolute path of the entry script, if one is configured.
    pub fn run_file_path(&self, project: &Path) -> Option<PathBuf> {
        let run_file = self.run_file.as_deref()?.trim();
        if run_file.is_empty() {
            return None;
        }
        let path = PathBuf::from(run_file);
        Some(if path.is_absolute() {
            path
        } else {
            project.join(path)
        })
    }

    /// Store `script` relative to the project when it lives inside it.
    pub fn set_run_file(&mut self, project: &Path, script: &Path) {
        let stored = script.strip_prefix(project).unwrap_or(script);
        self.run_file = Some(stored.to_string_lossy().replace('\\', "/"));
    }
}

pub fn config_path(project: &Path) -> PathBuf {
    project.join(CONFIG_FILE)
}

/// Load project config; a missing file yields an empty config.
pub fn load_project_config(project: &Path) -> Result<ProjectConfig> {
    let path = config_path(project);
    if !path.exists() {
        debug!(path = %path.display(), "project config missing");
        return Ok(ProjectConfig::default());
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg = serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write project config (pretty JSON, trailing newline).
pub fn write_project_config(project: &Path, cfg: &ProjectConfig) -> Result<()> {
    let path = config_path(project);
    debug!(path = %path.display(), run_file = ?cfg.run_file, "writing project config");
    let mut buf = serde_json::to_string_pretty(cfg).context("serialize project config")?;
    buf.push('\n');
    write_atomic(&path, &buf)
}
