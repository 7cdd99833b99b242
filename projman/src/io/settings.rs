//! Global settings stored in `settings.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default settings file name, resolved against the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.toml";

/// User settings (TOML).
///
/// Edited by humans and by the front ends. Missing fields default to the
/// values in [`Settings::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one checkout per project.
    pub projects_dir: PathBuf,

    /// Interpreter used to create virtual environments.
    pub python: String,

    /// Seconds between automatic pulls of every project (0 disables).
    pub autoupdate_interval_secs: u64,

    /// Grace period between terminating a running project and killing it.
    pub stop_timeout_secs: u64,

    /// Limit for clone / pull / venv / pip commands.
    pub setup_timeout_secs: u64,

    /// Lines of run output retained per project for late viewers.
    pub output_history_lines: usize,

    /// Commits listed when choosing a commit to switch to.
    pub commit_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("projects"),
            python: default_python().to_string(),
            autoupdate_interval_secs: 60 * 60,
            stop_timeout_secs: 3,
            setup_timeout_secs: 30 * 60,
            output_history_lines: 2000,
            commit_limit: 100,
        }
    }
}

fn default_python() -> &'static str {
    if cfg!(windows) { "python" } else { "python3" }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.projects_dir.as_os_str().is_empty() {
            return Err(anyhow!("projects_dir must not be empty"));
        }
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must not be empty"));
        }
        if self.stop_timeout_secs == 0 {
            return Err(anyhow!("stop_timeout_secs must be > 0"));
        }
        if self.setup_timeout_secs == 0 {
            return Err(anyhow!("setup_timeout_secs must be > 0"));
        }
        if self.output_history_lines == 0 {
            return Err(anyhow!("output_history_lines must be > 0"));
        }
        if self.commit_limit == 0 {
            return Err(anyhow!("commit_limit must be > 0"));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    /// `None` when auto-update is disabled.
    pub fn autoupdate_interval(&self) -> Option<Duration> {
        (self.autoupdate_interval_secs > 0)
            .then(|| Duration::from_secs(self.autoupdate_interval_secs))
    }

    /// Create the projects directory if needed.
    pub fn ensure_projects_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.projects_dir)
            .with_context(|| format!("create projects dir {}", self.projects_dir.display()))
    }
}

/// Load settings from a TOML file and make sure the projects directory exists.
///
/// If the file is missing, returns `Settings::default()`. A relative
/// `projects_dir` is resolved against the directory holding the settings file,
/// so the returned path is always absolute.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let mut settings: Settings = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        debug!(path = %path.display(), "settings file missing, using defaults");
        Settings::default()
    };
    settings.validate()?;
    if settings.projects_dir.is_relative()
        && let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty())
    {
        settings.projects_dir = base.join(&settings.projects_dir);
    }
    settings.projects_dir = absolute_dir(&settings.projects_dir)?;
    settings.ensure_projects_dir()?;
    Ok(settings)
}

/// Child processes run with other working directories, so every path handed
/// to them starts from here.
fn absolute_dir(dir: &Path) -> Result<PathBuf> {
    std::path::absolute(dir).with_context(|| format!("resolve {}", dir.display()))
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Point settings at a new projects directory, create it, and persist.
pub fn set_projects_dir(path: &Path, settings: &mut Settings, projects_dir: &Path) -> Result<()> {
    if projects_dir.as_os_str().is_empty() {
        return Err(anyhow!("projects_dir must not be empty"));
    }
    settings.projects_dir = absolute_dir(projects_dir)?;
    settings.ensure_projects_dir()?;
    write_settings(path, settings)
}

/// Change the interpreter used for new environments and persist.
pub fn set_python(path: &Path, settings: &mut Settings, python: &str) -> Result<()> {
    if python.trim().is_empty() {
        return Err(anyhow!("python must not be empty"));
    }
    settings.python = python.trim().to_string();
    write_settings(path, settings)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
