//! Running a project's entry script inside its virtual environment.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::core::types::Refusal;
use crate::io::process::{OutputSink, StopOutcome, StreamingChild, spawn_streaming};
use crate::io::project_config::{load_project_config, write_project_config};
use crate::io::venv::VenvPaths;

/// Pick the entry script for `project`.
///
/// An explicit `choice` is validated and persisted to the project config;
/// otherwise the configured `run_file` is used.
pub fn resolve_entry_script(project: &Path, choice: Option<&Path>) -> Result<PathBuf> {
    let mut config = load_project_config(project)?;

    if let Some(choice) = choice {
        let script = contained_script(project, choice)?;
        config.set_run_file(project, &script);
        write_project_config(project, &config)?;
        info!(script = %script.display(), "entry script selected");
        return Ok(script);
    }

    let configured = config
        .run_file_path(project)
        .ok_or(Refusal::NoEntryScript)?;
    contained_script(project, &configured)
}

/// Resolve `choice` to an existing file inside `project`, following symlinks
/// and `..` components before checking.
fn contained_script(project: &Path, choice: &Path) -> Result<PathBuf> {
    let joined = project.join(choice);
    let missing = || Refusal::MissingEntryScript(joined.display().to_string());
    let script = joined.canonicalize().map_err(|_| missing())?;
    if !script.is_file() {
        return Err(missing().into());
    }
    let root = project
        .canonicalize()
        .with_context(|| format!("resolve {}", project.display()))?;
    if !script.starts_with(&root) {
        return Err(Refusal::ScriptOutsideProject(choice.display().to_string()).into());
    }
    let relative = script.strip_prefix(&root).context("entry script outside project")?;
    Ok(project.join(relative))
}

/// A running project script.
#[derive(Debug)]
pub struct RunHandle {
    pub script: PathBuf,
    child: StreamingChild,
}

impl RunHandle {
    pub fn pid(&self) -> u32 {
        self.child.pid()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_running()
    }

    /// Terminate, wait up to `grace`, then kill.
    pub fn stop(&self, grace: Duration) -> Result<StopOutcome> {
        self.child.stop(grace)
    }

    /// Block until the script exits; returns its exit code if it had one.
    pub fn wait(self) -> Result<Option<i32>> {
        self.child.wait()
    }
}

/// Start `script` with the project's environment interpreter.
///
/// Output is forwarded line by line to `sink`, which is told when the script
/// exits.
#[instrument(skip_all, fields(project = %project.display(), script = %script.display()))]
pub fn start_project(project: &Path, script: &Path, sink: Arc<dyn OutputSink>) -> Result<RunHandle> {
    let project = &std::path::absolute(project)
        .with_context(|| format!("resolve {}", project.display()))?;
    let script = &std::path::absolute(script)
        .with_context(|| format!("resolve {}", script.display()))?;
    let venv = VenvPaths::locate(project)
        .ok_or_else(|| anyhow!("virtual environment not found in {}", project.display()))?;
    let python = venv.python();
    if !python.exists() {
        return Err(anyhow!(
            "virtual environment interpreter not found: {}",
            python.display()
        ));
    }

    let mut cmd = Command::new(&python);
    cmd.arg("-u")
        .arg(script)
        .current_dir(project)
        .env("PYTHONIOENCODING", "utf-8");
    let child = spawn_streaming(cmd, sink)
        .with_context(|| format!("start {}", script.display()))?;
    info!(pid = child.pid(), "project started");
    Ok(RunHandle {
        script: script.to_path_buf(),
        child,
    })
}
