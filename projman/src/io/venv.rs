//! Per-project Python virtual environments.
//!
//! The [`Provisioner`] trait decouples orchestration from the interpreter
//! toolchain. Tests use fakes that record calls instead of running `python`.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Directory created for new environments.
pub const ENV_DIR: &str = "venv";
/// Alternative directory accepted for existing environments.
pub const ALT_ENV_DIR: &str = ".venv";
/// Dependency manifest installed into the environment.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

const SETUP_OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

/// Layout of a virtual environment on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenvPaths {
    pub root: PathBuf,
}

impl VenvPaths {
    /// Existing environment of `project` (`venv/` preferred over `.venv/`).
    pub fn locate(project: &Path) -> Option<Self> {
        [ENV_DIR, ALT_ENV_DIR]
            .iter()
            .map(|dir| project.join(dir))
            .find(|root| root.is_dir())
            .map(|root| Self { root })
    }

    /// Where a new environment for `project` is created.
    pub fn for_new(project: &Path) -> Self {
        Self {
            root: project.join(ENV_DIR),
        }
    }

    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts").join("python.exe")
        } else {
            self.root.join("bin").join("python")
        }
    }

    pub fn pip(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts").join("pip.exe")
        } else {
            self.root.join("bin").join("pip")
        }
    }
}

pub fn requirements_path(project: &Path) -> PathBuf {
    project.join(REQUIREMENTS_FILE)
}

/// Abstraction over environment creation and dependency installation.
pub trait Provisioner: Send + Sync {
    /// Create the project's environment.
    fn create_env(&self, project: &Path) -> Result<()>;

    /// Install `requirements.txt` into the existing environment.
    ///
    /// Returns `Ok(false)` when the project has no manifest.
    fn install_requirements(&self, project: &Path) -> Result<bool>;

    /// Create the environment, then install dependencies.
    fn setup_env(&self, project: &Path) -> Result<bool> {
        self.create_env(project)?;
        self.install_requirements(project)
    }
}

/// Provisioner that runs `python -m venv` and `pip install -r`.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    python: String,
    timeout: Duration,
}

impl VenvProvisioner {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
        }
    }

    fn run(&self, cmd: Command, label: &str) -> Result<CommandOutput> {
        let output = run_command_with_timeout(cmd, self.timeout, SETUP_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run {label}"))?;
        if output.timed_out {
            return Err(anyhow!("{label} timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), label, "setup command failed");
            return Err(anyhow!("{label} failed: {}", output.stderr_tail()));
        }
        Ok(output)
    }
}

impl Provisioner for VenvProvisioner {
    #[instrument(skip_all, fields(project = %project.display(), python = %self.python))]
    fn create_env(&self, project: &Path) -> Result<()> {
        let python = resolve_executable(&self.python)
            .ok_or_else(|| anyhow!("python executable not found: {}", self.python))?;
        let project = std::path::absolute(project)
            .with_context(|| format!("resolve {}", project.display()))?;
        let venv = VenvPaths::for_new(&project);
        info!(venv = %venv.root.display(), "creating virtual environment");

        let mut cmd = Command::new(&python);
        cmd.arg("-m").arg("venv").arg(&venv.root).current_dir(&project);
        self.run(cmd, "virtual environment creation")?;
        Ok(())
    }

    #[instrument(skip_all, fields(project = %project.display()))]
    fn install_requirements(&self, project: &Path) -> Result<bool> {
        let requirements = requirements_path(project);
        if !requirements.is_file() {
            debug!("no requirements file");
            return Ok(false);
        }
        let project = std::path::absolute(project)
            .with_context(|| format!("resolve {}", project.display()))?;
        let venv = VenvPaths::locate(&project)
            .ok_or_else(|| anyhow!("virtual environment not found in {}", project.display()))?;
        let pip = venv.pip();
        if !pip.exists() {
            return Err(anyhow!("pip executable not found: {}", pip.display()));
        }
        info!(pip = %pip.display(), "installing dependencies");

        let mut cmd = Command::new(&pip);
        cmd.arg("install")
            .arg("-r")
            .arg(REQUIREMENTS_FILE)
            .current_dir(&project)
            .env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
        self.run(cmd, "dependency installation")?;
        Ok(true)
    }
}

/// Resolve an interpreter given as a path or as a bare name on `PATH`.
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let program = program.trim();
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var).find_map(|dir| {
        let direct = dir.join(program);
        if direct.is_file() {
            return Some(direct);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{program}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
