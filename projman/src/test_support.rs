//! Test-only helpers: throwaway upstream repositories, fake provisioning,
//! and recording progress/output sinks.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::progress::Reporter;
use crate::io::process::{OutputSink, OutputStream};
use crate::io::settings::Settings;
use crate::io::venv::{Provisioner, VenvPaths, requirements_path, resolve_executable};

/// Shell script standing in for a venv interpreter: `python -u <script>` runs
/// `<script>` with `sh`, so tests can exercise run/stop without Python.
pub const FAKE_PYTHON: &str = "#!/bin/sh\n[ \"$1\" = \"-u\" ] && shift\nexec sh \"$@\"\n";

/// An upstream repository plus an empty projects directory in one tempdir.
pub struct TestRepo {
    _temp: TempDir,
    pub upstream: PathBuf,
    pub projects_dir: PathBuf,
}

impl TestRepo {
    /// Create upstream `demo` on branch `main` with one commit of `app.py`.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let upstream = temp.path().join("upstream").join("demo");
        let projects_dir = temp.path().join("projects");
        fs::create_dir_all(&upstream).context("create upstream")?;
        fs::create_dir_all(&projects_dir).context("create projects dir")?;

        run_git(&upstream, &["init", "--quiet"])?;
        run_git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
        configure_identity(&upstream)?;
        let repo = Self {
            _temp: temp,
            upstream,
            projects_dir,
        };
        repo.commit_file("app.py", "print('v1')\n", "initial")?;
        Ok(repo)
    }

    pub fn url(&self) -> String {
        self.upstream.to_string_lossy().to_string()
    }

    /// Settings pointing at this repo's projects directory.
    pub fn settings(&self) -> Settings {
        Settings {
            projects_dir: self.projects_dir.clone(),
            ..Settings::default()
        }
    }

    /// Write `rel` in the upstream and commit it; returns the new sha.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<String> {
        let path = self.upstream.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create parent")?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        run_git(&self.upstream, &["add", "-A"])?;
        run_git(&self.upstream, &["commit", "--quiet", "-m", message])?;
        Ok(run_git(&self.upstream, &["rev-parse", "HEAD"])?
            .trim()
            .to_string())
    }

    /// Clone the upstream straight into the projects directory (no env setup).
    pub fn clone_plain(&self) -> Result<PathBuf> {
        let dest = self.projects_dir.join("demo");
        run_git(
            &self.projects_dir,
            &["clone", "--quiet", "--", &self.url(), "demo"],
        )?;
        configure_identity(&dest)?;
        Ok(dest)
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    run_git(dir, &["config", "user.name", "Projman Test"])?;
    run_git(dir, &["config", "user.email", "projman-test@local.invalid"])?;
    run_git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

/// Run git in `dir`, returning stdout; non-zero exit is an error.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Provisioner that creates a fake environment and records calls.
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    pub calls: Mutex<Vec<String>>,
    /// Make `create_env` fail (simulates a missing interpreter).
    pub fail_create: bool,
}

impl FakeProvisioner {
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: &str, project: &Path) {
        let name = project
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{call} {name}"));
    }
}

impl Provisioner for FakeProvisioner {
    fn create_env(&self, project: &Path) -> Result<()> {
        self.record("create_env", project);
        if self.fail_create {
            return Err(anyhow!("python executable not found: fake"));
        }
        let venv = VenvPaths::for_new(project);
        let python = venv.python();
        if let Some(parent) = python.parent() {
            fs::create_dir_all(parent).context("create fake venv")?;
        }
        fs::write(&python, FAKE_PYTHON).context("write fake python")?;
        make_executable(&python)?;
        Ok(())
    }

    fn install_requirements(&self, project: &Path) -> Result<bool> {
        if !requirements_path(project).is_file() {
            return Ok(false);
        }
        self.record("install_requirements", project);
        Ok(true)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).context("stat")?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).context("chmod")
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Interpreter that can create a working virtual environment here, if any.
///
/// Tests that need a real environment return early when this is `None`.
pub fn venv_python() -> Option<&'static str> {
    static FOUND: OnceLock<Option<&'static str>> = OnceLock::new();
    *FOUND.get_or_init(|| {
        ["python3", "python"].into_iter().find(|candidate| {
            let (Some(python), Ok(temp)) = (resolve_executable(candidate), tempfile::tempdir())
            else {
                return false;
            };
            Command::new(python)
                .args(["-m", "venv"])
                .arg(temp.path().join("env"))
                .output()
                .is_ok_and(|out| out.status.success())
        })
    })
}

/// Reporter that keeps everything it is told.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub progress: Mutex<Vec<u8>>,
    pub messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn progress(&self) -> Vec<u8> {
        self.progress.lock().expect("progress lock").clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }
}

impl Reporter for RecordingReporter {
    fn progress(&self, percent: u8) {
        self.progress.lock().expect("progress lock").push(percent);
    }

    fn message(&self, text: &str) {
        self.messages
            .lock()
            .expect("messages lock")
            .push(text.to_string());
    }
}

/// Output sink that collects lines and the exit code.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub lines: Mutex<Vec<(OutputStream, String)>>,
    pub exit: Mutex<Option<Option<i32>>>,
}

impl CollectingSink {
    pub fn lines_of(&self, stream: OutputStream) -> Vec<String> {
        self.lines
            .lock()
            .expect("lines lock")
            .iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn exit(&self) -> Option<Option<i32>> {
        *self.exit.lock().expect("exit lock")
    }
}

impl OutputSink for CollectingSink {
    fn line(&self, stream: OutputStream, line: &str) {
        self.lines
            .lock()
            .expect("lines lock")
            .push((stream, line.to_string()));
    }

    fn finished(&self, exit_code: Option<i32>) {
        *self.exit.lock().expect("exit lock") = Some(exit_code);
    }
}
