//! Helpers for running child processes.
//!
//! Two shapes are needed: setup commands (git, venv, pip) that run to
//! completion with a timeout and bounded captured output, and project scripts
//! that stream their output line by line until they exit or are stopped.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STDERR_TAIL_CHARS: usize = 2000;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last part of stderr, for error messages.
    pub fn stderr_tail(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let trimmed = stderr.trim();
        let count = trimmed.chars().count();
        if count <= STDERR_TAIL_CHARS {
            return trimmed.to_string();
        }
        let tail: String = trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect();
        format!("...{tail}")
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        debug!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

fn join_output(handle: JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

/// Which pipe a streamed line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives the output of a streaming child process.
///
/// Called from reader threads; `line` may be called concurrently for stdout
/// and stderr. `finished` is called exactly once, after both pipes closed.
pub trait OutputSink: Send + Sync + 'static {
    fn line(&self, stream: OutputStream, line: &str);
    fn finished(&self, exit_code: Option<i32>);
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The process had already exited on its own.
    AlreadyExited,
    /// The process exited within the grace period after terminate.
    Terminated,
    /// The process ignored terminate and was killed.
    Killed,
}

/// A spawned child whose output is forwarded to an [`OutputSink`].
pub struct StreamingChild {
    pid: u32,
    child: Arc<Mutex<Child>>,
    monitor: Option<JoinHandle<Option<i32>>>,
}

impl std::fmt::Debug for StreamingChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingChild")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Spawn `cmd` with piped stdout/stderr forwarded line by line to `sink`.
#[instrument(skip_all)]
pub fn spawn_streaming(mut cmd: Command, sink: Arc<dyn OutputSink>) -> Result<StreamingChild> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    let pid = child.id();
    info!(pid, "child process started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_sink = Arc::clone(&sink);
    let stdout_reader =
        thread::spawn(move || forward_lines(stdout, OutputStream::Stdout, &*stdout_sink));
    let stderr_sink = Arc::clone(&sink);
    let stderr_reader =
        thread::spawn(move || forward_lines(stderr, OutputStream::Stderr, &*stderr_sink));

    let child = Arc::new(Mutex::new(child));
    let monitor_child = Arc::clone(&child);
    let monitor = thread::spawn(move || {
        let code = wait_for_exit(&monitor_child);
        for reader in [stdout_reader, stderr_reader] {
            if reader.join().is_err() {
                warn!("output reader thread panicked");
            }
        }
        debug!(pid, exit_code = ?code, "child process finished");
        sink.finished(code);
        code
    });

    Ok(StreamingChild {
        pid,
        child,
        monitor: Some(monitor),
    })
}

impl StreamingChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// True until the child has exited.
    pub fn is_running(&self) -> bool {
        match lock_child(&self.child).try_wait() {
            Ok(status) => status.is_none(),
            Err(_) => false,
        }
    }

    /// Terminate the child, wait up to `grace`, then kill it.
    #[instrument(skip_all, fields(pid = self.pid, grace_secs = grace.as_secs()))]
    pub fn stop(&self, grace: Duration) -> Result<StopOutcome> {
        let mut child = lock_child(&self.child);
        if child.try_wait().context("poll child")?.is_some() {
            return Ok(StopOutcome::AlreadyExited);
        }

        if let Err(err) = terminate(self.pid) {
            warn!(err = %err, "terminate failed, killing");
        } else if child
            .wait_timeout(grace)
            .context("wait after terminate")?
            .is_some()
        {
            info!("child terminated");
            return Ok(StopOutcome::Terminated);
        }

        warn!("child ignored terminate, killing");
        child.kill().context("kill child")?;
        child.wait().context("wait child after kill")?;
        Ok(StopOutcome::Killed)
    }

    /// Block until the child exits and its output is drained.
    pub fn wait(mut self) -> Result<Option<i32>> {
        let monitor = self
            .monitor
            .take()
            .ok_or_else(|| anyhow!("child already waited"))?;
        monitor
            .join()
            .map_err(|_| anyhow!("child monitor thread panicked"))
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wait_for_exit(child: &Mutex<Child>) -> Option<i32> {
    loop {
        let polled = {
            let mut guard = lock_child(child);
            guard.wait_timeout(EXIT_POLL_INTERVAL)
        };
        match polled {
            Ok(Some(status)) => return status.code(),
            Ok(None) => continue,
            Err(err) => {
                error!(err = %err, "waiting for child failed");
                return None;
            }
        }
    }
}

fn forward_lines<R: Read>(reader: R, stream: OutputStream, sink: &dyn OutputSink) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.line(stream, line.trim_end_matches(['\n', '\r']));
            }
            Err(err) => {
                warn!(err = %err, ?stream, "reading child output failed");
                break;
            }
        }
    }
}

/// Ask a process to exit (SIGTERM on Unix, `taskkill` without `/F` on Windows).
fn terminate(pid: u32) -> Result<()> {
    #[cfg(windows)]
    let output = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .output()
        .context("spawn taskkill")?;

    #[cfg(not(windows))]
    let output = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .output()
        .context("spawn kill")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("terminate {pid} failed: {}", stderr.trim()));
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::CollectingSink;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_and_exit_status() {
        let out = run_command_with_timeout(
            sh("echo hello; echo oops >&2; exit 3"),
            Duration::from_secs(10),
            1000,
        )
        .expect("run");
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hello\n");
        assert_eq!(out.stderr_tail(), "oops");
        assert!(!out.timed_out);
    }

    #[test]
    fn times_out_and_kills() {
        let out = run_command_with_timeout(sh("sleep 5"), Duration::from_millis(200), 1000)
            .expect("run");
        assert!(out.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_command_with_timeout(sh("printf 0123456789"), Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn streams_both_pipes_then_reports_exit() {
        let sink = Arc::new(CollectingSink::default());
        let child = spawn_streaming(
            sh("echo one; echo two >&2; echo three; exit 4"),
            Arc::clone(&sink) as Arc<dyn OutputSink>,
        )
        .expect("spawn");
        let code = child.wait().expect("wait");
        assert_eq!(code, Some(4));

        assert_eq!(sink.lines_of(OutputStream::Stdout), vec!["one", "three"]);
        assert_eq!(sink.lines_of(OutputStream::Stderr), vec!["two"]);
        assert_eq!(sink.exit(), Some(Some(4)));
    }

    #[test]
    fn stop_terminates_running_child() {
        let sink = Arc::new(CollectingSink::default());
        let child = spawn_streaming(sh("exec sleep 30"), sink as Arc<dyn OutputSink>)
            .expect("spawn");
        assert!(child.is_running());
        let outcome = child.stop(Duration::from_secs(5)).expect("stop");
        assert_eq!(outcome, StopOutcome::Terminated);
        assert!(!child.is_running());
        assert_eq!(child.wait().expect("wait"), None);
    }

    #[test]
    fn stop_kills_child_that_ignores_terminate() {
        let sink = Arc::new(CollectingSink::default());
        let child = spawn_streaming(
            sh("trap '' TERM; echo ready; while true; do sleep 0.1; done"),
            Arc::clone(&sink) as Arc<dyn OutputSink>,
        )
        .expect("spawn");
        wait_for_line(&sink, "ready");
        let outcome = child.stop(Duration::from_millis(300)).expect("stop");
        assert_eq!(outcome, StopOutcome::Killed);
    }

    #[test]
    fn stop_after_exit_is_noop() {
        let sink = Arc::new(CollectingSink::default());
        let child = spawn_streaming(sh("true"), sink as Arc<dyn OutputSink>).expect("spawn");
        while child.is_running() {
            thread::sleep(Duration::from_millis(20));
        }
        let outcome = child.stop(Duration::from_secs(1)).expect("stop");
        assert_eq!(outcome, StopOutcome::AlreadyExited);
    }

    fn wait_for_line(sink: &CollectingSink, expected: &str) {
        for _ in 0..100 {
            if sink
                .lines_of(OutputStream::Stdout)
                .iter()
                .any(|line| line == expected)
            {
                return;
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("line {expected} never arrived");
    }
}
