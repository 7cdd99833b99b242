//! Shared application state for the UI server.
//!
//! Holds the settings, the per-project lifecycle registry, running sessions
//! and their retained output. Every handler and background job goes through
//! [`AppState::begin`] / [`AppState::finish`] so that at most one action
//! touches a project at a time.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use projman::core::lifecycle::{Action, ProjectState, transition};
use projman::core::types::Refusal;
use projman::io::process::{OutputSink, OutputStream, StopOutcome};
use projman::io::projects::{is_project_dir, project_path};
use projman::io::settings::Settings;
use projman::io::venv::{Provisioner, VenvProvisioner};
use projman::run::{RunHandle, start_project};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events broadcast to SSE clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Progress {
        project: String,
        action: Action,
        percent: u8,
    },
    Message {
        project: String,
        action: Action,
        text: String,
    },
    Finished {
        project: String,
        action: Action,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Output {
        project: String,
        stream: OutputStream,
        line: String,
    },
    Exited {
        project: String,
        code: Option<i32>,
    },
    ProjectsChanged,
}

impl UiEvent {
    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            UiEvent::Progress { .. } => "progress",
            UiEvent::Message { .. } => "message",
            UiEvent::Finished { .. } => "finished",
            UiEvent::Output { .. } => "output",
            UiEvent::Exited { .. } => "exited",
            UiEvent::ProjectsChanged => "projects_changed",
        }
    }
}

/// One retained line of run output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

struct Session {
    handle: Arc<RunHandle>,
    /// Start order, for stopping the most recent session.
    seq: u64,
}

#[derive(Default)]
struct Registry {
    /// Non-idle projects only; idle is derived from the projects directory.
    states: HashMap<String, ProjectState>,
    sessions: HashMap<String, Session>,
    history: HashMap<String, VecDeque<OutputLine>>,
    next_seq: u64,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Settings file, rewritten by `PUT /api/settings`.
    pub settings_path: PathBuf,
    settings: Arc<RwLock<Settings>>,
    /// Broadcast sender for UI events.
    pub event_tx: Arc<broadcast::Sender<UiEvent>>,
    registry: Arc<Mutex<Registry>>,
    /// Replaces the settings-driven provisioner when set.
    provisioner: Option<Arc<dyn Provisioner + Send + Sync>>,
}

impl AppState {
    pub fn new(settings_path: PathBuf, settings: Settings) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            settings_path,
            settings: Arc::new(RwLock::new(settings)),
            event_tx: Arc::new(event_tx),
            registry: Arc::new(Mutex::new(Registry::default())),
            provisioner: None,
        }
    }

    /// Use `provisioner` for every environment instead of the configured
    /// interpreter.
    #[cfg(test)]
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner + Send + Sync>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Provisioner for clone and update jobs, built from current settings.
    pub fn provisioner(&self) -> Arc<dyn Provisioner + Send + Sync> {
        match &self.provisioner {
            Some(provisioner) => Arc::clone(provisioner),
            None => {
                let settings = self.settings();
                let timeout = settings.setup_timeout();
                Arc::new(VenvProvisioner::new(settings.python, timeout))
            }
        }
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace_settings(&self, settings: Settings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
        self.emit(UiEvent::ProjectsChanged);
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.settings().projects_dir
    }

    /// Broadcast to SSE clients; no subscribers is fine.
    pub fn emit(&self, event: UiEvent) {
        let _ = self.event_tx.send(event);
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_state(&self, registry: &Registry, name: &str) -> Option<ProjectState> {
        if let Some(state) = registry.states.get(name) {
            return Some(*state);
        }
        let path = self.projects_dir().join(name);
        is_project_dir(&path).then_some(ProjectState::Idle)
    }

    /// Lifecycle state of `name`, `None` when absent.
    pub fn project_state(&self, name: &str) -> Option<ProjectState> {
        let registry = self.registry();
        self.current_state(&registry, name)
    }

    /// Projects that are mid-action (not idle), including ones still cloning.
    pub fn busy_projects(&self) -> Vec<(String, ProjectState)> {
        let mut busy: Vec<_> = self
            .registry()
            .states
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect();
        busy.sort_by(|a, b| a.0.cmp(&b.0));
        busy
    }

    /// Claim `name` for `action`, or refuse.
    pub fn begin(&self, name: &str, action: Action) -> Result<ProjectState, Refusal> {
        project_path(&self.projects_dir(), name)?;
        let next = {
            let mut registry = self.registry();
            let current = self.current_state(&registry, name);
            let next = transition(name, current, action)?;
            store_state(&mut registry, name, next);
            next
        };
        debug!(name, %action, state = ?next, "project claimed");
        self.emit(UiEvent::ProjectsChanged);
        Ok(next.unwrap_or(ProjectState::Idle))
    }

    /// Release `name` after its action ended (successfully or not).
    pub fn finish(&self, name: &str) {
        {
            let mut registry = self.registry();
            let current = self.current_state(&registry, name);
            match transition(name, current, Action::Finish) {
                Ok(next) => store_state(&mut registry, name, next),
                Err(err) => warn!(name, err = %err, "unexpected finish"),
            }
        }
        self.emit(UiEvent::ProjectsChanged);
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.registry().sessions.contains_key(name)
    }

    /// Start `script` for `name` and register the session.
    ///
    /// The registry lock is held across the spawn so output and exit
    /// callbacks always observe the registered session.
    pub fn start_session(&self, name: &str, project: &Path, script: &Path) -> Result<u32> {
        let mut registry = self.registry();
        registry.history.remove(name);
        let sink = Arc::new(SessionSink {
            state: self.clone(),
            project: name.to_string(),
        });
        let handle = start_project(project, script, sink)?;
        let pid = handle.pid();
        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.sessions.insert(
            name.to_string(),
            Session {
                handle: Arc::new(handle),
                seq,
            },
        );
        info!(name, pid, "session started");
        Ok(pid)
    }

    fn record_output(&self, name: &str, stream: OutputStream, line: &str) {
        let limit = self.settings().output_history_lines;
        {
            let mut registry = self.registry();
            let history = registry.history.entry(name.to_string()).or_default();
            history.push_back(OutputLine {
                stream,
                line: line.to_string(),
            });
            while history.len() > limit {
                history.pop_front();
            }
        }
        self.emit(UiEvent::Output {
            project: name.to_string(),
            stream,
            line: line.to_string(),
        });
    }

    fn session_exited(&self, name: &str, code: Option<i32>) {
        self.registry().sessions.remove(name);
        info!(name, code = ?code, "session exited");
        self.emit(UiEvent::Exited {
            project: name.to_string(),
            code,
        });
        self.finish(name);
    }

    /// Retained output of the latest run of `name`.
    pub fn output(&self, name: &str) -> Vec<OutputLine> {
        self.registry()
            .history
            .get(name)
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Name of the most recently started running project.
    pub fn last_started(&self) -> Option<String> {
        self.registry()
            .sessions
            .iter()
            .max_by_key(|(_, session)| session.seq)
            .map(|(name, _)| name.clone())
    }

    /// Stop the running session of `name` (terminate, then kill after `grace`).
    pub async fn stop(&self, name: &str, grace: Duration) -> Result<StopOutcome> {
        let handle = {
            let registry = self.registry();
            let current = self.current_state(&registry, name);
            transition(name, current, Action::Stop)?;
            registry
                .sessions
                .get(name)
                .map(|session| Arc::clone(&session.handle))
                .ok_or_else(|| Refusal::NotRunning(name.to_string()))?
        };
        let outcome = tokio::task::spawn_blocking(move || handle.stop(grace))
            .await
            .context("join stop task")??;
        info!(name, ?outcome, "session stopped");
        Ok(outcome)
    }

    /// Stop every running session; used on shutdown.
    pub async fn stop_all(&self, grace: Duration) {
        let handles: Vec<(String, Arc<RunHandle>)> = self
            .registry()
            .sessions
            .iter()
            .map(|(name, session)| (name.clone(), Arc::clone(&session.handle)))
            .collect();
        let mut tasks = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            tasks.push(tokio::task::spawn_blocking(move || {
                (name, handle.stop(grace))
            }));
        }
        for task in tasks {
            match task.await {
                Ok((name, Ok(outcome))) => info!(name = %name, ?outcome, "stopped on shutdown"),
                Ok((name, Err(err))) => {
                    warn!(name = %name, err = %format!("{err:#}"), "stop on shutdown failed");
                }
                Err(err) => warn!(err = %err, "stop task panicked"),
            }
        }
    }
}

fn store_state(registry: &mut Registry, name: &str, next: Option<ProjectState>) {
    match next {
        Some(state) if state.is_busy() => {
            registry.states.insert(name.to_string(), state);
        }
        _ => {
            registry.states.remove(name);
        }
    }
}

/// Forwards a session's output into the registry and the event stream.
struct SessionSink {
    state: AppState,
    project: String,
}

impl OutputSink for SessionSink {
    fn line(&self, stream: OutputStream, line: &str) {
        self.state.record_output(&self.project, stream, line);
    }

    fn finished(&self, exit_code: Option<i32>) {
        self.state.session_exited(&self.project, exit_code);
    }
}

/// Join a blocking job, folding a panic into an error.
pub async fn run_blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| anyhow!("background task failed: {err}"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use projman::test_support::TestRepo;

    fn state_for(repo: &TestRepo) -> AppState {
        AppState::new(
            repo.projects_dir.with_file_name("settings.toml"),
            repo.settings(),
        )
    }

    #[test]
    fn existing_checkout_is_idle_and_absent_is_none() {
        let repo = TestRepo::new().expect("repo");
        repo.clone_plain().expect("clone");
        let state = state_for(&repo);

        assert_eq!(state.project_state("demo"), Some(ProjectState::Idle));
        assert_eq!(state.project_state("ghost"), None);
    }

    #[test]
    fn busy_project_refuses_second_action() {
        let repo = TestRepo::new().expect("repo");
        repo.clone_plain().expect("clone");
        let state = state_for(&repo);

        assert_eq!(
            state.begin("demo", Action::Update),
            Ok(ProjectState::Updating)
        );
        assert_eq!(
            state.begin("demo", Action::Delete),
            Err(Refusal::Busy {
                name: "demo".to_string(),
                state: ProjectState::Updating
            })
        );
        assert_eq!(
            state.busy_projects(),
            vec![("demo".to_string(), ProjectState::Updating)]
        );

        state.finish("demo");
        assert_eq!(state.project_state("demo"), Some(ProjectState::Idle));
        assert!(state.busy_projects().is_empty());
    }

    #[test]
    fn clone_claims_name_until_finished() {
        let repo = TestRepo::new().expect("repo");
        let state = state_for(&repo);

        assert_eq!(state.begin("demo", Action::Clone), Ok(ProjectState::Cloning));
        assert!(matches!(
            state.begin("demo", Action::Clone),
            Err(Refusal::AlreadyExists(_))
        ));
        // Nothing on disk: a failed clone leaves the name free again.
        state.finish("demo");
        assert_eq!(state.project_state("demo"), None);
    }

    #[test]
    fn invalid_names_are_refused() {
        let repo = TestRepo::new().expect("repo");
        let state = state_for(&repo);
        assert!(matches!(
            state.begin("../escape", Action::Update),
            Err(Refusal::InvalidName(_))
        ));
    }

    #[test]
    fn stop_without_session_is_refused() {
        let repo = TestRepo::new().expect("repo");
        repo.clone_plain().expect("clone");
        let state = state_for(&repo);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        let err = runtime
            .block_on(state.stop("demo", Duration::from_secs(1)))
            .unwrap_err();
        assert!(err.to_string().contains("not running"));
    }

    #[test]
    fn history_is_capped() {
        let repo = TestRepo::new().expect("repo");
        let mut settings = repo.settings();
        settings.output_history_lines = 2;
        let state = AppState::new(PathBuf::from("settings.toml"), settings);

        for line in ["a", "b", "c"] {
            state.record_output("demo", OutputStream::Stdout, line);
        }
        let kept: Vec<String> = state.output("demo").into_iter().map(|l| l.line).collect();
        assert_eq!(kept, vec!["b", "c"]);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = UiEvent::Progress {
            project: "demo".to_string(),
            action: Action::Clone,
            percent: 35,
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "type": "progress",
                "project": "demo",
                "action": "clone",
                "percent": 35
            })
        );
        assert_eq!(event.kind(), "progress");
        assert_eq!(
            serde_json::to_value(UiEvent::ProjectsChanged).expect("json"),
            serde_json::json!({ "type": "projects_changed" })
        );
    }
}
