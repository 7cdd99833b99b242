//! Background clone and update jobs.
//!
//! Jobs run on the blocking pool and report through [`EventReporter`]. The
//! caller claims the project with [`AppState::begin`] first; the job always
//! releases it and emits a `finished` event.

use anyhow::Result;
use projman::clone::clone_project;
use projman::core::lifecycle::Action;
use projman::core::progress::Reporter;
use projman::io::git::Git;
use projman::io::projects::resolve_existing;
use projman::update::{UpdateOutcome, update_project};
use tracing::{info, warn};

use crate::state::{AppState, UiEvent, run_blocking};

/// Reporter that turns progress into SSE events for one project action.
pub struct EventReporter {
    state: AppState,
    project: String,
    action: Action,
}

impl EventReporter {
    pub fn new(state: &AppState, project: &str, action: Action) -> Self {
        Self {
            state: state.clone(),
            project: project.to_string(),
            action,
        }
    }
}

impl Reporter for EventReporter {
    fn progress(&self, percent: u8) {
        self.state.emit(UiEvent::Progress {
            project: self.project.clone(),
            action: self.action,
            percent,
        });
    }

    fn message(&self, text: &str) {
        self.state.emit(UiEvent::Message {
            project: self.project.clone(),
            action: self.action,
            text: text.to_string(),
        });
    }
}

/// Clone `url` as `name`. `name` must already be claimed for [`Action::Clone`].
pub async fn clone_job(state: AppState, name: String, url: String) {
    let settings = state.settings();
    let provisioner = state.provisioner();
    let reporter = EventReporter::new(&state, &name, Action::Clone);
    let result = run_blocking(move || {
        clone_project(&settings, &url, &*provisioner, &reporter).map(|_| ())
    })
    .await;
    state.finish(&name);
    report_finished(&state, &name, Action::Clone, &result);
}

/// Pull `name` and refresh its dependencies. `name` must already be claimed
/// for [`Action::Update`].
pub async fn update_job(state: AppState, name: String) -> Result<UpdateOutcome> {
    let settings = state.settings();
    let provisioner = state.provisioner();
    let reporter = EventReporter::new(&state, &name, Action::Update);
    let job_name = name.clone();
    let result = run_blocking(move || {
        let project = resolve_existing(&settings.projects_dir, &job_name)?;
        let git = Git::new(&project).with_network_timeout(settings.setup_timeout());
        update_project(&project, &git, &*provisioner, &reporter)
    })
    .await;
    state.finish(&name);
    report_finished(&state, &name, Action::Update, &result);
    result
}

pub(crate) fn report_finished<T>(
    state: &AppState,
    name: &str,
    action: Action,
    result: &Result<T>,
) {
    let error = match result {
        Ok(_) => {
            info!(name, %action, "job finished");
            None
        }
        Err(err) => {
            warn!(name, %action, err = %format!("{err:#}"), "job failed");
            Some(format!("{err:#}"))
        }
    };
    state.emit(UiEvent::Finished {
        project: name.to_string(),
        action,
        ok: error.is_none(),
        error,
    });
}
