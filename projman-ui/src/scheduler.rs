//! Periodic automatic update of every project.

use std::time::Duration;

use projman::core::lifecycle::Action;
use projman::io::projects::list_projects;
use tracing::{debug, info, warn};

use crate::jobs::update_job;
use crate::state::AppState;

/// How often to re-check settings while auto-update is disabled.
const DISABLED_RECHECK: Duration = Duration::from_secs(60);

/// Start the auto-update loop in a background task.
pub fn start_autoupdate(state: AppState) {
    tokio::spawn(async move {
        run_autoupdate(state).await;
    });
}

/// First pass immediately, then one pass per configured interval.
async fn run_autoupdate(state: AppState) {
    loop {
        let Some(interval) = state.settings().autoupdate_interval() else {
            debug!("auto-update disabled");
            tokio::time::sleep(DISABLED_RECHECK).await;
            continue;
        };
        let updated = autoupdate_pass(&state).await;
        info!(updated, next_in_secs = interval.as_secs(), "auto-update pass done");
        tokio::time::sleep(interval).await;
    }
}

/// Update every idle project, one at a time. Busy or running projects are
/// skipped. Returns how many projects were updated successfully.
pub async fn autoupdate_pass(state: &AppState) -> usize {
    let names = match list_projects(&state.projects_dir()) {
        Ok(names) => names,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "auto-update could not list projects");
            return 0;
        }
    };

    let mut updated = 0;
    for name in names {
        if let Err(refusal) = state.begin(&name, Action::Update) {
            debug!(name = %name, reason = %refusal, "auto-update skipped");
            continue;
        }
        if update_job(state.clone(), name).await.is_ok() {
            updated += 1;
        }
    }
    updated
}
