//! HTTP route handlers for the UI API.

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use projman::core::commits::CommitSummary;
use projman::core::lifecycle::{Action, ProjectState};
use projman::core::repo_url::project_name_from_url;
use projman::core::types::{Refusal, find_refusal};
use projman::delete::delete_project;
use projman::io::git::Git;
use projman::io::process::StopOutcome;
use projman::io::projects::{describe_project, list_projects, project_path, resolve_existing};
use projman::io::settings::{Settings, set_projects_dir, set_python};
use projman::run::resolve_entry_script;
use projman::switch::{list_commits, switch_commit};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::jobs::{clone_job, report_finished, update_job};
use crate::state::{AppState, OutputLine, run_blocking};

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/projects", get(get_projects).post(create_project))
        .route("/projects/{name}", axum::routing::delete(remove_project))
        .route("/projects/{name}/update", post(update_project))
        .route("/projects/{name}/commits", get(get_commits))
        .route("/projects/{name}/switch", post(switch_project))
        .route("/projects/{name}/run", post(run_project))
        .route("/projects/{name}/stop", post(stop_project))
        .route("/projects/{name}/output", get(get_output))
        .route("/stop-last", post(stop_last))
}

/// Error body `{ "error": "..." }` with a status derived from the cause.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn status_for(err: &anyhow::Error) -> StatusCode {
    match find_refusal(err) {
        Some(Refusal::NotFound(_)) => StatusCode::NOT_FOUND,
        Some(refusal) if refusal.is_invalid_input() => StatusCode::BAD_REQUEST,
        Some(_) => StatusCode::CONFLICT,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: status_for(&err),
            message: format!("{err:#}"),
        }
    }
}

impl From<Refusal> for ApiError {
    fn from(refusal: Refusal) -> Self {
        anyhow::Error::from(refusal).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, err = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn health() -> &'static str {
    "ok"
}

/// GET /api/settings
async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings())
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    projects_dir: Option<std::path::PathBuf>,
    python: Option<String>,
}

/// PUT /api/settings - change the projects directory and/or interpreter.
async fn put_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<Settings>> {
    if update.projects_dir.is_none() && update.python.is_none() {
        return Err(ApiError::bad_request("nothing to update"));
    }
    if update
        .projects_dir
        .as_ref()
        .is_some_and(|dir| dir.as_os_str().is_empty())
    {
        return Err(ApiError::bad_request("projects_dir must not be empty"));
    }
    if update
        .python
        .as_ref()
        .is_some_and(|python| python.trim().is_empty())
    {
        return Err(ApiError::bad_request("python must not be empty"));
    }

    let mut settings = state.settings();
    let path = state.settings_path.clone();
    let settings = run_blocking(move || {
        if let Some(dir) = update.projects_dir {
            set_projects_dir(&path, &mut settings, &dir)?;
        }
        if let Some(python) = update.python {
            set_python(&path, &mut settings, &python)?;
        }
        Ok(settings)
    })
    .await?;
    state.replace_settings(settings.clone());
    Ok(Json(settings))
}

#[derive(Debug, Serialize)]
struct ProjectRow {
    name: String,
    state: ProjectState,
    running: bool,
    run_file: Option<String>,
    head: Option<String>,
    branch: Option<String>,
    has_env: bool,
}

/// GET /api/projects - checkouts on disk plus projects still being cloned.
async fn get_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<ProjectRow>>> {
    let job_state = state.clone();
    let rows = run_blocking(move || {
        let projects_dir = job_state.projects_dir();
        let mut rows = Vec::new();
        for name in list_projects(&projects_dir)? {
            let info = describe_project(&projects_dir, &name)?;
            rows.push(ProjectRow {
                state: job_state
                    .project_state(&name)
                    .unwrap_or(ProjectState::Idle),
                running: job_state.is_running(&name),
                name,
                run_file: info.run_file,
                head: info.head,
                branch: info.branch,
                has_env: info.has_env,
            });
        }
        for (name, project_state) in job_state.busy_projects() {
            if rows.iter().any(|row| row.name == name) {
                continue;
            }
            rows.push(ProjectRow {
                name,
                state: project_state,
                running: false,
                run_file: None,
                head: None,
                branch: None,
                has_env: false,
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    })
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
struct CloneRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct Accepted {
    project: String,
}

/// POST /api/projects - clone in the background.
async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CloneRequest>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let name = project_name_from_url(&request.url)?;
    state.begin(&name, Action::Clone)?;
    tokio::spawn(clone_job(state.clone(), name.clone(), request.url));
    Ok((StatusCode::ACCEPTED, Json(Accepted { project: name })))
}

/// POST /api/projects/{name}/update - pull in the background.
async fn update_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    state.begin(&name, Action::Update)?;
    let job_state = state.clone();
    let job_name = name.clone();
    tokio::spawn(async move {
        // Outcome is reported through the `finished` event.
        let _ = update_job(job_state, job_name).await;
    });
    Ok((StatusCode::ACCEPTED, Json(Accepted { project: name })))
}

#[derive(Debug, Deserialize)]
struct CommitsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CommitsResponse {
    head: Option<String>,
    commits: Vec<CommitSummary>,
}

/// GET /api/projects/{name}/commits?limit=N
async fn get_commits(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CommitsQuery>,
) -> ApiResult<Json<CommitsResponse>> {
    let settings = state.settings();
    let project = resolve_existing(&settings.projects_dir, &name)?;
    let limit = query.limit.unwrap_or(settings.commit_limit);
    let response = run_blocking(move || {
        let git = Git::new(&project);
        let commits = list_commits(&project, &git, limit)?;
        Ok(CommitsResponse {
            head: git.head_sha().ok(),
            commits,
        })
    })
    .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SwitchRequest {
    rev: String,
}

#[derive(Debug, Serialize)]
struct SwitchResponse {
    from: String,
    to: String,
    branch: Option<String>,
}

/// POST /api/projects/{name}/switch
async fn switch_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SwitchRequest>,
) -> ApiResult<Json<SwitchResponse>> {
    let project = resolve_existing(&state.projects_dir(), &name)?;
    state.begin(&name, Action::Switch)?;
    let result = run_blocking(move || switch_commit(&Git::new(&project), &request.rev)).await;
    state.finish(&name);
    report_finished(&state, &name, Action::Switch, &result);
    let outcome = result?;
    Ok(Json(SwitchResponse {
        from: outcome.from,
        to: outcome.to,
        branch: outcome.branch,
    }))
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    run_file: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunStarted {
    project: String,
    pid: u32,
    script: String,
}

/// POST /api/projects/{name}/run - start the entry script.
async fn run_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
    request: Option<Json<RunRequest>>,
) -> ApiResult<(StatusCode, Json<RunStarted>)> {
    let run_file = request.and_then(|Json(request)| request.run_file);
    let project = resolve_existing(&state.projects_dir(), &name)?;
    state.begin(&name, Action::Run)?;

    let job_state = state.clone();
    let job_name = name.clone();
    let result = run_blocking(move || {
        let choice = run_file.as_deref().map(std::path::Path::new);
        let script = resolve_entry_script(&project, choice)?;
        let pid = job_state.start_session(&job_name, &project, &script)?;
        Ok((pid, script.display().to_string()))
    })
    .await;

    match result {
        Ok((pid, script)) => Ok((
            StatusCode::ACCEPTED,
            Json(RunStarted {
                project: name,
                pid,
                script,
            }),
        )),
        Err(err) => {
            state.finish(&name);
            Err(err.into())
        }
    }
}

#[derive(Debug, Serialize)]
struct StopResponse {
    project: Option<String>,
    outcome: Option<StopOutcome>,
}

/// POST /api/projects/{name}/stop
async fn stop_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<StopResponse>> {
    project_path(&state.projects_dir(), &name)?;
    let grace = state.settings().stop_timeout();
    let outcome = state.stop(&name, grace).await?;
    Ok(Json(StopResponse {
        project: Some(name),
        outcome: Some(outcome),
    }))
}

/// POST /api/stop-last - stop the most recently started running project.
async fn stop_last(State(state): State<AppState>) -> ApiResult<Json<StopResponse>> {
    let Some(name) = state.last_started() else {
        return Ok(Json(StopResponse {
            project: None,
            outcome: None,
        }));
    };
    let grace = state.settings().stop_timeout();
    let outcome = state.stop(&name, grace).await?;
    Ok(Json(StopResponse {
        project: Some(name),
        outcome: Some(outcome),
    }))
}

/// GET /api/projects/{name}/output - retained lines of the latest run.
async fn get_output(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<OutputLine>>> {
    project_path(&state.projects_dir(), &name)?;
    Ok(Json(state.output(&name)))
}

/// DELETE /api/projects/{name}
async fn remove_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.begin(&name, Action::Delete)?;
    let projects_dir = state.projects_dir();
    let job_name = name.clone();
    let result = run_blocking(move || delete_project(&projects_dir, &job_name)).await;
    state.finish(&name);
    report_finished(&state, &name, Action::Delete, &result);
    result?;
    Ok(StatusCode::NO_CONTENT)
}
