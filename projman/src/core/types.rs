//! Shared deterministic types for projman core logic.
//!
//! These types define stable contracts between core components and the two
//! front ends (CLI and UI server). They must not depend on external state.

use thiserror::Error;

use super::lifecycle::ProjectState;

/// A user action that was refused because a precondition did not hold.
///
/// Refusals are expected outcomes (not failures of the tool itself), so the
/// front ends map them to a dedicated exit code / HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Refusal {
    #[error("repository URL is empty")]
    EmptyUrl,
    #[error("invalid project name '{0}'")]
    InvalidName(String),
    #[error("project {0} already exists")]
    AlreadyExists(String),
    #[error("project {0} not found")]
    NotFound(String),
    #[error("uncommitted changes; commit or discard them before switching")]
    DirtyWorktree,
    #[error("commit {0} not found")]
    UnknownCommit(String),
    #[error("project is pinned to commit {0}; switch to a branch to update")]
    DetachedHead(String),
    #[error("no entry script selected")]
    NoEntryScript,
    #[error("entry script {0} not found")]
    MissingEntryScript(String),
    #[error("entry script {0} is outside the project")]
    ScriptOutsideProject(String),
    #[error("project {name} is busy ({state})")]
    Busy { name: String, state: ProjectState },
    #[error("project {0} is not running")]
    NotRunning(String),
    #[error("pass --yes to confirm deletion of {0}")]
    Unconfirmed(String),
}

impl Refusal {
    /// Whether the refusal is about bad user input rather than project state.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Refusal::EmptyUrl
                | Refusal::InvalidName(_)
                | Refusal::ScriptOutsideProject(_)
                | Refusal::Unconfirmed(_)
        )
    }
}

/// Find a [`Refusal`] anywhere in an error chain.
pub fn find_refusal(err: &anyhow::Error) -> Option<&Refusal> {
    err.chain().find_map(|cause| cause.downcast_ref::<Refusal>())
}
