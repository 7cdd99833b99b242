//! Project lifecycle state machine.
//!
//! A project is either absent (`None`) or in one [`ProjectState`]. Every user
//! action is checked against the current state before any work is spawned, so
//! at most one action touches a project directory at a time:
//!
//! ```text
//! None --Clone--> Cloning --Finish--> Idle
//! Idle --Update|Switch|Run|Delete--> Updating|Switching|Running|Deleting
//! Running --Stop--> Running (the child exits later, then Finish)
//! Deleting --Finish--> None
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::Refusal;

/// Observable state of a tracked project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Idle,
    Cloning,
    Updating,
    Switching,
    Running,
    Deleting,
}

impl ProjectState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectState::Idle => "idle",
            ProjectState::Cloning => "cloning",
            ProjectState::Updating => "updating",
            ProjectState::Switching => "switching",
            ProjectState::Running => "running",
            ProjectState::Deleting => "deleting",
        }
    }

    pub fn is_busy(self) -> bool {
        self != ProjectState::Idle
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-visible actions plus the internal `Finish` event sent when work ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Clone,
    Update,
    Switch,
    Run,
    Stop,
    Delete,
    Finish,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Clone => "clone",
            Action::Update => "update",
            Action::Switch => "switch",
            Action::Run => "run",
            Action::Stop => "stop",
            Action::Delete => "delete",
            Action::Finish => "finish",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply `action` to a project currently in `current` (`None` = absent).
///
/// Returns the next state, or the [`Refusal`] to show the user.
pub fn transition(
    name: &str,
    current: Option<ProjectState>,
    action: Action,
) -> Result<Option<ProjectState>, Refusal> {
    use ProjectState::{Cloning, Deleting, Idle, Running, Switching, Updating};

    match (current, action) {
        (None, Action::Clone) => Ok(Some(Cloning)),
        (None, Action::Finish) => Ok(None),
        (None, _) => Err(Refusal::NotFound(name.to_string())),

        (Some(_), Action::Clone) => Err(Refusal::AlreadyExists(name.to_string())),

        (Some(Idle), Action::Update) => Ok(Some(Updating)),
        (Some(Idle), Action::Switch) => Ok(Some(Switching)),
        (Some(Idle), Action::Run) => Ok(Some(Running)),
        (Some(Idle), Action::Delete) => Ok(Some(Deleting)),
        (Some(Idle), Action::Stop) => Err(Refusal::NotRunning(name.to_string())),
        (Some(Idle), Action::Finish) => Ok(Some(Idle)),

        (Some(Running), Action::Stop) => Ok(Some(Running)),
        (Some(Deleting), Action::Finish) => Ok(None),
        (Some(_), Action::Finish) => Ok(Some(Idle)),

        (Some(state), Action::Stop) => Err(Refusal::NotRunning(format!("{name} ({state})"))),
        (Some(state), _) => Err(Refusal::Busy {
            name: name.to_string(),
            state,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_only_from_absent() {
        assert_eq!(
            transition("demo", None, Action::Clone),
            Ok(Some(ProjectState::Cloning))
        );
        assert_eq!(
            transition("demo", Some(ProjectState::Idle), Action::Clone),
            Err(Refusal::AlreadyExists("demo".to_string()))
        );
    }

    #[test]
    fn idle_accepts_every_user_action_but_stop() {
        let cases = [
            (Action::Update, ProjectState::Updating),
            (Action::Switch, ProjectState::Switching),
            (Action::Run, ProjectState::Running),
            (Action::Delete, ProjectState::Deleting),
        ];
        for (action, expected) in cases {
            assert_eq!(
                transition("demo", Some(ProjectState::Idle), action),
                Ok(Some(expected)),
                "{action}"
            );
        }
        assert_eq!(
            transition("demo", Some(ProjectState::Idle), Action::Stop),
            Err(Refusal::NotRunning("demo".to_string()))
        );
    }

    #[test]
    fn busy_project_refuses_other_actions() {
        let err = transition("demo", Some(ProjectState::Running), Action::Delete).unwrap_err();
        assert_eq!(
            err,
            Refusal::Busy {
                name: "demo".to_string(),
                state: ProjectState::Running
            }
        );
        assert!(transition("demo", Some(ProjectState::Cloning), Action::Run).is_err());
        assert!(transition("demo", Some(ProjectState::Updating), Action::Update).is_err());
    }

    #[test]
    fn stop_keeps_running_until_finish() {
        assert_eq!(
            transition("demo", Some(ProjectState::Running), Action::Stop),
            Ok(Some(ProjectState::Running))
        );
        assert_eq!(
            transition("demo", Some(ProjectState::Running), Action::Finish),
            Ok(Some(ProjectState::Idle))
        );
    }

    #[test]
    fn finishing_delete_removes_project() {
        assert_eq!(
            transition("demo", Some(ProjectState::Deleting), Action::Finish),
            Ok(None)
        );
    }

    #[test]
    fn absent_project_is_not_found() {
        assert_eq!(
            transition("ghost", None, Action::Run),
            Err(Refusal::NotFound("ghost".to_string()))
        );
    }
}
