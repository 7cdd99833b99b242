//! I/O helpers: settings, project files, git, child processes, environments.

pub mod git;
pub mod process;
pub mod project_config;
pub mod projects;
pub mod settings;
pub mod venv;
