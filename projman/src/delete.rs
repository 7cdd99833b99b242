//! Removing a project checkout.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::io::projects::resolve_existing;

/// Remove project `name` (checkout, environment and config) from disk.
pub fn delete_project(projects_dir: &Path, name: &str) -> Result<PathBuf> {
    let path = resolve_existing(projects_dir, name)?;
    fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
    info!(name, path = %path.display(), "project deleted");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Refusal, find_refusal};

    #[test]
    fn deletes_project_tree() {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("demo");
        fs::create_dir_all(project.join(".git")).expect("mkdir");
        fs::create_dir_all(project.join("venv").join("bin")).expect("mkdir");

        let removed = delete_project(temp.path(), "demo").expect("delete");
        assert_eq!(removed, project);
        assert!(!project.exists());
    }

    #[test]
    fn unknown_project_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = delete_project(temp.path(), "ghost").unwrap_err();
        assert_eq!(
            find_refusal(&err),
            Some(&Refusal::NotFound("ghost".to_string()))
        );
    }

    #[test]
    fn plain_directory_is_not_a_project() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("loose")).expect("mkdir");
        assert!(delete_project(temp.path(), "loose").is_err());
        assert!(temp.path().join("loose").exists());
    }
}
