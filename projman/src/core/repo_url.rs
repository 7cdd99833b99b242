//! Deriving a project directory name from a repository URL.

use std::path::{Component, Path};

use super::types::Refusal;

/// Derive the project name (checkout directory) for a repository URL.
///
/// Accepts `https://host/owner/repo(.git)`, scp-like `git@host:owner/repo.git`
/// and local paths. Query strings, fragments and trailing slashes are ignored.
pub fn project_name_from_url(url: &str) -> Result<String, Refusal> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Refusal::EmptyUrl);
    }

    let without_fragment = trimmed.split_once('#').map_or(trimmed, |(head, _)| head);
    let without_query = without_fragment
        .split_once('?')
        .map_or(without_fragment, |(head, _)| head);
    let path = without_query.trim_end_matches(['/', '\\']);

    let last = path
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(path)
        .trim();
    let name = last.strip_suffix(".git").unwrap_or(last);

    validate_project_name(name)?;
    Ok(name.to_string())
}

/// Ensure `name` is a single, normal path component usable as a directory.
pub fn validate_project_name(name: &str) -> Result<(), Refusal> {
    let invalid = || Refusal::InvalidName(name.to_string());
    if name.trim().is_empty() || name != name.trim() {
        return Err(invalid());
    }
    if name.contains(['/', '\\', ':']) {
        return Err(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}
