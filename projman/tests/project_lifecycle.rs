//! Lifecycle tests against real git repositories in temp directories.
//!
//! Each test builds an upstream repository with `TestRepo`, then drives the
//! orchestration functions (clone, update, switch, run) the way the CLI and
//! the UI server do. Environment provisioning is faked.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use projman::clone::clone_project;
use projman::core::types::{Refusal, find_refusal};
use projman::io::git::Git;
use projman::io::project_config::load_project_config;
use projman::io::venv::Provisioner;
use projman::switch::{list_commits, switch_commit};
use projman::test_support::{FakeProvisioner, RecordingReporter, TestRepo, run_git};
use projman::update::{update_all, update_project};

#[test]
fn clone_reports_stages_and_provisions_env() {
    let repo = TestRepo::new().expect("repo");
    let provisioner = FakeProvisioner::default();
    let reporter = RecordingReporter::default();

    let outcome = clone_project(&repo.settings(), &repo.url(), &provisioner, &reporter)
        .expect("clone");

    assert_eq!(outcome.name, "demo");
    assert_eq!(outcome.path, repo.projects_dir.join("demo"));
    assert!(outcome.path.join("app.py").is_file());
    assert!(!outcome.dependencies_installed);
    assert_eq!(reporter.progress(), vec![0, 35, 100]);
    assert_eq!(provisioner.calls(), vec!["create_env demo".to_string()]);
    assert_eq!(
        reporter.messages().last().map(String::as_str),
        Some("demo is ready")
    );
}

#[test]
fn clone_installs_requirements_when_present() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("requirements.txt", "requests\n", "add deps")
        .expect("commit");
    let provisioner = FakeProvisioner::default();

    let outcome = clone_project(
        &repo.settings(),
        &repo.url(),
        &provisioner,
        &RecordingReporter::default(),
    )
    .expect("clone");

    assert!(outcome.dependencies_installed);
    assert_eq!(
        provisioner.calls(),
        vec![
            "create_env demo".to_string(),
            "install_requirements demo".to_string()
        ]
    );
}

#[test]
fn clone_into_existing_name_is_refused() {
    let repo = TestRepo::new().expect("repo");
    repo.clone_plain().expect("first clone");

    let err = clone_project(
        &repo.settings(),
        &repo.url(),
        &FakeProvisioner::default(),
        &RecordingReporter::default(),
    )
    .unwrap_err();
    assert_eq!(
        find_refusal(&err),
        Some(&Refusal::AlreadyExists("demo".to_string()))
    );
}

#[test]
fn empty_url_is_refused_before_any_work() {
    let repo = TestRepo::new().expect("repo");
    let reporter = RecordingReporter::default();
    let err = clone_project(
        &repo.settings(),
        "   ",
        &FakeProvisioner::default(),
        &reporter,
    )
    .unwrap_err();
    assert_eq!(find_refusal(&err), Some(&Refusal::EmptyUrl));
    assert!(reporter.progress().is_empty());
}

#[test]
fn failed_clone_leaves_no_directory() {
    let repo = TestRepo::new().expect("repo");
    let missing = repo.upstream.with_file_name("missing");

    let err = clone_project(
        &repo.settings(),
        &missing.to_string_lossy(),
        &FakeProvisioner::default(),
        &RecordingReporter::default(),
    )
    .unwrap_err();
    assert!(find_refusal(&err).is_none());
    assert!(!repo.projects_dir.join("missing").exists());
}

#[test]
fn failed_env_setup_keeps_checkout() {
    let repo = TestRepo::new().expect("repo");
    let err = clone_project(
        &repo.settings(),
        &repo.url(),
        &FakeProvisioner::failing(),
        &RecordingReporter::default(),
    )
    .unwrap_err();
    assert!(format!("{err:#}").contains("python executable not found"));
    assert!(repo.projects_dir.join("demo").join(".git").exists());
}

#[test]
fn update_pulls_new_commits_and_creates_missing_env() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.clone_plain().expect("clone");
    let new_head = repo
        .commit_file("app.py", "print('v2')\n", "second")
        .expect("commit");
    let provisioner = FakeProvisioner::default();
    let reporter = RecordingReporter::default();

    let outcome =
        update_project(&project, &Git::new(&project), &provisioner, &reporter).expect("update");

    assert!(outcome.changed());
    assert_eq!(outcome.head, new_head);
    assert!(outcome.env_created);
    assert_eq!(reporter.progress(), vec![0, 50, 100]);
    assert_eq!(
        fs::read_to_string(project.join("app.py")).expect("read"),
        "print('v2')\n"
    );
}

#[test]
fn update_reinstalls_requirements_into_existing_env() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.clone_plain().expect("clone");
    let provisioner = FakeProvisioner::default();
    provisioner.create_env(&project).expect("env");
    repo.commit_file("requirements.txt", "flask\n", "deps")
        .expect("commit");

    let outcome = update_project(
        &project,
        &Git::new(&project),
        &provisioner,
        &RecordingReporter::default(),
    )
    .expect("update");

    assert!(!outcome.env_created);
    assert!(outcome.dependencies_installed);
    assert_eq!(
        provisioner.calls().last().map(String::as_str),
        Some("install_requirements demo")
    );
}

#[test]
fn update_on_detached_head_is_refused() {
    let repo = TestRepo::new().expect("repo");
    let first = run_git(&repo.upstream, &["rev-parse", "HEAD"]).expect("sha");
    repo.commit_file("app.py", "print('v2')\n", "second")
        .expect("commit");
    let project = repo.clone_plain().expect("clone");
    let git = Git::new(&project);
    switch_commit(&git, first.trim()).expect("switch");

    let err = update_project(
        &project,
        &git,
        &FakeProvisioner::default(),
        &RecordingReporter::default(),
    )
    .unwrap_err();
    assert!(matches!(find_refusal(&err), Some(Refusal::DetachedHead(_))));
}

#[test]
fn update_all_skips_busy_projects() {
    let repo = TestRepo::new().expect("repo");
    repo.clone_plain().expect("clone");
    let provisioner = FakeProvisioner::default();
    let reporter = RecordingReporter::default();

    let busy = HashSet::from(["demo".to_string()]);
    let skipped = update_all(
        &repo.projects_dir,
        |path| Git::new(path),
        &provisioner,
        &reporter,
        &busy,
    )
    .expect("all");
    assert!(skipped.is_empty());

    let results = update_all(
        &repo.projects_dir,
        |path| Git::new(path),
        &provisioner,
        &reporter,
        &HashSet::new(),
    )
    .expect("all");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "demo");
    assert!(results[0].1.is_ok());
}

#[test]
fn switch_refuses_dirty_worktree() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.clone_plain().expect("clone");
    fs::write(project.join("app.py"), "print('local edit')\n").expect("edit");

    let err = switch_commit(&Git::new(&project), "HEAD").unwrap_err();
    assert_eq!(find_refusal(&err), Some(&Refusal::DirtyWorktree));
}

#[test]
fn switch_ignores_untracked_files() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.clone_plain().expect("clone");
    fs::write(project.join("notes.txt"), "scratch\n").expect("write");

    let outcome = switch_commit(&Git::new(&project), "main").expect("switch");
    assert_eq!(outcome.branch.as_deref(), Some("main"));
}

#[test]
fn switch_to_unknown_commit_is_refused() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.clone_plain().expect("clone");

    let err = switch_commit(&Git::new(&project), "deadbeefdeadbeef").unwrap_err();
    assert!(matches!(find_refusal(&err), Some(Refusal::UnknownCommit(_))));
}

#[test]
fn switch_detaches_then_reattaches_by_branch_name() {
    let repo = TestRepo::new().expect("repo");
    let first = run_git(&repo.upstream, &["rev-parse", "HEAD"]).expect("sha");
    let first = first.trim();
    let second = repo
        .commit_file("app.py", "print('v2')\n", "second")
        .expect("commit");
    let project = repo.clone_plain().expect("clone");
    let git = Git::new(&project);

    let outcome = switch_commit(&git, &first[..7]).expect("switch to old");
    assert_eq!(outcome.to, first);
    assert_eq!(outcome.from, second);
    assert_eq!(outcome.branch, None);
    assert_eq!(git.current_branch().expect("branch"), None);

    let back = switch_commit(&git, "main").expect("switch back");
    assert_eq!(back.branch.as_deref(), Some("main"));
    assert_eq!(git.head_sha().expect("head"), second);
}

#[test]
fn commit_list_is_newest_first_and_cached() {
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("app.py", "print('v2')\n", "second")
        .expect("commit");
    repo.commit_file("app.py", "print('v3')\n", "third")
        .expect("commit");
    let project = repo.clone_plain().expect("clone");
    let git = Git::new(&project);

    let commits = list_commits(&project, &git, 100).expect("list");
    let subjects: Vec<&str> = commits.iter().map(|c| c.subject.as_str()).collect();
    assert_eq!(subjects, vec!["third", "second", "initial"]);

    let cached = load_project_config(&project)
        .expect("config")
        .commits
        .expect("cached commits");
    assert_eq!(cached, commits);
}

#[test]
fn commit_list_still_shows_newer_commits_after_switching_back() {
    let repo = TestRepo::new().expect("repo");
    let first = run_git(&repo.upstream, &["rev-parse", "HEAD"]).expect("sha");
    repo.commit_file("app.py", "print('v2')\n", "second")
        .expect("commit");
    let project = repo.clone_plain().expect("clone");
    let git = Git::new(&project);
    switch_commit(&git, first.trim()).expect("switch");

    let commits = list_commits(&project, &git, 1).expect("list");
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].subject, "second");
}

#[test]
fn config_cache_does_not_dirty_worktree() {
    let repo = TestRepo::new().expect("repo");
    let project = repo.clone_plain().expect("clone");
    let git = Git::new(&project);
    list_commits(&project, &git, 10).expect("list");
    assert!(Path::new(&project).join("config.json").is_file());
    assert!(!git.is_dirty().expect("status"));
}
