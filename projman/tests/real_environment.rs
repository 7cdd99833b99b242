//! Clone, provision and run with a real Python interpreter.
//!
//! Skipped (with a note on stderr) when no interpreter on this machine can
//! create virtual environments.

use std::path::Path;
use std::sync::Arc;

use projman::clone::clone_project;
use projman::io::process::{OutputSink, OutputStream};
use projman::io::venv::{VenvPaths, VenvProvisioner};
use projman::run::{resolve_entry_script, start_project};
use projman::test_support::{CollectingSink, RecordingReporter, TestRepo, venv_python};

#[test]
fn cloned_project_runs_in_its_own_environment() {
    let Some(python) = venv_python() else {
        eprintln!("skipping: no python able to create virtual environments");
        return;
    };
    let repo = TestRepo::new().expect("repo");
    repo.commit_file("requirements.txt", "", "empty requirements")
        .expect("commit requirements");
    repo.commit_file(
        "hello.py",
        "import sys\nprint('hello from', 'venv' if sys.prefix != sys.base_prefix else 'system')\nprint('warning', file=sys.stderr)\nsys.exit(4)\n",
        "add hello",
    )
    .expect("commit script");

    let settings = repo.settings();
    let provisioner = VenvProvisioner::new(python, settings.setup_timeout());
    let reporter = RecordingReporter::default();
    let outcome =
        clone_project(&settings, &repo.url(), &provisioner, &reporter).expect("clone");

    assert_eq!(reporter.progress(), vec![0, 35, 100]);
    assert!(outcome.dependencies_installed);
    let venv = VenvPaths::locate(&outcome.path).expect("venv created");
    assert!(venv.python().is_file());
    assert!(venv.pip().is_file());

    let script =
        resolve_entry_script(&outcome.path, Some(Path::new("hello.py"))).expect("script");
    let sink = Arc::new(CollectingSink::default());
    let handle = start_project(
        &outcome.path,
        &script,
        Arc::clone(&sink) as Arc<dyn OutputSink>,
    )
    .expect("start");

    assert_eq!(handle.wait().expect("wait"), Some(4));
    assert_eq!(sink.lines_of(OutputStream::Stdout), vec!["hello from venv"]);
    assert_eq!(sink.lines_of(OutputStream::Stderr), vec!["warning"]);
}
