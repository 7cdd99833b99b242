//! Command-line front end for projman.
//!
//! Every command loads the settings file, performs one action against the
//! projects directory and exits. Refused preconditions exit with
//! [`exit_codes::REFUSED`] so scripts can tell them apart from failures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use projman::clone::clone_project;
use projman::core::commits::format_timestamp;
use projman::core::progress::Reporter;
use projman::core::types::{Refusal, find_refusal};
use projman::delete::delete_project;
use projman::exit_codes;
use projman::io::git::Git;
use projman::io::process::{OutputSink, OutputStream};
use projman::io::projects::{describe_project, list_projects, resolve_existing};
use projman::io::settings::{
    DEFAULT_SETTINGS_FILE, Settings, load_settings, set_projects_dir, set_python,
};
use projman::io::venv::VenvProvisioner;
use projman::run::{resolve_entry_script, start_project};
use projman::switch::{list_commits, switch_commit};
use projman::update::{update_all, update_project};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "projman",
    version,
    about = "Clone, run, update and switch local Python projects"
)]
struct Cli {
    /// Settings file (TOML). Created on first write.
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List projects with their entry script and checked-out commit.
    List,
    /// Clone a repository and set up its virtual environment.
    Clone {
        /// Repository URL (or local path).
        url: String,
    },
    /// Pull a project (or every project) and refresh dependencies.
    Update {
        /// Project to update.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,
        /// Update every project.
        #[arg(long)]
        all: bool,
    },
    /// Show recent commits of a project, newest first.
    Commits {
        name: String,
        /// Maximum commits to show (defaults to the settings value).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check out a commit or branch.
    Switch {
        name: String,
        /// Commit sha, sha prefix, or branch name.
        rev: String,
    },
    /// Run a project's entry script and stream its output.
    Run {
        name: String,
        /// Entry script (relative to the project); remembered for later runs.
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Delete a project checkout and its environment.
    Delete {
        name: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Show or change settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the effective settings as TOML.
    Show,
    /// Move the projects directory (existing projects are not moved).
    SetProjectsDir { path: PathBuf },
    /// Interpreter used to create new environments.
    SetPython { python: String },
}

fn main() {
    projman::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if find_refusal(err).is_some() {
        exit_codes::REFUSED
    } else {
        exit_codes::ERROR
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli.settings)?;
    match cli.command {
        Command::List => cmd_list(&settings),
        Command::Clone { url } => cmd_clone(&settings, &url),
        Command::Update { name, all } => cmd_update(&settings, name.as_deref(), all),
        Command::Commits { name, limit } => cmd_commits(&settings, &name, limit),
        Command::Switch { name, rev } => cmd_switch(&settings, &name, &rev),
        Command::Run { name, script } => cmd_run(&settings, &name, script.as_deref()),
        Command::Delete { name, yes } => cmd_delete(&settings, &name, yes),
        Command::Settings(command) => cmd_settings(&cli.settings, &mut settings, command),
    }
}

fn provisioner(settings: &Settings) -> VenvProvisioner {
    VenvProvisioner::new(settings.python.clone(), settings.setup_timeout())
}

fn git_for(settings: &Settings, project: &Path) -> Git {
    Git::new(project).with_network_timeout(settings.setup_timeout())
}

fn cmd_list(settings: &Settings) -> Result<i32> {
    let names = list_projects(&settings.projects_dir)?;
    if names.is_empty() {
        println!("no projects in {}", settings.projects_dir.display());
        return Ok(exit_codes::OK);
    }
    for name in names {
        let info = describe_project(&settings.projects_dir, &name)?;
        let head = info.head.as_deref().unwrap_or("-");
        let at = info.branch.as_deref().unwrap_or("detached");
        let run_file = info.run_file.as_deref().unwrap_or("-");
        let env = if info.has_env { "" } else { " (no env)" };
        println!("{name}\t{head} ({at})\t{run_file}{env}");
    }
    Ok(exit_codes::OK)
}

fn cmd_clone(settings: &Settings, url: &str) -> Result<i32> {
    let outcome = clone_project(settings, url, &provisioner(settings), &LogReporter)?;
    println!("{}", outcome.path.display());
    Ok(exit_codes::OK)
}

fn cmd_update(settings: &Settings, name: Option<&str>, all: bool) -> Result<i32> {
    let provisioner = provisioner(settings);
    if all {
        let results = update_all(
            &settings.projects_dir,
            |path| git_for(settings, path),
            &provisioner,
            &LogReporter,
            &HashSet::new(),
        )?;
        let mut failed = 0;
        for (name, result) in &results {
            match result {
                Ok(outcome) if outcome.changed() => println!("{name}: updated"),
                Ok(_) => println!("{name}: up to date"),
                Err(err) => {
                    failed += 1;
                    println!("{name}: failed: {err:#}");
                }
            }
        }
        return Ok(if failed == 0 {
            exit_codes::OK
        } else {
            exit_codes::ERROR
        });
    }

    let name = name.ok_or_else(|| anyhow!("project name or --all required"))?;
    let project = resolve_existing(&settings.projects_dir, name)?;
    let outcome = update_project(
        &project,
        &git_for(settings, &project),
        &provisioner,
        &LogReporter,
    )?;
    if outcome.changed() {
        println!("{name}: {} -> {}", short(&outcome.previous_head), short(&outcome.head));
    } else {
        println!("{name}: up to date");
    }
    Ok(exit_codes::OK)
}

fn cmd_commits(settings: &Settings, name: &str, limit: Option<usize>) -> Result<i32> {
    let project = resolve_existing(&settings.projects_dir, name)?;
    let limit = limit.unwrap_or(settings.commit_limit);
    let git = Git::new(&project);
    let head = git.head_sha().ok();
    for commit in list_commits(&project, &git, limit)? {
        let marker = if head.as_deref() == Some(commit.sha.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {}  {}  {}",
            commit.short_sha,
            format_timestamp(commit.timestamp),
            commit.subject
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_switch(settings: &Settings, name: &str, rev: &str) -> Result<i32> {
    let project = resolve_existing(&settings.projects_dir, name)?;
    let outcome = switch_commit(&Git::new(&project), rev)?;
    match outcome.branch {
        Some(branch) => println!("{name}: on branch {branch} at {}", short(&outcome.to)),
        None => println!("{name}: detached at {}", short(&outcome.to)),
    }
    Ok(exit_codes::OK)
}

fn cmd_run(settings: &Settings, name: &str, script: Option<&Path>) -> Result<i32> {
    let project = resolve_existing(&settings.projects_dir, name)?;
    let script = resolve_entry_script(&project, script)?;
    let handle = start_project(&project, &script, Arc::new(TerminalSink))?;
    eprintln!("started {} (pid {})", script.display(), handle.pid());
    let status = handle.wait().context("wait for project")?;
    Ok(status.unwrap_or(exit_codes::ERROR))
}

fn cmd_delete(settings: &Settings, name: &str, yes: bool) -> Result<i32> {
    if !yes {
        return Err(Refusal::Unconfirmed(name.to_string()).into());
    }
    let removed = delete_project(&settings.projects_dir, name)?;
    println!("deleted {}", removed.display());
    Ok(exit_codes::OK)
}

fn cmd_settings(path: &Path, settings: &mut Settings, command: SettingsCommand) -> Result<i32> {
    match command {
        SettingsCommand::Show => {
            let rendered = toml::to_string_pretty(settings).context("serialize settings")?;
            print!("{rendered}");
        }
        SettingsCommand::SetProjectsDir { path: dir } => {
            set_projects_dir(path, settings, &dir)?;
            println!("projects_dir = {}", settings.projects_dir.display());
        }
        SettingsCommand::SetPython { python } => {
            set_python(path, settings, &python)?;
            println!("python = {}", settings.python);
        }
    }
    Ok(exit_codes::OK)
}

fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Progress for the terminal: traced, and printed to stderr so stdout stays
/// parseable.
struct LogReporter;

impl Reporter for LogReporter {
    fn progress(&self, percent: u8) {
        info!(percent, "progress");
        eprintln!("[{percent:>3}%]");
    }

    fn message(&self, text: &str) {
        info!(text, "progress message");
        eprintln!("       {text}");
    }
}

/// Forwards script output to the matching terminal stream.
struct TerminalSink;

impl OutputSink for TerminalSink {
    fn line(&self, stream: OutputStream, line: &str) {
        match stream {
            OutputStream::Stdout => println!("{line}"),
            OutputStream::Stderr => eprintln!("{line}"),
        }
    }

    fn finished(&self, exit_code: Option<i32>) {
        match exit_code {
            Some(code) => eprintln!("exited with {code}"),
            None => eprintln!("terminated by signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_update_single() {
        let cli = Cli::parse_from(["projman", "update", "demo"]);
        assert!(matches!(
            cli.command,
            Command::Update { name: Some(ref n), all: false } if n == "demo"
        ));
    }

    #[test]
    fn parse_update_all() {
        let cli = Cli::parse_from(["projman", "update", "--all"]);
        assert!(matches!(cli.command, Command::Update { name: None, all: true }));
    }

    #[test]
    fn update_requires_name_or_all() {
        assert!(Cli::try_parse_from(["projman", "update"]).is_err());
        assert!(Cli::try_parse_from(["projman", "update", "demo", "--all"]).is_err());
    }

    #[test]
    fn settings_flag_is_global() {
        let cli = Cli::parse_from(["projman", "list", "--settings", "/tmp/p.toml"]);
        assert_eq!(cli.settings, PathBuf::from("/tmp/p.toml"));
        let cli = Cli::parse_from(["projman", "list"]);
        assert_eq!(cli.settings, PathBuf::from(DEFAULT_SETTINGS_FILE));
    }

    #[test]
    fn parse_settings_subcommands() {
        let cli = Cli::parse_from(["projman", "settings", "set-python", "python3.12"]);
        assert!(matches!(
            cli.command,
            Command::Settings(SettingsCommand::SetPython { ref python }) if python == "python3.12"
        ));
    }

    #[test]
    fn delete_defaults_to_unconfirmed() {
        let cli = Cli::parse_from(["projman", "delete", "demo"]);
        assert!(matches!(cli.command, Command::Delete { yes: false, .. }));
    }

    #[test]
    fn refusals_map_to_refused_exit_code() {
        let err = anyhow::Error::from(Refusal::DirtyWorktree).context("switch demo");
        assert_eq!(exit_code_for(&err), exit_codes::REFUSED);
        assert_eq!(exit_code_for(&anyhow!("git failed")), exit_codes::ERROR);
    }

    #[test]
    fn short_sha_handles_short_input() {
        assert_eq!(short("0123456789"), "0123456");
        assert_eq!(short("abc"), "abc");
    }
}
