//! Local manager for cloned Python projects.
//!
//! Projects are git checkouts inside one projects directory, each with its own
//! virtual environment. The crate covers the whole lifecycle: clone, provision,
//! run/stop, update, switch commit, delete. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (URL naming, commit log parsing,
//!   the lifecycle state machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (settings and config files, git,
//!   child processes, virtual environments).
//!
//! Orchestration modules ([`clone`], [`update`], [`switch`], [`run`],
//! [`delete`]) coordinate core logic with I/O and back both the CLI and the
//! UI server.

pub mod clone;
pub mod core;
pub mod delete;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod switch;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod update;
