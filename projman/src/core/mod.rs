//! Deterministic, pure logic shared by the CLI and the UI server.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod commits;
pub mod lifecycle;
pub mod progress;
pub mod repo_url;
pub mod types;
