//! Stable exit codes for projman CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed (git, interpreter, filesystem or config errors).
pub const ERROR: i32 = 1;
/// Command was refused because a precondition did not hold
/// (dirty worktree, existing project, unknown commit, missing confirmation).
pub const REFUSED: i32 = 2;
