//! Progress reporting contract for long-running project actions.
//!
//! Progress is a coarse fixed-stage percentage, not a byte count: each
//! orchestration step reports one of the constants below.

/// Clone finished, environment setup starting.
pub const CLONE_FETCHED: u8 = 35;
/// Pull finished, dependency refresh starting.
pub const UPDATE_PULLED: u8 = 50;
/// Action complete.
pub const DONE: u8 = 100;

/// Receives progress from a background action.
///
/// Implementations must be cheap and non-blocking: they are called from the
/// worker thread while git or pip is between steps.
pub trait Reporter: Send + Sync {
    fn progress(&self, percent: u8);
    fn message(&self, text: &str);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&self, _percent: u8) {}
    fn message(&self, _text: &str) {}
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn progress(&self, percent: u8) {
        (**self).progress(percent);
    }

    fn message(&self, text: &str) {
        (**self).message(text);
    }
}
