//! Progress reporting for long-running batch steps.
//!
//! The batch orchestrator reports per-region progress through
//! [`ProgressCallback`] so it stays independent of how (or whether) the
//! progress is rendered. Terminal rendering lives in the CLI utilities
//! crate.

use std::sync::Arc;

/// Receives progress updates from a running step.
///
/// Implementations must be `Send + Sync` because updates arrive from
/// concurrently running region tasks.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total number of work units.
    fn set_total(&self, total: u64);

    /// Advances progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Replaces the message shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Marks the step complete, leaving a final message.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
