//! Bounded-concurrency executor for region tasks.

use std::future::Future;
use std::num::NonZeroUsize;

use futures::StreamExt as _;

use crate::PipelineError;

/// Runs futures with at most `size` in flight.
///
/// Blocking work inside a task belongs in `tokio::task::spawn_blocking`;
/// the pool only bounds how many tasks are polled at once.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: NonZeroUsize,
}

impl WorkerPool {
    /// Default number of concurrent region tasks.
    pub const DEFAULT_SIZE: usize = 10;

    /// Creates a pool of `size` workers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `size` is zero.
    pub fn new(size: usize) -> Result<Self, PipelineError> {
        NonZeroUsize::new(size)
            .map(|size| Self { size })
            .ok_or_else(|| PipelineError::Config {
                message: "worker pool size must be at least 1".to_string(),
            })
    }

    /// Maximum number of tasks in flight.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size.get()
    }

    /// Maps every item through `task` and collects the outputs in
    /// completion order.
    pub async fn run<I, F, Fut>(&self, items: I, task: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future,
    {
        futures::stream::iter(items.into_iter().map(task))
            .buffer_unordered(self.size.get())
            .collect()
            .await
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self {
            size: NonZeroUsize::new(Self::DEFAULT_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}
