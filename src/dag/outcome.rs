// src/dag/outcome.rs

//! Result types returned by the scheduler's public operations.

use crate::task::TaskId;

/// Summary of what `Scheduler::start` dispatched.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: u64,
    /// Dispatch order (topologically valid).
    pub order: Vec<TaskId>,
    /// Main-thread tasks executed inline during `start`.
    pub main_thread_tasks: usize,
    /// Main-thread tasks waiting for their gate and callback.
    pub deferred_tasks: usize,
    pub pool_tasks: usize,
    /// Size of the run-wide barrier.
    pub must_await: usize,
    /// Tasks finished without running (secondary process).
    pub skipped: usize,
}

/// Result of a bounded wait on the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    /// Everything waited for has finished.
    Completed,
    /// The timeout elapsed first. The listed tasks keep running.
    TimedOut { pending: Vec<TaskId> },
}

impl AwaitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AwaitOutcome::Completed)
    }
}
