// src/idle.rs

//! Cooperative runner for low-priority startup work.
//!
//! The host calls [`IdleScheduler::on_idle`] from its idle hook (for example
//! between frames of an event loop). Each call runs at most one queued task
//! to completion on the calling thread, so the host stays responsive.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::exec::runner::run_detached;
use crate::stats::TaskStatistics;
use crate::task::TaskRef;

/// FIFO queue of tasks drained one per idle callback.
///
/// Dependencies, affinity and gates are ignored here: queued tasks simply run
/// in the order they were added.
pub struct IdleScheduler {
    queue: VecDeque<TaskRef>,
    statistics: Arc<TaskStatistics>,
}

impl IdleScheduler {
    pub fn new() -> Self {
        Self::with_statistics(TaskStatistics::global())
    }

    pub fn with_statistics(statistics: Arc<TaskStatistics>) -> Self {
        Self {
            queue: VecDeque::new(),
            statistics,
        }
    }

    pub fn add_task(&mut self, task: TaskRef) -> &mut Self {
        self.queue.push_back(task);
        self
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Run the next queued task, if any.
    ///
    /// Returns whether more work remains, which tells the host to keep the
    /// hook installed.
    pub fn on_idle(&mut self) -> bool {
        if let Some(task) = self.queue.pop_front() {
            let outcome = run_detached(task.as_ref(), &self.statistics);
            debug!(task = %task.id(), ?outcome, remaining = self.queue.len(), "idle task done");
        }
        !self.queue.is_empty()
    }

    /// Turn the queue into an idle hook closure.
    pub fn into_idle_handler(mut self) -> impl FnMut() -> bool + Send {
        move || self.on_idle()
    }
}

impl Default for IdleScheduler {
    fn default() -> Self {
        Self::new()
    }
}
