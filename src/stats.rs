// src/stats.rs

//! Completed-task counters keyed by a "situation" label.
//!
//! Purely diagnostic: nothing in the scheduler reads these numbers back.

use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::info;

/// Count recorded for a situation when it was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SituationSnapshot {
    pub situation: String,
    pub completed: u64,
}

#[derive(Debug, Default)]
struct Situations {
    current: String,
    history: Vec<SituationSnapshot>,
}

/// Counter sink for completed tasks.
#[derive(Debug, Default)]
pub struct TaskStatistics {
    done: AtomicU64,
    situations: Mutex<Situations>,
}

static GLOBAL: OnceLock<Arc<TaskStatistics>> = OnceLock::new();

impl TaskStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance.
    pub fn global() -> Arc<TaskStatistics> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TaskStatistics::new())))
    }

    pub fn mark_task_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_count(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn current_situation(&self) -> String {
        self.situations.lock().current.clone()
    }

    /// Switch to a new situation.
    ///
    /// The count accumulated under the previous label is snapshotted and the
    /// counter restarts from zero.
    pub fn set_situation(&self, situation: impl Into<String>) {
        let situation = situation.into();
        let mut situations = self.situations.lock();
        let completed = self.done.swap(0, Ordering::Relaxed);
        let previous = std::mem::replace(&mut situations.current, situation);
        info!(
            previous = %previous,
            completed,
            current = %situations.current,
            "task statistics: situation changed"
        );
        situations.history.push(SituationSnapshot {
            situation: previous,
            completed,
        });
    }

    pub fn snapshots(&self) -> Vec<SituationSnapshot> {
        self.situations.lock().history.clone()
    }

    /// Most recent snapshot recorded for `situation`.
    pub fn snapshot_for(&self, situation: &str) -> Option<u64> {
        self.situations
            .lock()
            .history
            .iter()
            .rev()
            .find(|s| s.situation == situation)
            .map(|s| s.completed)
    }
}
