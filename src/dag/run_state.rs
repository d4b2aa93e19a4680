// src/dag/run_state.rs

//! Shared state of one scheduling run.
//!
//! A [`RunState`] is created by `Scheduler::start`, shared with every pool job
//! of the run through an `Arc`, and dropped once the last job and the
//! scheduler let go of it. It owns the gates, the run-wide barrier and the
//! completion fan-out.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::stats::TaskStatistics;
use crate::sync::Latch;
use crate::task::{TaskId, TaskRef};

/// Lifecycle of a task within one run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Registered,
    Dispatched,
    /// Blocked on its gate.
    Waiting,
    Running,
    Finished(TaskOutcome),
}

impl TaskState {
    fn rank(self) -> u8 {
        match self {
            TaskState::Registered => 0,
            TaskState::Dispatched => 1,
            TaskState::Waiting => 2,
            TaskState::Running => 3,
            TaskState::Finished(_) => 4,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskState::Finished(_))
    }
}

/// How a finished task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// The body returned an error or panicked.
    Failed,
    /// The body never ran.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `main_process_only` task on a secondary process.
    NotPrimaryProcess,
    Cancelled,
}

impl TaskOutcome {
    /// Whether the task body actually executed.
    pub fn ran(self) -> bool {
        matches!(self, TaskOutcome::Succeeded | TaskOutcome::Failed)
    }
}

/// Signals delivered to the main thread's mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MainSignal {
    /// The gate of a main-thread task opened.
    Ready { run_id: u64, index: usize },
    /// A must-await task finished; re-check the barrier.
    Wake,
}

/// Sending side of the main thread's mailbox.
///
/// `Ready` carries work and is always queued. `Wake` only asks a pumping main
/// thread to re-check its condition, so it is dropped while nobody pumps.
#[derive(Clone)]
pub(crate) struct Mailbox {
    tx: Sender<MainSignal>,
    /// Number of active pumps on the main thread.
    pumps: Arc<Mutex<usize>>,
}

impl Mailbox {
    pub fn new(tx: Sender<MainSignal>) -> Self {
        Self {
            tx,
            pumps: Arc::new(Mutex::new(0)),
        }
    }

    pub fn ready(&self, run_id: u64, index: usize) {
        let _ = self.tx.send(MainSignal::Ready { run_id, index });
    }

    /// Call after changing the state a pump re-checks.
    pub fn wake(&self) {
        // The count is read under its lock, after the state change. A pump
        // registers under the same lock before checking, so either it sees
        // the change or this sees the pump.
        if *self.pumps.lock() > 0 {
            let _ = self.tx.send(MainSignal::Wake);
        }
    }

    /// Register a pump until the returned guard drops.
    pub fn pumping(&self) -> PumpGuard<'_> {
        *self.pumps.lock() += 1;
        PumpGuard(&self.pumps)
    }
}

pub(crate) struct PumpGuard<'a>(&'a Mutex<usize>);

impl Drop for PumpGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() -= 1;
    }
}

/// Static per-task data of a run, in registration order.
pub(crate) struct RunTask {
    pub task: TaskRef,
    pub id: TaskId,
    pub must_await: bool,
    pub main_thread: bool,
    pub deferred: bool,
}

pub(crate) struct RunState {
    pub run_id: u64,
    pub tasks: Vec<RunTask>,
    pub index: HashMap<TaskId, usize>,
    pub started_at: Instant,
    /// Dependents fan-out: registration index -> indices that depend on it.
    pub dependents: Vec<Vec<usize>>,
    pub gates: Vec<Latch>,
    /// Counts must-await pool tasks.
    pub barrier: Latch,
    /// Counts every task of the run.
    pub remaining: Latch,
    states: Mutex<Vec<TaskState>>,
    pub cancelled: AtomicBool,
    finished: Arc<Mutex<HashSet<TaskId>>>,
    mailbox: Mailbox,
    pub statistics: Arc<TaskStatistics>,
}

impl RunState {
    pub(crate) fn new(
        run_id: u64,
        tasks: Vec<RunTask>,
        dependents: Vec<Vec<usize>>,
        gate_counts: Vec<usize>,
        finished: Arc<Mutex<HashSet<TaskId>>>,
        mailbox: Mailbox,
        statistics: Arc<TaskStatistics>,
    ) -> Self {
        let must_await = tasks.iter().filter(|t| t.must_await).count();
        let n = tasks.len();
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        Self {
            run_id,
            index,
            started_at: Instant::now(),
            dependents,
            gates: gate_counts.into_iter().map(Latch::new).collect(),
            barrier: Latch::new(must_await),
            remaining: Latch::new(n),
            states: Mutex::new(vec![TaskState::Registered; n]),
            cancelled: AtomicBool::new(false),
            finished,
            mailbox,
            statistics,
            tasks,
        }
    }

    pub fn state(&self, index: usize) -> TaskState {
        self.states.lock()[index]
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Move `index` forward to `next`. Returns `false` if that would go
    /// backwards or the task already finished; callers must then leave the
    /// task alone.
    pub fn advance(&self, index: usize, next: TaskState) -> bool {
        let mut states = self.states.lock();
        let current = states[index];
        if current.is_finished() {
            debug!(
                task = %self.tasks[index].id,
                ?current,
                ?next,
                "task already finished; not advancing"
            );
            return false;
        }
        if next.rank() < current.rank() {
            warn!(
                task = %self.tasks[index].id,
                ?current,
                ?next,
                "ignoring backwards task state transition"
            );
            return false;
        }
        states[index] = next;
        true
    }

    /// Identities of must-await tasks that have not finished yet.
    pub fn pending_must_await(&self) -> Vec<TaskId> {
        let states = self.states.lock();
        self.tasks
            .iter()
            .zip(states.iter())
            .filter(|(t, s)| t.must_await && !s.is_finished())
            .map(|(t, _)| t.id.clone())
            .collect()
    }

    pub fn unfinished(&self) -> Vec<TaskId> {
        let states = self.states.lock();
        self.tasks
            .iter()
            .zip(states.iter())
            .filter(|(_, s)| !s.is_finished())
            .map(|(t, _)| t.id.clone())
            .collect()
    }

    /// Record completion of `index`. Only the first call per task counts;
    /// later calls are logged and ignored and return `false`.
    pub fn mark_done(&self, index: usize, outcome: TaskOutcome) -> bool {
        {
            let mut states = self.states.lock();
            if states[index].is_finished() {
                warn!(
                    task = %self.tasks[index].id,
                    run_id = self.run_id,
                    "completion signalled twice; ignoring"
                );
                return false;
            }
            states[index] = TaskState::Finished(outcome);
        }

        let entry = &self.tasks[index];
        if outcome.ran() {
            self.statistics.mark_task_done();
        }
        self.finished.lock().insert(entry.id.clone());

        debug!(
            task = %entry.id,
            run_id = self.run_id,
            ?outcome,
            "task finished"
        );

        self.notify_dependents(index);

        if entry.must_await {
            self.barrier.count_down();
            self.mailbox.wake();
        }
        if self.remaining.count_down() {
            info!(run_id = self.run_id, "all tasks of run finished");
            self.mailbox.wake();
        }
        true
    }

    /// Decrement the gate of every task that depends on `index`.
    ///
    /// Pool jobs parked on a gate wake up by themselves; main-thread tasks
    /// get a ready signal on the mailbox.
    pub fn notify_dependents(&self, index: usize) {
        for &dependent in &self.dependents[index] {
            if self.gates[dependent].count_down() && self.tasks[dependent].main_thread {
                self.post_ready(dependent);
            }
        }
    }

    pub(crate) fn post_ready(&self, index: usize) {
        self.mailbox.ready(self.run_id, index);
    }
}

/// Completion handle given to `needs_callback` tasks.
///
/// Calling [`TaskCallback::done`] marks the task finished and releases its
/// dependents. It can be called from any thread; only the first call counts.
#[derive(Clone)]
pub struct TaskCallback {
    run: Weak<RunState>,
    index: usize,
    id: TaskId,
}

impl TaskCallback {
    pub(crate) fn new(run: &Arc<RunState>, index: usize) -> Self {
        Self {
            run: Arc::downgrade(run),
            index,
            id: run.tasks[index].id.clone(),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.id
    }

    /// Report successful completion.
    pub fn done(&self) {
        self.finish(TaskOutcome::Succeeded);
    }

    /// Report that the asynchronous part of the task failed.
    pub fn failed(&self) {
        self.finish(TaskOutcome::Failed);
    }

    fn finish(&self, outcome: TaskOutcome) {
        match self.run.upgrade() {
            Some(run) => {
                run.mark_done(self.index, outcome);
            }
            None => debug!(task = %self.id, "callback fired after its run was dropped"),
        }
    }
}

impl fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCallback")
            .field("task", &self.id)
            .field("index", &self.index)
            .finish()
    }
}
