// src/exec/runner.rs

//! Execution wrapper around a single task body.
//!
//! Handles the parts every execution path shares: gate wait, timing, failure
//! isolation (errors and panics), the tail action, and the diagnostic record
//! emitted after the body returns.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, info_span};

use crate::dag::run_state::{RunState, SkipReason, TaskOutcome, TaskState};
use crate::stats::TaskStatistics;
use crate::task::Task;

/// Run a task body with failure isolation and its tail action.
///
/// The tail action only runs when the body succeeded.
pub fn execute_body(task: &dyn Task) -> TaskOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| task.run()));
    let outcome = match result {
        Ok(Ok(())) => TaskOutcome::Succeeded,
        Ok(Err(err)) => {
            error!(task = %task.id(), error = %format!("{err:#}"), "task body failed");
            TaskOutcome::Failed
        }
        Err(panic) => {
            error!(task = %task.id(), panic = %panic_message(&panic), "task body panicked");
            TaskOutcome::Failed
        }
    };

    if outcome == TaskOutcome::Succeeded {
        if let Some(tail) = task.tail_action() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(tail)) {
                error!(task = %task.id(), panic = %panic_message(&panic), "tail action panicked");
            }
        }
    }
    outcome
}

/// Run a task outside any scheduling run (idle runner, direct execution).
pub fn run_detached(task: &dyn Task, statistics: &TaskStatistics) -> TaskOutcome {
    let _span = info_span!("task", task = %task.id()).entered();
    info!("task start");
    let started = Instant::now();
    let outcome = execute_body(task);
    statistics.mark_task_done();
    log_execution(task, Duration::ZERO, started.elapsed(), statistics, outcome);
    outcome
}

/// Body of a pool job: wait for the gate, then run and signal completion.
pub(crate) fn run_pool_job(run: Arc<RunState>, index: usize) {
    let entry = &run.tasks[index];
    let _span = info_span!("task", task = %entry.id, run_id = run.run_id).entered();

    if run.is_cancelled() {
        debug!("run cancelled before task started; skipping");
        run.mark_done(index, TaskOutcome::Skipped(SkipReason::Cancelled));
        return;
    }

    let waited = Instant::now();
    if !run.advance(index, TaskState::Waiting) {
        return;
    }
    run.gates[index].wait();
    let wait_time = waited.elapsed();

    // Completed by hand (`Scheduler::mark_done`) while parked on the gate.
    if run.state(index).is_finished() {
        debug!("task finished before its gate opened; not running body");
        return;
    }
    if run.is_cancelled() {
        debug!("run cancelled while task waited on its gate; skipping");
        run.mark_done(index, TaskOutcome::Skipped(SkipReason::Cancelled));
        return;
    }

    if let Some(outcome) = run_in_run(&run, index, wait_time) {
        run.mark_done(index, outcome);
    }
}

/// Run a main-thread task whose gate is already open.
///
/// Deferred (`needs_callback`) tasks are only marked done here if their
/// body failed; otherwise completion comes from the callback.
///
/// Returns whether the body ran.
pub(crate) fn run_main_task(run: &Arc<RunState>, index: usize, wait_time: Duration) -> bool {
    let entry = &run.tasks[index];
    let _span = info_span!("task", task = %entry.id, run_id = run.run_id).entered();

    let Some(outcome) = run_in_run(run, index, wait_time) else {
        return false;
    };
    if !entry.deferred || outcome != TaskOutcome::Succeeded {
        run.mark_done(index, outcome);
    } else {
        debug!("body returned; completion pending on callback");
    }
    true
}

/// Run the body unless the task already finished. `None` means the body
/// was not run.
fn run_in_run(run: &RunState, index: usize, wait_time: Duration) -> Option<TaskOutcome> {
    let task = run.tasks[index].task.as_ref();
    if !run.advance(index, TaskState::Running) {
        return None;
    }
    let started = Instant::now();
    let outcome = execute_body(task);
    log_execution(task, wait_time, started.elapsed(), &run.statistics, outcome);
    Some(outcome)
}

fn log_execution(
    task: &dyn Task,
    wait_time: Duration,
    run_time: Duration,
    statistics: &TaskStatistics,
    outcome: TaskOutcome,
) {
    let current = thread::current();
    info!(
        task = %task.name(),
        wait_ms = wait_time.as_millis() as u64,
        run_ms = run_time.as_millis() as u64,
        affinity = %task.affinity(),
        must_await = task.must_await(),
        priority = task.priority(),
        thread = current.name().unwrap_or("<unnamed>"),
        situation = %statistics.current_situation(),
        ?outcome,
        "task finished"
    );
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
