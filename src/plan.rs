// src/plan.rs

//! Simulated tasks described by `[task.<name>]` tables.
//!
//! The command-line driver has no real initializers to run, so it turns each
//! table into a [`SimulatedTask`] that sleeps for `work_ms` and optionally
//! fails. Handy for trying out a graph shape and watching the scheduler's
//! logs before wiring up real work.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::bail;
use tracing::trace;

use crate::config::model::{ConfigFile, TaskConfig};
use crate::task::{Affinity, DEFAULT_PRIORITY, Task, TaskId, TaskRef};

#[derive(Debug, Clone)]
pub struct SimulatedTask {
    id: TaskId,
    deps: Vec<TaskId>,
    affinity: Affinity,
    priority: i32,
    must_await: bool,
    main_process_only: bool,
    run_as_soon: bool,
    work: Duration,
    fail: bool,
}

impl SimulatedTask {
    pub fn from_config(name: &str, cfg: &TaskConfig) -> Self {
        Self {
            id: TaskId::from(name),
            deps: cfg.after.iter().map(|d| TaskId::from(d.as_str())).collect(),
            affinity: cfg.affinity,
            priority: cfg.priority.unwrap_or(DEFAULT_PRIORITY),
            must_await: cfg.must_await,
            main_process_only: cfg.effective_main_process_only(),
            run_as_soon: cfg.run_as_soon,
            work: Duration::from_millis(cfg.work_ms),
            fail: cfg.fail,
        }
    }
}

impl Task for SimulatedTask {
    fn id(&self) -> TaskId {
        self.id.clone()
    }

    fn run(&self) -> anyhow::Result<()> {
        trace!(task = %self.id, work_ms = self.work.as_millis() as u64, "simulating work");
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        if self.fail {
            bail!("simulated failure of task '{}'", self.id);
        }
        Ok(())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn affinity(&self) -> Affinity {
        self.affinity
    }

    fn depends_on(&self) -> Vec<TaskId> {
        self.deps.clone()
    }

    fn must_await(&self) -> bool {
        self.must_await
    }

    fn main_process_only(&self) -> bool {
        self.main_process_only
    }

    fn run_as_soon(&self) -> bool {
        self.run_as_soon
    }
}

/// One simulated task per `[task.<name>]` table, in name order.
pub fn build_tasks(cfg: &ConfigFile) -> Vec<TaskRef> {
    cfg.task
        .iter()
        .map(|(name, tc)| Arc::new(SimulatedTask::from_config(name, tc)) as TaskRef)
        .collect()
}
