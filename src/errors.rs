// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Everything that aborts a scheduling cycle before a task body runs is a
//! configuration error. Timeouts are not errors (see
//! [`AwaitOutcome`](crate::dag::AwaitOutcome)) and task body failures are
//! isolated by the runner, so neither shows up here.

use thiserror::Error;

use crate::task::TaskId;

#[derive(Error, Debug)]
pub enum StarterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("task '{task}' depends on '{dependency}' which is not registered")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("task '{0}' cannot depend on itself")]
    SelfDependency(TaskId),

    #[error("task '{0}' is registered more than once")]
    DuplicateTask(TaskId),

    #[error("Cycle detected in task graph: {0}")]
    DagCycle(String),

    #[error("`Scheduler::start()` must be called from the main thread")]
    NotMainThread,

    #[error("a scheduling run is already in progress (run {0})")]
    AlreadyRunning(u64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StarterError {
    /// Whether this error means the task set itself is malformed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StarterError::ConfigError(_)
                | StarterError::UnknownDependency { .. }
                | StarterError::SelfDependency(_)
                | StarterError::DuplicateTask(_)
                | StarterError::DagCycle(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StarterError>;
