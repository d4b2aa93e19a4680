// src/dag/mod.rs

//! Dependency graph and scheduling.
//!
//! - [`graph`] resolves declared dependencies into a DAG and sorts it.
//! - [`scheduler`] owns registration, dispatch and the waiting operations.
//! - [`run_state`] is the state shared by every job of one run: gates,
//!   barrier, per-task states and the completion fan-out.
//! - [`outcome`] holds the result types handed back to callers.

pub mod graph;
pub mod outcome;
pub mod run_state;
pub mod scheduler;

pub use graph::{DependencyGraph, GraphNode};
pub use outcome::{AwaitOutcome, RunSummary};
pub use run_state::{SkipReason, TaskCallback, TaskOutcome, TaskState};
pub use scheduler::{Scheduler, SchedulerBuilder};
