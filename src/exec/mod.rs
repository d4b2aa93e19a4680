// src/exec/mod.rs

//! Execution layer.
//!
//! - [`pools`] provides the CPU, IO and overflow execution contexts.
//! - [`runner`] wraps a single task body: gate wait, timing, failure
//!   isolation and the per-task diagnostic record.

pub mod pools;
pub mod runner;

pub use pools::{Job, WorkerPools, cpu_pool_size};
pub use runner::{execute_body, run_detached};
