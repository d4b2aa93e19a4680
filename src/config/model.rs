// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::task::Affinity;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// await_timeout_ms = 10000
///
/// [pools]
/// cpu_queue_capacity = 128
/// thread_name_prefix = "starter"
///
/// [task.database]
/// affinity = "io"
/// must_await = true
/// work_ms = 40
///
/// [task.ui]
/// affinity = "main"
/// after = ["database"]
/// ```
///
/// All sections are optional and have reasonable defaults. The `[task.*]`
/// tables describe simulated tasks for the command-line driver; library
/// users register their own [`Task`](crate::task::Task) implementations.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub pools: PoolSection,

    /// Keys are the task identities.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Bound used by `Scheduler::wait()`.
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
}

fn default_await_timeout_ms() -> u64 {
    10_000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            await_timeout_ms: default_await_timeout_ms(),
        }
    }
}

/// `[pools]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    /// Jobs the CPU pool queues before spilling to the overflow context.
    #[serde(default = "default_cpu_queue_capacity")]
    pub cpu_queue_capacity: usize,

    /// Idle time after which pool threads retire.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,

    /// Upper bound on IO (and overflow) threads.
    #[serde(default = "default_io_max_threads")]
    pub io_max_threads: usize,

    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_cpu_queue_capacity() -> usize {
    128
}

fn default_keep_alive_ms() -> u64 {
    5_000
}

fn default_io_max_threads() -> usize {
    256
}

fn default_thread_name_prefix() -> String {
    "starter".to_string()
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            cpu_queue_capacity: default_cpu_queue_capacity(),
            keep_alive_ms: default_keep_alive_ms(),
            io_max_threads: default_io_max_threads(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

/// `[task.<name>]` section: a simulated task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub affinity: Affinity,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub must_await: bool,

    /// If `None`, defaults to `true`.
    #[serde(default)]
    pub main_process_only: Option<bool>,

    #[serde(default)]
    pub run_as_soon: bool,

    /// How long the simulated body sleeps.
    #[serde(default)]
    pub work_ms: u64,

    /// Make the simulated body return an error.
    #[serde(default)]
    pub fail: bool,
}

impl TaskConfig {
    pub fn effective_main_process_only(&self) -> bool {
        self.main_process_only.unwrap_or(true)
    }
}
