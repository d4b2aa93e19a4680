// src/task.rs

//! The task-author contract.
//!
//! A [`Task`] is one unit of startup work. Everything except [`Task::id`] and
//! [`Task::run`] has a default, so a minimal initializer looks like:
//!
//! ```rust
//! use starter::task::{Task, TaskId};
//!
//! struct InitLogging;
//!
//! impl Task for InitLogging {
//!     fn id(&self) -> TaskId {
//!         TaskId::from("init-logging")
//!     }
//!
//!     fn run(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

pub use crate::dag::run_state::TaskCallback;

/// Advisory priority given to tasks that do not override [`Task::priority`].
///
/// Lower values are more urgent. The scheduler only records it.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Action run immediately after a task body returns successfully.
pub type TailAction = Box<dyn FnOnce() + Send + 'static>;

/// Identity of a task; unique within one scheduling run.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TaskId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

/// Which execution context a task must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    /// Bounded CPU pool, for compute-heavy initializers.
    Cpu,
    /// Unbounded IO pool, tolerant of blocking bodies.
    #[default]
    Io,
    /// The designated main thread.
    #[serde(alias = "main")]
    MainThread,
}

impl Affinity {
    pub fn is_main_thread(self) -> bool {
        matches!(self, Affinity::MainThread)
    }
}

impl fmt::Display for Affinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Affinity::Cpu => "cpu",
            Affinity::Io => "io",
            Affinity::MainThread => "main",
        };
        f.write_str(s)
    }
}

/// A unit of startup work.
pub trait Task: Send + Sync {
    /// Identity used for dependency lookup.
    fn id(&self) -> TaskId;

    /// The task body.
    ///
    /// Returning `Err` (or panicking) does not stall the run: the failure is
    /// logged and the task still counts as finished for its dependents.
    fn run(&self) -> anyhow::Result<()>;

    /// Advisory priority hint.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn affinity(&self) -> Affinity {
        Affinity::Io
    }

    /// Identities of the tasks that must finish before this one starts.
    fn depends_on(&self) -> Vec<TaskId> {
        Vec::new()
    }

    /// Whether `Scheduler::wait` should block on this task.
    ///
    /// Only honoured for pool tasks; main-thread tasks are synchronous anyway.
    fn must_await(&self) -> bool {
        false
    }

    /// Skip this task entirely when the host is not the primary process.
    fn main_process_only(&self) -> bool {
        true
    }

    /// Main-thread tasks only: completion is reported through the
    /// [`TaskCallback`] handed to [`Task::bind_callback`] instead of when
    /// `run` returns.
    fn needs_callback(&self) -> bool {
        false
    }

    /// Dispatch this task ahead of other tasks nobody depends on.
    ///
    /// Useful for a slow initializer with an ordinary priority that would
    /// otherwise start late and hold up the whole run.
    fn run_as_soon(&self) -> bool {
        false
    }

    fn tail_action(&self) -> Option<TailAction> {
        None
    }

    /// Receives the completion handle for `needs_callback` tasks before the
    /// body runs.
    fn bind_callback(&self, _callback: TaskCallback) {}

    /// Human readable name for logs.
    fn name(&self) -> String {
        self.id().to_string()
    }
}

/// Shared handle to a registered task.
pub type TaskRef = Arc<dyn Task>;
