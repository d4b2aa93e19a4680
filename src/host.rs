// src/host.rs

//! Signals the scheduler needs from its host process.

use std::thread::{self, ThreadId};

/// Host-provided inputs consumed by the scheduler.
pub trait Host: Send + Sync {
    /// Whether this is the primary process/instance of the application.
    ///
    /// Tasks with `main_process_only` are skipped when this is `false`.
    fn is_primary_process(&self) -> bool;

    /// Hardware concurrency hint used to size the CPU pool.
    fn hardware_concurrency(&self) -> usize;

    /// Whether the calling thread is the designated main thread.
    fn is_main_thread(&self) -> bool;
}

/// Default host: the thread that builds it becomes the main thread.
#[derive(Debug, Clone)]
pub struct ProcessHost {
    main_thread: ThreadId,
    primary: bool,
    concurrency: usize,
}

impl ProcessHost {
    /// Designate the calling thread as the main thread of a primary process.
    pub fn current() -> Self {
        let concurrency = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            main_thread: thread::current().id(),
            primary: true,
            concurrency,
        }
    }

    pub fn with_primary_process(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    pub fn with_hardware_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

impl Default for ProcessHost {
    fn default() -> Self {
        Self::current()
    }
}

impl Host for ProcessHost {
    fn is_primary_process(&self) -> bool {
        self.primary
    }

    fn hardware_concurrency(&self) -> usize {
        self.concurrency
    }

    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }
}

/// Whether `process_name` names the primary process of `package`.
///
/// Secondary processes conventionally carry a `:suffix`
/// (e.g. `com.example.app:push`).
pub fn is_primary_process_name(process_name: &str, package: &str) -> bool {
    !process_name.contains(':') && process_name == package
}
