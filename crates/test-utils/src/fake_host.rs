#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use starter::host::Host;

/// Host whose answers tests can change on the fly.
///
/// The thread that creates it is the main thread unless told otherwise.
#[derive(Debug)]
pub struct FakeHost {
    primary: AtomicBool,
    concurrency: usize,
    main_thread: Mutex<Option<ThreadId>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            primary: AtomicBool::new(true),
            concurrency: 4,
            main_thread: Mutex::new(Some(thread::current().id())),
        }
    }

    pub fn secondary() -> Self {
        let host = Self::new();
        host.set_primary(false);
        host
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// No thread counts as the main thread.
    pub fn without_main_thread(self) -> Self {
        *self.main_thread.lock() = None;
        self
    }

    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for FakeHost {
    fn is_primary_process(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }

    fn hardware_concurrency(&self) -> usize {
        self.concurrency
    }

    fn is_main_thread(&self) -> bool {
        *self.main_thread.lock() == Some(thread::current().id())
    }
}
