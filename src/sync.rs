// src/sync.rs

//! Counting latch used for per-task gates and the run-wide barrier.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// A count-down latch.
///
/// Waiters block on a condition variable until the count reaches zero. The
/// count saturates at zero: extra `count_down` calls are logged and ignored.
#[derive(Debug)]
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            zero: Condvar::new(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Decrement the count. Returns `true` if this call opened the latch.
    pub fn count_down(&self) -> bool {
        let mut count = self.count.lock();
        match *count {
            0 => {
                warn!("latch counted down below zero; ignoring");
                false
            }
            1 => {
                *count = 0;
                self.zero.notify_all();
                true
            }
            _ => {
                *count -= 1;
                false
            }
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }

    /// Block until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` if the latch is open.
    /// A timeout too large to express as an `Instant` waits without bound.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };
        let mut count = self.count.lock();
        while *count > 0 {
            if self.zero.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}
