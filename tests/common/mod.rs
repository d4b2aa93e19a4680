#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use starter::Scheduler;
use starter::config::PoolSection;
use starter::stats::TaskStatistics;
use starter_test_utils::fake_host::FakeHost;

pub use starter_test_utils::init_tracing;

/// Generous bound for waits that are expected to complete.
pub const LONG: Duration = Duration::from_secs(10);

/// Scheduler whose main thread is the calling thread, with its own
/// statistics sink.
pub fn scheduler() -> Scheduler {
    scheduler_with_host(Arc::new(FakeHost::new()))
}

pub fn scheduler_with_host(host: Arc<FakeHost>) -> Scheduler {
    init_tracing();
    Scheduler::builder()
        .host(host)
        .pools(PoolSection {
            keep_alive_ms: 200,
            ..PoolSection::default()
        })
        .statistics(Arc::new(TaskStatistics::new()))
        .build()
        .expect("scheduler should build")
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
