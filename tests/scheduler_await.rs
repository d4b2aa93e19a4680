// tests/scheduler_await.rs

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use starter::Scheduler;
use starter::dag::AwaitOutcome;
use starter::stats::TaskStatistics;
use starter::sync::Latch;
use starter::task::TaskId;
use starter_test_utils::builders::{EventLog, TestTask};
use starter_test_utils::fake_host::FakeHost;

use common::LONG;

#[test]
fn wait_returns_once_must_await_tasks_finish() {
    let log = EventLog::new();
    let db = TestTask::builder("db", &log).must_await().work_ms(30).build();
    let cache = TestTask::builder("cache", &log).cpu().must_await().after("db").build();
    let side = TestTask::builder("side", &log).build();

    let scheduler = common::scheduler();
    scheduler
        .register(db.clone())
        .register(cache.clone())
        .register(side.clone());
    let summary = scheduler.start().unwrap();
    assert_eq!(summary.must_await, 2);

    assert_eq!(scheduler.wait_for(LONG), AwaitOutcome::Completed);
    assert!(log.finished("db"));
    assert!(log.finished("cache"));
    assert!(scheduler.is_finished(&TaskId::from("cache")));
}

#[test]
fn main_thread_tasks_never_count_toward_the_barrier() {
    let log = EventLog::new();
    let ui = TestTask::builder("ui", &log).main_thread().must_await().build();

    let scheduler = common::scheduler();
    scheduler.register(ui.clone());
    let summary = scheduler.start().unwrap();

    assert_eq!(summary.must_await, 0);
    assert_eq!(summary.main_thread_tasks, 1);
    assert!(scheduler.wait_for(Duration::from_millis(1)).is_completed());
}

#[test]
fn timeout_is_reported_and_the_task_keeps_running() {
    let log = EventLog::new();
    let release = Arc::new(Latch::new(1));
    let stuck = TestTask::builder("stuck", &log)
        .must_await()
        .blocked_on(&release)
        .build();

    let scheduler = common::scheduler();
    scheduler.register(stuck.clone());
    scheduler.start().unwrap();

    let started = Instant::now();
    let outcome = scheduler.wait_for(Duration::from_millis(50));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(
        outcome,
        AwaitOutcome::TimedOut {
            pending: vec![TaskId::from("stuck")]
        }
    );
    assert!(!log.finished("stuck"));

    release.count_down();
    assert!(scheduler.wait_for(LONG).is_completed());
    assert!(log.finished("stuck"));
    assert_eq!(stuck.runs(), 1);
}

#[test]
fn wait_uses_the_configured_timeout() {
    common::init_tracing();
    let log = EventLog::new();
    let release = Arc::new(Latch::new(1));
    let stuck = TestTask::builder("stuck", &log)
        .must_await()
        .blocked_on(&release)
        .build();

    let scheduler = Scheduler::builder()
        .host(Arc::new(FakeHost::new()))
        .await_timeout(Duration::from_millis(40))
        .statistics(Arc::new(TaskStatistics::new()))
        .build()
        .unwrap();
    scheduler.register(stuck.clone());
    scheduler.start().unwrap();

    let started = Instant::now();
    assert!(!scheduler.wait().is_completed());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(40));
    assert!(waited < LONG);

    release.count_down();
    assert!(scheduler.wait_idle(LONG).is_completed());
}

#[test]
fn wait_from_another_thread_blocks_on_the_barrier() {
    let log = EventLog::new();
    let slow = TestTask::builder("slow", &log).cpu().must_await().work_ms(20).build();

    let scheduler = common::scheduler();
    scheduler.register(slow.clone());
    scheduler.start().unwrap();

    std::thread::scope(|scope| {
        let outcome = scope.spawn(|| scheduler.wait_for(LONG)).join().unwrap();
        assert!(outcome.is_completed());
    });
    assert!(log.finished("slow"));
}

#[test]
fn waiting_without_a_run_returns_immediately() {
    let scheduler = common::scheduler();
    assert!(scheduler.wait_for(Duration::ZERO).is_completed());
    assert!(scheduler.wait_idle(Duration::ZERO).is_completed());
    assert_eq!(scheduler.current_run_id(), None);
}

#[test]
fn unbounded_timeout_waits_until_done() {
    let log = EventLog::new();
    let slow = TestTask::builder("slow", &log).cpu().must_await().work_ms(20).build();
    let tail = TestTask::builder("tail", &log).after("slow").work_ms(5).build();

    let scheduler = common::scheduler();
    scheduler.register(slow.clone()).register(tail.clone());
    scheduler.start().unwrap();

    assert!(scheduler.wait_for(Duration::MAX).is_completed());
    assert!(log.finished("slow"));
    assert!(scheduler.wait_idle(Duration::MAX).is_completed());
    assert!(log.finished("tail"));
}

#[test]
fn unbounded_timeout_off_the_main_thread() {
    let log = EventLog::new();
    let slow = TestTask::builder("slow", &log).must_await().work_ms(20).build();

    let scheduler = common::scheduler();
    scheduler.register(slow.clone());
    scheduler.start().unwrap();

    std::thread::scope(|scope| {
        let waited = scope
            .spawn(|| {
                (
                    scheduler.wait_for(Duration::MAX),
                    scheduler.wait_idle(Duration::MAX),
                )
            })
            .join()
            .unwrap();
        assert!(waited.0.is_completed());
        assert!(waited.1.is_completed());
    });
}

#[test]
fn configured_timeout_may_be_unbounded() {
    common::init_tracing();
    let log = EventLog::new();
    let slow = TestTask::builder("slow", &log).must_await().work_ms(10).build();

    let scheduler = Scheduler::builder()
        .host(Arc::new(FakeHost::new()))
        .await_timeout(Duration::MAX)
        .statistics(Arc::new(TaskStatistics::new()))
        .build()
        .unwrap();
    scheduler.register(slow.clone());
    scheduler.start().unwrap();

    assert!(scheduler.wait().is_completed());
    assert!(log.finished("slow"));
}

#[test]
fn completions_do_not_queue_wakeups_while_nobody_pumps() {
    let log = EventLog::new();
    let scheduler = common::scheduler();

    for run in 0..3 {
        let name = format!("job-{run}");
        let task = TestTask::builder(&name, &log).cpu().must_await().work_ms(5).build();
        scheduler.register(task);
        scheduler.start().unwrap();

        std::thread::scope(|scope| {
            let waited = scope
                .spawn(|| (scheduler.wait_for(LONG), scheduler.wait_idle(LONG)))
                .join()
                .unwrap();
            assert!(waited.0.is_completed());
            assert!(waited.1.is_completed());
        });
        assert!(log.finished(&name));
        assert_eq!(scheduler.mailbox_backlog(), 0);
    }
}

#[test]
fn main_thread_wait_is_still_woken_by_completions() {
    let log = EventLog::new();
    let release = Arc::new(Latch::new(1));
    let gated = TestTask::builder("gated", &log)
        .must_await()
        .blocked_on(&release)
        .build();

    let scheduler = common::scheduler();
    scheduler.register(gated.clone());
    scheduler.start().unwrap();

    let opener = {
        let release = Arc::clone(&release);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            release.count_down();
        })
    };
    let started = Instant::now();
    assert!(scheduler.wait_for(LONG).is_completed());
    assert!(started.elapsed() < LONG);
    assert!(scheduler.wait_idle(LONG).is_completed());
    opener.join().unwrap();
    assert!(log.finished("gated"));
}
