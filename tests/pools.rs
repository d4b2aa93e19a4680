// tests/pools.rs

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use starter::config::PoolSection;
use starter::exec::{WorkerPools, cpu_pool_size};
use starter::sync::Latch;
use starter::task::Affinity;

use common::{LONG, wait_until};

fn section(queue: usize, keep_alive_ms: u64) -> PoolSection {
    PoolSection {
        cpu_queue_capacity: queue,
        keep_alive_ms,
        io_max_threads: 8,
        thread_name_prefix: "test".to_string(),
    }
}

#[test]
fn cpu_pool_size_is_clamped_between_two_and_five() {
    assert_eq!(cpu_pool_size(1), 2);
    assert_eq!(cpu_pool_size(2), 2);
    assert_eq!(cpu_pool_size(3), 2);
    assert_eq!(cpu_pool_size(4), 3);
    assert_eq!(cpu_pool_size(6), 5);
    assert_eq!(cpu_pool_size(64), 5);
}

#[test]
fn saturated_cpu_pool_overflows_instead_of_dropping() {
    common::init_tracing();
    // Two workers, one queue slot.
    let pools = WorkerPools::new(&section(1, 5_000), 3).unwrap();
    assert_eq!(pools.cpu_workers(), 2);

    let gate = Arc::new(Latch::new(1));
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let gate = Arc::clone(&gate);
        let done = Arc::clone(&done);
        pools.submit(
            Affinity::Cpu,
            Box::new(move || {
                gate.wait();
                done.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    // Two jobs went straight to fresh workers, one was queued.
    assert_eq!(pools.cpu_overflowed(), 2);

    gate.count_down();
    assert!(wait_until(LONG, || done.load(Ordering::SeqCst) == 5));
}

#[test]
fn retired_cpu_workers_are_replaced_on_demand() {
    common::init_tracing();
    let pools = WorkerPools::new(&section(4, 20), 4).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    for round in 1..=2 {
        let counter = Arc::clone(&done);
        pools.submit(
            Affinity::Cpu,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(wait_until(LONG, || done.load(Ordering::SeqCst) == round));
        // Long enough for the worker to retire.
        thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(pools.cpu_overflowed(), 0);
}

#[test]
fn pool_threads_carry_pool_names() {
    common::init_tracing();
    let pools = WorkerPools::new(&section(4, 1_000), 4).unwrap();
    let names = Arc::new(Mutex::new(Vec::new()));

    for affinity in [Affinity::Cpu, Affinity::Io] {
        let names = Arc::clone(&names);
        pools.submit(
            affinity,
            Box::new(move || {
                let name = thread::current().name().unwrap_or_default().to_string();
                names.lock().push(name);
            }),
        );
    }
    assert!(wait_until(LONG, || names.lock().len() == 2));

    let names = names.lock().clone();
    assert!(names.iter().any(|n| n.starts_with("test-cpu-")), "{names:?}");
    assert!(names.iter().any(|n| n.starts_with("test-io-")), "{names:?}");
}

#[test]
fn panicking_job_does_not_kill_the_worker() {
    common::init_tracing();
    let pools = WorkerPools::new(&section(4, 1_000), 3).unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    pools.submit(Affinity::Cpu, Box::new(|| panic!("job failure")));
    for _ in 0..4 {
        let done = Arc::clone(&done);
        pools.submit(
            Affinity::Cpu,
            Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    assert!(wait_until(LONG, || done.load(Ordering::SeqCst) == 4));
}
