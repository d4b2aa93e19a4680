// src/exec/pools.rs

//! Worker pools.
//!
//! - The IO pool is the blocking pool of a dedicated Tokio runtime: it grows
//!   on demand and tolerates bodies that block for a long time.
//! - The CPU pool is a fixed set of named OS threads pulling from a bounded
//!   `crossbeam` channel. Idle workers retire after `keep_alive` and are
//!   re-spawned on the next submission.
//! - When the CPU pool can neither start a worker nor queue a job, the job is
//!   handed to the overflow context (another unbounded blocking pool) instead
//!   of being rejected.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, error, warn};

use crate::config::model::PoolSection;
use crate::errors::Result;
use crate::task::Affinity;

/// A unit of work submitted to a pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// CPU pool size for a host with `concurrency` hardware threads:
/// `max(2, min(concurrency - 1, 5))`.
pub fn cpu_pool_size(concurrency: usize) -> usize {
    concurrency.saturating_sub(1).min(5).max(2)
}

/// The CPU, IO and overflow execution contexts.
pub struct WorkerPools {
    cpu: CpuPool,
    io: BlockingPool,
    /// Owns the runtime behind the CPU pool's overflow handle.
    _overflow: BlockingPool,
}

impl WorkerPools {
    pub fn new(cfg: &PoolSection, host_concurrency: usize) -> Result<Self> {
        let keep_alive = Duration::from_millis(cfg.keep_alive_ms);
        let io = BlockingPool::new(
            &format!("{}-io", cfg.thread_name_prefix),
            cfg.io_max_threads,
            keep_alive,
        )?;
        let overflow = BlockingPool::new(
            &format!("{}-overflow", cfg.thread_name_prefix),
            cfg.io_max_threads,
            keep_alive,
        )?;
        let cpu = CpuPool::new(
            &format!("{}-cpu", cfg.thread_name_prefix),
            cpu_pool_size(host_concurrency),
            cfg.cpu_queue_capacity,
            keep_alive,
            overflow.handle(),
        );

        debug!(
            cpu_workers = cpu.size,
            cpu_queue = cfg.cpu_queue_capacity,
            io_max_threads = cfg.io_max_threads,
            "worker pools created"
        );

        Ok(Self {
            cpu,
            io,
            _overflow: overflow,
        })
    }

    /// Submit `job` to the pool matching `affinity`.
    ///
    /// Main-thread affinity is a caller error; such jobs are routed to the IO
    /// pool with a warning rather than dropped.
    pub fn submit(&self, affinity: Affinity, job: Job) {
        match affinity {
            Affinity::Cpu => self.cpu.submit(job),
            Affinity::Io => self.io.submit(job),
            Affinity::MainThread => {
                warn!("main-thread job submitted to worker pools; running on IO pool");
                self.io.submit(job);
            }
        }
    }

    pub fn cpu_workers(&self) -> usize {
        self.cpu.size
    }

    /// Number of CPU jobs that were handed to the overflow context so far.
    pub fn cpu_overflowed(&self) -> usize {
        self.cpu.overflowed.load(Ordering::Relaxed)
    }
}

fn run_guarded(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("job panicked inside worker pool");
    }
}

/// Unbounded pool backed by a Tokio runtime's blocking threads.
struct BlockingPool {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl BlockingPool {
    fn new(name: &str, max_threads: usize, keep_alive: Duration) -> Result<Self> {
        let counter = Arc::new(AtomicUsize::new(1));
        let prefix = name.to_string();
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_threads.max(1))
            .thread_keep_alive(keep_alive)
            .thread_name_fn(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                format!("{prefix}-{n}")
            })
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    fn handle(&self) -> Handle {
        self.handle.clone()
    }

    fn submit(&self, job: Job) {
        drop(self.handle.spawn_blocking(move || run_guarded(job)));
    }
}

impl Drop for BlockingPool {
    fn drop(&mut self) {
        // Jobs may be parked on gates that will never open; don't wait for them.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Bounded CPU pool.
struct CpuPool {
    name: String,
    size: usize,
    keep_alive: Duration,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    live: Arc<AtomicUsize>,
    spawned: AtomicUsize,
    overflowed: AtomicUsize,
    overflow: Handle,
}

impl CpuPool {
    fn new(
        name: &str,
        size: usize,
        queue_capacity: usize,
        keep_alive: Duration,
        overflow: Handle,
    ) -> Self {
        let (tx, rx) = channel::bounded(queue_capacity.max(1));
        Self {
            name: name.to_string(),
            size,
            keep_alive,
            tx,
            rx,
            live: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
            overflowed: AtomicUsize::new(0),
            overflow,
        }
    }

    fn submit(&self, job: Job) {
        // Fewer workers than the core size: hand the job to a fresh worker.
        let job = match self.try_spawn_worker(Some(job)) {
            Ok(()) => return,
            Err(job) => job,
        };
        let Some(job) = job else { return };

        match self.tx.try_send(job) {
            Ok(()) => {
                // Every worker may have retired between the check above and the send.
                if self.live.load(Ordering::Acquire) == 0 {
                    let _ = self.try_spawn_worker(None);
                }
            }
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %self.name, "CPU pool saturated; running job on overflow context");
                drop(self.overflow.spawn_blocking(move || run_guarded(job)));
            }
        }
    }

    /// Reserve a worker slot and spawn a thread for it.
    ///
    /// Gives the job back when the pool is already at full size or the
    /// thread could not be created.
    fn try_spawn_worker(&self, first: Option<Job>) -> std::result::Result<(), Option<Job>> {
        if !claim_slot(&self.live, self.size) {
            return Err(first);
        }

        let n = self.spawned.fetch_add(1, Ordering::Relaxed) + 1;
        let worker = CpuWorker {
            rx: self.rx.clone(),
            live: Arc::clone(&self.live),
            size: self.size,
            keep_alive: self.keep_alive,
        };

        // The job is shared with the closure so it can be recovered if the
        // thread fails to start.
        let first = Arc::new(parking_lot::Mutex::new(first));
        let job_for_thread = Arc::clone(&first);
        let spawned = thread::Builder::new()
            .name(format!("{}-{n}", self.name))
            .spawn(move || {
                let first = job_for_thread.lock().take();
                worker.run(first);
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(err) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
                error!(pool = %self.name, error = %err, "failed to spawn CPU worker");
                Err(first.lock().take())
            }
        }
    }
}

fn claim_slot(live: &AtomicUsize, size: usize) -> bool {
    live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
        (n < size).then_some(n + 1)
    })
    .is_ok()
}

struct CpuWorker {
    rx: Receiver<Job>,
    live: Arc<AtomicUsize>,
    size: usize,
    keep_alive: Duration,
}

impl CpuWorker {
    fn run(self, first: Option<Job>) {
        if let Some(job) = first {
            run_guarded(job);
        }

        loop {
            match self.rx.recv_timeout(self.keep_alive) {
                Ok(job) => run_guarded(job),
                Err(RecvTimeoutError::Timeout) => {
                    self.live.fetch_sub(1, Ordering::AcqRel);
                    // A job may have been queued while we were retiring.
                    if !self.rx.is_empty() && claim_slot(&self.live, self.size) {
                        continue;
                    }
                    debug!("CPU worker idle; retiring");
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.live.fetch_sub(1, Ordering::AcqRel);
                    return;
                }
            }
        }
    }
}
