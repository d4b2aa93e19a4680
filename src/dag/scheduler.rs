// src/dag/scheduler.rs

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::model::{ConfigFile, PoolSection, SchedulerSection};
use crate::dag::graph::{DependencyGraph, GraphNode};
use crate::dag::outcome::{AwaitOutcome, RunSummary};
use crate::dag::run_state::{
    Mailbox, MainSignal, RunState, RunTask, SkipReason, TaskCallback, TaskOutcome, TaskState,
};
use crate::errors::{Result, StarterError};
use crate::exec::pools::WorkerPools;
use crate::exec::runner::{run_detached, run_main_task, run_pool_job};
use crate::host::{Host, ProcessHost};
use crate::stats::TaskStatistics;
use crate::task::{TaskId, TaskRef};

/// Scheduler owns the worker pools, the registered tasks and the state of
/// the most recent run.
///
/// It is responsible for:
/// - turning the registered tasks into a dependency graph and a dispatch order
/// - handing pool tasks to the CPU or IO pool, gated on their dependencies
/// - running main-thread tasks on the thread that called [`Scheduler::start`]
/// - the run-wide barrier behind [`Scheduler::wait_for`]
/// - remembering which tasks finished across runs
///
/// The main thread never parks on a task gate directly. It blocks on its
/// mailbox instead, which receives a signal whenever a main-thread task
/// becomes ready or a must-await task finishes.
pub struct Scheduler {
    host: Arc<dyn Host>,
    pools: WorkerPools,
    statistics: Arc<TaskStatistics>,
    await_timeout: Duration,

    registered: Mutex<Vec<TaskRef>>,
    /// Identities finished in this or an earlier run.
    finished: Arc<Mutex<HashSet<TaskId>>>,
    current: Mutex<Option<Arc<RunState>>>,
    /// Main-thread tasks handed to `execute_now` from another thread.
    detached_main: Mutex<VecDeque<TaskRef>>,

    starting: AtomicBool,
    run_counter: AtomicU64,

    mailbox: Mailbox,
    mailbox_rx: Receiver<MainSignal>,
}

/// Builder for [`Scheduler`].
#[derive(Default)]
pub struct SchedulerBuilder {
    host: Option<Arc<dyn Host>>,
    scheduler: SchedulerSection,
    pools: PoolSection,
    statistics: Option<Arc<TaskStatistics>>,
}

impl SchedulerBuilder {
    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn scheduler_section(mut self, section: SchedulerSection) -> Self {
        self.scheduler = section;
        self
    }

    pub fn pools(mut self, section: PoolSection) -> Self {
        self.pools = section;
        self
    }

    /// Shorthand for the `[scheduler] await_timeout_ms` setting.
    pub fn await_timeout(mut self, timeout: Duration) -> Self {
        self.scheduler.await_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Counter sink; defaults to [`TaskStatistics::global`].
    pub fn statistics(mut self, statistics: Arc<TaskStatistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Build the scheduler and its worker pools.
    ///
    /// Without an explicit host, the calling thread becomes the main thread.
    pub fn build(self) -> Result<Scheduler> {
        let host: Arc<dyn Host> = match self.host {
            Some(host) => host,
            None => Arc::new(ProcessHost::current()),
        };
        let pools = WorkerPools::new(&self.pools, host.hardware_concurrency())?;
        let (mailbox_tx, mailbox_rx) = channel::unbounded();

        info!(
            primary = host.is_primary_process(),
            concurrency = host.hardware_concurrency(),
            cpu_workers = pools.cpu_workers(),
            await_timeout_ms = self.scheduler.await_timeout_ms,
            "scheduler created"
        );

        Ok(Scheduler {
            host,
            pools,
            statistics: self.statistics.unwrap_or_else(TaskStatistics::global),
            await_timeout: Duration::from_millis(self.scheduler.await_timeout_ms),
            registered: Mutex::new(Vec::new()),
            finished: Arc::new(Mutex::new(HashSet::new())),
            current: Mutex::new(None),
            detached_main: Mutex::new(VecDeque::new()),
            starting: AtomicBool::new(false),
            run_counter: AtomicU64::new(0),
            mailbox: Mailbox::new(mailbox_tx),
            mailbox_rx,
        })
    }
}

/// Clears the `starting` flag when `start` returns, including on error.
struct StartingGuard<'a>(&'a AtomicBool);

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    /// Construct a scheduler from the `[scheduler]` and `[pools]` sections of
    /// a loaded [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile, host: Arc<dyn Host>) -> Result<Self> {
        Self::builder()
            .host(host)
            .scheduler_section(cfg.scheduler.clone())
            .pools(cfg.pools.clone())
            .build()
    }

    /// Record `task` for the next run.
    pub fn register(&self, task: TaskRef) -> &Self {
        debug!(task = %task.id(), affinity = %task.affinity(), "task registered");
        self.registered.lock().push(task);
        self
    }

    /// Number of tasks waiting for the next `start`.
    pub fn registered_count(&self) -> usize {
        self.registered.lock().len()
    }

    /// Sort the registered tasks and dispatch them.
    ///
    /// Main-thread tasks without `needs_callback` run inline before this
    /// returns; everything else may still be running. Configuration problems
    /// (cycles, unknown or duplicate identities) are reported before any task
    /// body executes, and the registrations are kept so the caller can fix
    /// them up and retry.
    pub fn start(&self) -> Result<RunSummary> {
        if !self.host.is_main_thread() {
            return Err(StarterError::NotMainThread);
        }
        if self.starting.swap(true, Ordering::AcqRel) {
            return Err(StarterError::AlreadyRunning(
                self.run_counter.load(Ordering::Acquire),
            ));
        }
        let _guard = StartingGuard(&self.starting);

        if let Some(run) = self.current_run() {
            if !run.remaining.is_open() {
                return Err(StarterError::AlreadyRunning(run.run_id));
            }
        }

        // Every task of the previous run has finished, so nothing left in the
        // mailbox still needs handling.
        let stale = self.mailbox_rx.try_iter().count();
        if stale > 0 {
            debug!(stale, "dropped stale mailbox signals");
        }

        let tasks: Vec<TaskRef> = self.registered.lock().clone();
        let started = Instant::now();
        let graph = self.build_graph(&tasks)?;
        debug!(graph = %graph.describe(), "task graph");

        let topo = graph.topological_order()?;
        let run_as_soon: Vec<bool> = tasks.iter().map(|t| t.run_as_soon()).collect();
        let order = graph.dispatch_order(&topo, &run_as_soon);

        // From here on the run is committed.
        self.registered.lock().clear();
        {
            let mut finished = self.finished.lock();
            for task in &tasks {
                finished.remove(&task.id());
            }
        }

        let run_id = self.run_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let run_tasks: Vec<RunTask> = tasks
            .iter()
            .map(|task| {
                let main_thread = task.affinity().is_main_thread();
                RunTask {
                    task: Arc::clone(task),
                    id: task.id(),
                    must_await: task.must_await() && !main_thread,
                    main_thread,
                    deferred: main_thread && task.needs_callback(),
                }
            })
            .collect();
        let dependents = (0..graph.len()).map(|i| graph.dependents_of(i)).collect();
        let gate_counts = (0..graph.len()).map(|i| graph.in_degree(i)).collect();

        let run = Arc::new(RunState::new(
            run_id,
            run_tasks,
            dependents,
            gate_counts,
            Arc::clone(&self.finished),
            self.mailbox.clone(),
            Arc::clone(&self.statistics),
        ));
        *self.current.lock() = Some(Arc::clone(&run));

        let mut summary = RunSummary {
            run_id,
            order: order.iter().map(|&i| run.tasks[i].id.clone()).collect(),
            must_await: run.barrier.count(),
            ..RunSummary::default()
        };

        info!(
            run_id,
            tasks = run.tasks.len(),
            edges = graph.edge_count(),
            must_await = summary.must_await,
            analyse_ms = started.elapsed().as_millis() as u64,
            "dispatching run"
        );

        let primary = self.host.is_primary_process();
        let mut inline = Vec::new();
        for &i in &order {
            let entry = &run.tasks[i];
            run.advance(i, TaskState::Dispatched);

            if !primary && entry.task.main_process_only() {
                debug!(task = %entry.id, "secondary process; skipping main-process-only task");
                run.mark_done(i, TaskOutcome::Skipped(SkipReason::NotPrimaryProcess));
                summary.skipped += 1;
                continue;
            }

            if entry.deferred {
                entry.task.bind_callback(TaskCallback::new(&run, i));
                // Later gate openings post their own ready signal.
                if graph.in_degree(i) == 0 {
                    run.post_ready(i);
                }
                summary.deferred_tasks += 1;
            } else if entry.main_thread {
                inline.push(i);
                summary.main_thread_tasks += 1;
            } else {
                let job_run = Arc::clone(&run);
                self.pools.submit(
                    entry.task.affinity(),
                    Box::new(move || run_pool_job(job_run, i)),
                );
                summary.pool_tasks += 1;
            }
        }

        for i in inline {
            if run.state(i).is_finished() {
                continue;
            }
            let waited = Instant::now();
            if !run.gates[i].is_open() {
                run.advance(i, TaskState::Waiting);
                self.pump_until(|| run.gates[i].is_open(), None);
            }
            if run.state(i).is_finished() {
                continue;
            }
            if run.is_cancelled() {
                run.mark_done(i, TaskOutcome::Skipped(SkipReason::Cancelled));
                continue;
            }
            run_main_task(&run, i, waited.elapsed());
        }

        // Deferred tasks whose gate is already open can start right away.
        self.run_pending_main_tasks();

        info!(
            run_id,
            pool_tasks = summary.pool_tasks,
            main_thread_tasks = summary.main_thread_tasks,
            deferred_tasks = summary.deferred_tasks,
            skipped = summary.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "start() returned to caller"
        );
        Ok(summary)
    }

    /// Resolve dependencies and build the graph for `tasks`.
    ///
    /// A dependency on a task that finished in an earlier run and is not
    /// registered again is already satisfied and adds no edge.
    fn build_graph(&self, tasks: &[TaskRef]) -> Result<DependencyGraph> {
        let registered: HashSet<TaskId> = tasks.iter().map(|t| t.id()).collect();
        let finished = self.finished.lock().clone();

        let nodes: Vec<GraphNode> = tasks
            .iter()
            .map(|task| {
                let id = task.id();
                let deps = task.depends_on().into_iter().filter(|dep| {
                    let satisfied = !registered.contains(dep) && finished.contains(dep);
                    if satisfied {
                        debug!(task = %id, dependency = %dep, "dependency finished in an earlier run");
                    }
                    !satisfied
                });
                GraphNode::new(id.clone(), deps)
            })
            .collect();

        DependencyGraph::build(&nodes)
    }

    /// Block until every must-await pool task of the current run finished or
    /// `timeout` elapsed.
    ///
    /// On the main thread this keeps running deferred main-thread work while
    /// it waits. A timeout is logged and reported, the tasks keep running.
    pub fn wait_for(&self, timeout: Duration) -> AwaitOutcome {
        let Some(run) = self.current_run() else {
            return AwaitOutcome::Completed;
        };
        let started = Instant::now();

        let done = if self.host.is_main_thread() {
            self.pump_until(|| run.barrier.is_open(), started.checked_add(timeout))
        } else {
            run.barrier.wait_timeout(timeout)
        };

        if done {
            debug!(
                run_id = run.run_id,
                waited_ms = started.elapsed().as_millis() as u64,
                "must-await tasks finished"
            );
            AwaitOutcome::Completed
        } else {
            let pending = run.pending_must_await();
            warn!(
                run_id = run.run_id,
                timeout_ms = timeout.as_millis() as u64,
                ?pending,
                "timed out waiting for must-await tasks"
            );
            AwaitOutcome::TimedOut { pending }
        }
    }

    /// [`Scheduler::wait_for`] with the configured timeout.
    pub fn wait(&self) -> AwaitOutcome {
        self.wait_for(self.await_timeout)
    }

    /// Block until every task of the current run finished or `timeout`
    /// elapsed.
    pub fn wait_idle(&self, timeout: Duration) -> AwaitOutcome {
        let Some(run) = self.current_run() else {
            return AwaitOutcome::Completed;
        };

        let done = if self.host.is_main_thread() {
            self.pump_until(|| run.remaining.is_open(), Instant::now().checked_add(timeout))
        } else {
            run.remaining.wait_timeout(timeout)
        };

        if done {
            AwaitOutcome::Completed
        } else {
            let pending = run.unfinished();
            warn!(run_id = run.run_id, ?pending, "timed out waiting for run to finish");
            AwaitOutcome::TimedOut { pending }
        }
    }

    /// Stop tasks of the current run that have not started their body yet.
    ///
    /// Running bodies are not interrupted. Skipped tasks still count as
    /// finished, so waits and dependents make progress.
    pub fn cancel(&self) {
        let Some(run) = self.current_run() else {
            return;
        };
        if !run.cancelled.swap(true, Ordering::AcqRel) {
            info!(run_id = run.run_id, pending = ?run.unfinished(), "run cancelled");
        }
    }

    /// Mark a task of the current run as successfully finished.
    ///
    /// Returns `false` if the task is not part of the current run or has
    /// already finished.
    pub fn mark_done(&self, id: &TaskId) -> bool {
        let Some(run) = self.current_run() else {
            return false;
        };
        match run.index.get(id) {
            Some(&i) => run.mark_done(i, TaskOutcome::Succeeded),
            None => false,
        }
    }

    /// Execute a single task right away, outside of any graph.
    ///
    /// Dependencies are ignored and nothing is gated on the task. Main-thread
    /// tasks run inline when called from the main thread and are queued for
    /// the next mailbox pump otherwise.
    pub fn execute_now(&self, task: TaskRef) {
        if !self.host.is_primary_process() && task.main_process_only() {
            debug!(task = %task.id(), "secondary process; not executing main-process-only task");
            return;
        }

        let affinity = task.affinity();
        if affinity.is_main_thread() {
            if self.host.is_main_thread() {
                run_detached(task.as_ref(), &self.statistics);
            } else {
                self.detached_main.lock().push_back(task);
                self.mailbox.wake();
            }
            return;
        }

        let statistics = Arc::clone(&self.statistics);
        self.pools.submit(
            affinity,
            Box::new(move || {
                run_detached(task.as_ref(), &statistics);
            }),
        );
    }

    /// Run whatever main-thread work is ready, without blocking.
    ///
    /// Lets a host event loop make progress on deferred tasks between its own
    /// events. Returns the number of task bodies executed; always zero off
    /// the main thread.
    pub fn run_pending_main_tasks(&self) -> usize {
        if !self.host.is_main_thread() {
            warn!("run_pending_main_tasks() called off the main thread; ignoring");
            return 0;
        }
        let mut executed = self.drain_detached();
        while let Ok(signal) = self.mailbox_rx.try_recv() {
            if self.handle_signal(signal) {
                executed += 1;
            }
        }
        executed
    }

    /// State of `id` in the current run.
    pub fn state_of(&self, id: &TaskId) -> Option<TaskState> {
        let run = self.current_run()?;
        run.index.get(id).map(|&i| run.state(i))
    }

    /// Whether `id` finished in this or an earlier run.
    pub fn is_finished(&self, id: &TaskId) -> bool {
        self.finished.lock().contains(id)
    }

    /// Signals queued for the main thread that no pump has handled yet.
    pub fn mailbox_backlog(&self) -> usize {
        self.mailbox_rx.len()
    }

    pub fn current_run_id(&self) -> Option<u64> {
        self.current_run().map(|run| run.run_id)
    }

    pub fn statistics(&self) -> &Arc<TaskStatistics> {
        &self.statistics
    }

    pub fn pools(&self) -> &WorkerPools {
        &self.pools
    }

    fn current_run(&self) -> Option<Arc<RunState>> {
        self.current.lock().clone()
    }

    /// Handle mailbox signals until `cond` holds or `deadline` passes.
    /// `None` waits without bound.
    ///
    /// Every state change `cond` can observe is followed by a signal while
    /// the pump is registered, so blocking on the channel cannot miss a
    /// wake-up. Returns the final value of `cond`.
    fn pump_until(&self, cond: impl Fn() -> bool, deadline: Option<Instant>) -> bool {
        let _pumping = self.mailbox.pumping();
        loop {
            self.drain_detached();
            if cond() {
                return true;
            }

            let signal = match deadline {
                Some(deadline) => match self.mailbox_rx.recv_deadline(deadline) {
                    Ok(signal) => signal,
                    Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                        return cond();
                    }
                },
                None => match self.mailbox_rx.recv() {
                    Ok(signal) => signal,
                    Err(_) => return cond(),
                },
            };
            self.handle_signal(signal);
        }
    }

    /// Returns `true` if a task body ran.
    fn handle_signal(&self, signal: MainSignal) -> bool {
        let MainSignal::Ready { run_id, index } = signal else {
            return false;
        };
        let Some(run) = self.current_run().filter(|run| run.run_id == run_id) else {
            debug!(run_id, index, "ready signal for a stale run; ignoring");
            return false;
        };

        let entry = &run.tasks[index];
        // Inline tasks are picked up by the loop in `start`.
        if !entry.deferred || run.state(index) != TaskState::Dispatched {
            return false;
        }
        if run.is_cancelled() {
            run.mark_done(index, TaskOutcome::Skipped(SkipReason::Cancelled));
            return false;
        }

        run_main_task(&run, index, run.started_at.elapsed())
    }

    fn drain_detached(&self) -> usize {
        let mut executed = 0;
        loop {
            let Some(task) = self.detached_main.lock().pop_front() else {
                return executed;
            };
            run_detached(task.as_ref(), &self.statistics);
            executed += 1;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registered", &self.registered_count())
            .field("current_run_id", &self.current_run_id())
            .field("await_timeout", &self.await_timeout)
            .finish_non_exhaustive()
    }
}
