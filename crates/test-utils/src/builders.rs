#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use starter::config::{ConfigFile, TaskConfig};
use starter::sync::Latch;
use starter::task::{Affinity, TailAction, Task, TaskCallback, TaskId};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: ConfigFile {
                task: BTreeMap::new(),
                ..ConfigFile::default()
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_await_timeout_ms(mut self, ms: u64) -> Self {
        self.config.scheduler.await_timeout_ms = ms;
        self
    }

    pub fn with_cpu_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.pools.cpu_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> ConfigFile {
        starter::config::validate_config(&self.config)
            .expect("Failed to build valid config from builder");
        self.config
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new() -> Self {
        Self {
            task: TaskConfig::default(),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.task.affinity = affinity;
        self
    }

    pub fn must_await(mut self) -> Self {
        self.task.must_await = true;
        self
    }

    pub fn work_ms(mut self, ms: u64) -> Self {
        self.task.work_ms = ms;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

impl Default for TaskConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub task: String,
    pub phase: Phase,
    pub thread: ThreadId,
}

/// Shared, ordered record of task starts and ends.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task: &str, phase: Phase) {
        self.0.lock().push(Event {
            task: task.to_string(),
            phase,
            thread: thread::current().id(),
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn position(&self, task: &str, phase: Phase) -> Option<usize> {
        self.0
            .lock()
            .iter()
            .position(|e| e.task == task && e.phase == phase)
    }

    pub fn started(&self, task: &str) -> bool {
        self.position(task, Phase::Start).is_some()
    }

    pub fn finished(&self, task: &str) -> bool {
        self.position(task, Phase::End).is_some()
    }

    /// Task names in the order they reached `phase`.
    pub fn order(&self, phase: Phase) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.phase == phase)
            .map(|e| e.task.clone())
            .collect()
    }

    pub fn thread_of(&self, task: &str) -> Option<ThreadId> {
        self.0
            .lock()
            .iter()
            .find(|e| e.task == task && e.phase == Phase::Start)
            .map(|e| e.thread)
    }
}

/// A task that records its start and end in an [`EventLog`].
pub struct TestTask {
    id: TaskId,
    deps: Vec<TaskId>,
    affinity: Affinity,
    priority: i32,
    must_await: bool,
    main_process_only: bool,
    needs_callback: bool,
    run_as_soon: bool,
    work: Duration,
    fail: bool,
    panic: bool,
    release: Option<Arc<Latch>>,
    tail_runs: Option<Arc<AtomicUsize>>,
    runs: AtomicUsize,
    callback: Mutex<Option<TaskCallback>>,
    log: EventLog,
}

impl TestTask {
    pub fn builder(id: &str, log: &EventLog) -> TestTaskBuilder {
        TestTaskBuilder {
            task: TestTask {
                id: TaskId::from(id),
                deps: Vec::new(),
                affinity: Affinity::Io,
                priority: starter::task::DEFAULT_PRIORITY,
                must_await: false,
                main_process_only: true,
                needs_callback: false,
                run_as_soon: false,
                work: Duration::ZERO,
                fail: false,
                panic: false,
                release: None,
                tail_runs: None,
                runs: AtomicUsize::new(0),
                callback: Mutex::new(None),
                log: log.clone(),
            },
        }
    }

    /// How many times the body ran.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// The completion handle bound by the scheduler, if any.
    pub fn callback(&self) -> Option<TaskCallback> {
        self.callback.lock().clone()
    }
}

impl Task for TestTask {
    fn id(&self) -> TaskId {
        self.id.clone()
    }

    fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.log.record(self.id.as_str(), Phase::Start);
        if let Some(release) = &self.release {
            release.wait();
        }
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.log.record(self.id.as_str(), Phase::End);
        if self.panic {
            panic!("test task '{}' panicked", self.id);
        }
        if self.fail {
            anyhow::bail!("test task '{}' failed", self.id);
        }
        Ok(())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn affinity(&self) -> Affinity {
        self.affinity
    }

    fn depends_on(&self) -> Vec<TaskId> {
        self.deps.clone()
    }

    fn must_await(&self) -> bool {
        self.must_await
    }

    fn main_process_only(&self) -> bool {
        self.main_process_only
    }

    fn needs_callback(&self) -> bool {
        self.needs_callback
    }

    fn run_as_soon(&self) -> bool {
        self.run_as_soon
    }

    fn tail_action(&self) -> Option<TailAction> {
        let counter = Arc::clone(self.tail_runs.as_ref()?);
        Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn bind_callback(&self, callback: TaskCallback) {
        *self.callback.lock() = Some(callback);
    }
}

/// Builder for [`TestTask`].
pub struct TestTaskBuilder {
    task: TestTask,
}

impl TestTaskBuilder {
    pub fn after(mut self, dep: &str) -> Self {
        self.task.deps.push(TaskId::from(dep));
        self
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.task.affinity = affinity;
        self
    }

    pub fn cpu(self) -> Self {
        self.affinity(Affinity::Cpu)
    }

    pub fn main_thread(self) -> Self {
        self.affinity(Affinity::MainThread)
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn must_await(mut self) -> Self {
        self.task.must_await = true;
        self
    }

    pub fn any_process(mut self) -> Self {
        self.task.main_process_only = false;
        self
    }

    pub fn needs_callback(mut self) -> Self {
        self.task.needs_callback = true;
        self
    }

    pub fn run_as_soon(mut self) -> Self {
        self.task.run_as_soon = true;
        self
    }

    pub fn work_ms(mut self, ms: u64) -> Self {
        self.task.work = Duration::from_millis(ms);
        self
    }

    pub fn failing(mut self) -> Self {
        self.task.fail = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.task.panic = true;
        self
    }

    /// Body blocks until `release` opens.
    pub fn blocked_on(mut self, release: &Arc<Latch>) -> Self {
        self.task.release = Some(Arc::clone(release));
        self
    }

    /// Tail action increments `counter`.
    pub fn tail_counter(mut self, counter: &Arc<AtomicUsize>) -> Self {
        self.task.tail_runs = Some(Arc::clone(counter));
        self
    }

    pub fn build(self) -> Arc<TestTask> {
        Arc::new(self.task)
    }
}
