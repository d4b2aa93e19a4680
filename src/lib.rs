// src/lib.rs

//! Startup task scheduler.
//!
//! Register [`Task`](task::Task)s with a [`Scheduler`], call
//! [`Scheduler::start`] from the main thread, and optionally
//! [`Scheduler::wait`] for the ones marked `must_await`. Tasks run on the
//! main thread, a bounded CPU pool or a growable IO pool, each one only after
//! everything it depends on has finished.

pub mod cli;
pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod host;
pub mod idle;
pub mod logging;
pub mod plan;
pub mod stats;
pub mod sync;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{AwaitOutcome, DependencyGraph, GraphNode};
use crate::host::ProcessHost;
use crate::stats::TaskStatistics;
use crate::task::TaskId;

pub use crate::dag::Scheduler;
pub use crate::idle::IdleScheduler;

/// Situation label active while the startup run executes.
pub const SITUATION_STARTUP: &str = "startup";
/// Situation label switched to once the run has been waited for.
pub const SITUATION_READY: &str = "ready";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - simulated tasks from `[task.*]`
/// - scheduler and pools
/// - the bounded wait and the final summary
pub fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let mut cfg = load_and_validate(&config_path)?;
    if let Some(ms) = args.timeout_ms {
        cfg.scheduler.await_timeout_ms = ms;
    }

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    let host = ProcessHost::current().with_primary_process(!args.secondary_process);
    let statistics = TaskStatistics::global();
    let scheduler = Scheduler::builder()
        .host(Arc::new(host))
        .scheduler_section(cfg.scheduler.clone())
        .pools(cfg.pools.clone())
        .statistics(Arc::clone(&statistics))
        .build()?;

    for task in plan::build_tasks(&cfg) {
        scheduler.register(task);
    }

    statistics.set_situation(SITUATION_STARTUP);
    let summary = scheduler.start()?;
    let outcome = scheduler.wait();
    statistics.set_situation(SITUATION_READY);

    // Let stragglers that nobody waited on finish before printing.
    let idle = scheduler.wait_idle(Duration::from_millis(cfg.scheduler.await_timeout_ms));

    println!("starter run {}", summary.run_id);
    println!("  dispatch order:");
    for id in &summary.order {
        let state = scheduler
            .state_of(id)
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "unknown".to_string());
        println!("    - {id}: {state}");
    }
    println!(
        "  pool: {}  main: {}  deferred: {}  skipped: {}",
        summary.pool_tasks, summary.main_thread_tasks, summary.deferred_tasks, summary.skipped
    );
    match outcome {
        AwaitOutcome::Completed => println!("  must-await tasks: completed"),
        AwaitOutcome::TimedOut { pending } => {
            println!("  must-await tasks: timed out, pending {pending:?}")
        }
    }
    if let AwaitOutcome::TimedOut { pending } = idle {
        println!("  still running at exit: {pending:?}");
    }
    for snapshot in statistics.snapshots() {
        if !snapshot.situation.is_empty() {
            println!("  completed during {}: {}", snapshot.situation, snapshot.completed);
        }
    }

    info!(run_id = summary.run_id, "starter finished");
    Ok(())
}

/// Print tasks, their settings and the order they would be dispatched in.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let names: Vec<&String> = cfg.task.keys().collect();
    let nodes: Vec<GraphNode> = cfg
        .task
        .iter()
        .map(|(name, task)| {
            GraphNode::new(
                TaskId::from(name.as_str()),
                task.after.iter().map(|d| TaskId::from(d.as_str())),
            )
        })
        .collect();
    let graph = DependencyGraph::build(&nodes)?;
    let topo = graph.topological_order()?;
    let run_as_soon: Vec<bool> = cfg.task.values().map(|t| t.run_as_soon).collect();
    let order = graph.dispatch_order(&topo, &run_as_soon);

    println!("starter dry-run");
    println!(
        "  scheduler.await_timeout_ms = {}",
        cfg.scheduler.await_timeout_ms
    );
    println!("  pools.cpu_queue_capacity = {}", cfg.pools.cpu_queue_capacity);
    println!("  pools.io_max_threads = {}", cfg.pools.io_max_threads);
    println!();

    println!("tasks ({}), in dispatch order:", cfg.task.len());
    for i in order {
        let name = names[i];
        let task = &cfg.task[name];
        println!("  - {name}");
        println!("      affinity: {}", task.affinity);
        if !task.after.is_empty() {
            println!("      after: {:?}", task.after);
        }
        if task.must_await {
            println!("      must_await: true");
        }
        if task.run_as_soon {
            println!("      run_as_soon: true");
        }
        if !task.effective_main_process_only() {
            println!("      main_process_only: false");
        }
        if task.work_ms > 0 {
            println!("      work_ms: {}", task.work_ms);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
