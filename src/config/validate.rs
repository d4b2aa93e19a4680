// src/config/validate.rs

use crate::config::model::ConfigFile;
use crate::dag::graph::{DependencyGraph, GraphNode};
use crate::errors::{Result, StarterError};
use crate::task::TaskId;

/// Check a loaded config before anything is built from it.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    validate_scheduler(cfg)?;
    validate_pools(cfg)?;
    validate_tasks(cfg)?;
    Ok(())
}

fn validate_scheduler(cfg: &ConfigFile) -> Result<()> {
    if cfg.scheduler.await_timeout_ms == 0 {
        return Err(StarterError::ConfigError(
            "[scheduler].await_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_pools(cfg: &ConfigFile) -> Result<()> {
    let pools = &cfg.pools;
    if pools.cpu_queue_capacity == 0 {
        return Err(StarterError::ConfigError(
            "[pools].cpu_queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    if pools.io_max_threads == 0 {
        return Err(StarterError::ConfigError(
            "[pools].io_max_threads must be >= 1 (got 0)".to_string(),
        ));
    }
    if pools.thread_name_prefix.trim().is_empty() {
        return Err(StarterError::ConfigError(
            "[pools].thread_name_prefix must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Run the `[task.*]` tables through the same graph the scheduler uses, so
/// a config that validates here cannot fail `start()` on its structure.
fn validate_tasks(cfg: &ConfigFile) -> Result<()> {
    let nodes: Vec<GraphNode> = cfg
        .task
        .iter()
        .map(|(name, task)| {
            GraphNode::new(
                TaskId::from(name.as_str()),
                task.after.iter().map(|dep| TaskId::from(dep.as_str())),
            )
        })
        .collect();

    let graph = DependencyGraph::build(&nodes)?;
    graph.topological_order()?;
    Ok(())
}
