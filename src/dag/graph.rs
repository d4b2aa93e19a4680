// src/dag/graph.rs

use std::collections::{HashMap, VecDeque};

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::errors::{Result, StarterError};
use crate::task::TaskId;

/// One registered task as seen by the graph: its identity and the identities
/// it declared as dependencies.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: TaskId,
    pub deps: Vec<TaskId>,
}

impl GraphNode {
    pub fn new(id: impl Into<TaskId>, deps: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            id: id.into(),
            deps: deps.into_iter().collect(),
        }
    }
}

/// Dependency graph over registration indices `0..N`.
///
/// Edge direction is producer -> consumer: for `B` declaring a dependency on
/// `A` we add `A -> B`. Node `i` of the underlying graph is always the task
/// registered at position `i`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, usize>,
}

impl DependencyGraph {
    /// Build the graph, resolving every declared dependency to an index.
    ///
    /// Fails on duplicate identities, self-dependencies and dependencies that
    /// do not name a node in `nodes`. Repeated declarations of the same
    /// dependency collapse into one edge.
    pub fn build(nodes: &[GraphNode]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(nodes.len(), nodes.len());
        let mut index = HashMap::with_capacity(nodes.len());

        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(StarterError::DuplicateTask(node.id.clone()));
            }
            graph.add_node(node.id.clone());
        }

        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.deps {
                if *dep == node.id {
                    return Err(StarterError::SelfDependency(node.id.clone()));
                }
                let Some(&producer) = index.get(dep) else {
                    return Err(StarterError::UnknownDependency {
                        task: node.id.clone(),
                        dependency: dep.clone(),
                    });
                };
                graph.update_edge(NodeIndex::new(producer), NodeIndex::new(i), ());
            }
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "dependency graph built"
        );

        Ok(Self { graph, index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn id_of(&self, idx: usize) -> &TaskId {
        &self.graph[NodeIndex::new(idx)]
    }

    pub fn index_of(&self, id: &TaskId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Indices of the tasks `idx` depends on, ascending.
    pub fn dependencies_of(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Incoming)
    }

    /// Indices of the tasks that depend on `idx`, ascending.
    pub fn dependents_of(&self, idx: usize) -> Vec<usize> {
        self.neighbors(idx, Direction::Outgoing)
    }

    pub fn in_degree(&self, idx: usize) -> usize {
        self.graph
            .neighbors_directed(NodeIndex::new(idx), Direction::Incoming)
            .count()
    }

    /// Whether any other task depends on `idx`.
    pub fn is_depended_on(&self, idx: usize) -> bool {
        self.graph
            .neighbors_directed(NodeIndex::new(idx), Direction::Outgoing)
            .next()
            .is_some()
    }

    /// Tasks without dependencies, in registration order.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.in_degree(i) == 0).collect()
    }

    /// Kahn's algorithm with a FIFO ready queue.
    ///
    /// The queue is seeded with the roots in registration order, and the
    /// dependents released by a task are enqueued in registration order, so
    /// the result is fully deterministic. A task released late goes behind
    /// tasks that were ready earlier: for `[a, b(after a), c]` the order is
    /// `a, c, b`. Fails with [`StarterError::DagCycle`] instead of returning
    /// a partial order.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.len();
        let mut in_degree: Vec<usize> = (0..n).map(|i| self.in_degree(i)).collect();

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

        let mut order = Vec::with_capacity(n);
        while let Some(u) = ready.pop_front() {
            order.push(u);
            for v in self.dependents_of(u) {
                let d = &mut in_degree[v];
                *d -= 1;
                if *d == 0 {
                    ready.push_back(v);
                }
            }
        }

        if order.len() < n {
            return Err(StarterError::DagCycle(self.describe_cycles()));
        }
        Ok(order)
    }

    /// Reorder a topological order for dispatch.
    ///
    /// Tasks something depends on come first, then tasks flagged in
    /// `run_as_soon`, then everything else. Each group keeps its relative
    /// order, so the result is still topologically valid: a task nobody
    /// depends on can move anywhere after its own dependencies.
    pub fn dispatch_order(&self, topo: &[usize], run_as_soon: &[bool]) -> Vec<usize> {
        let (depended, rest): (Vec<usize>, Vec<usize>) =
            topo.iter().partition(|&&i| self.is_depended_on(i));
        let (soon, rest): (Vec<usize>, Vec<usize>) = rest
            .into_iter()
            .partition(|&i| run_as_soon.get(i).copied().unwrap_or(false));

        depended.into_iter().chain(soon).chain(rest).collect()
    }

    /// Multi-line listing of every task and what depends on it.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for i in 0..self.len() {
            let dependents: Vec<&str> = self
                .dependents_of(i)
                .into_iter()
                .map(|d| self.id_of(d).as_str())
                .collect();
            out.push_str(&format!("{} -> {:?}\n", self.id_of(i), dependents));
        }
        out
    }

    fn neighbors(&self, idx: usize, dir: Direction) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(idx), dir)
            .map(|n| n.index())
            .collect();
        out.sort_unstable();
        out
    }

    fn describe_cycles(&self) -> String {
        let cycles: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|mut scc| {
                scc.sort_unstable();
                scc.iter()
                    .map(|n| self.graph[*n].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .collect();
        format!("cycle detected involving tasks [{}]", cycles.join("] ["))
    }
}
