// tests/graph_ordering.rs

use std::collections::HashSet;

use proptest::prelude::*;
use starter::dag::{DependencyGraph, GraphNode};
use starter::errors::StarterError;
use starter::task::TaskId;

fn node(id: &str, deps: &[&str]) -> GraphNode {
    GraphNode::new(id, deps.iter().map(|d| TaskId::from(*d)))
}

fn names(graph: &DependencyGraph, order: &[usize]) -> Vec<String> {
    order.iter().map(|&i| graph.id_of(i).to_string()).collect()
}

#[test]
fn chain_is_sorted_producer_first() {
    let graph = DependencyGraph::build(&[
        node("c", &["b"]),
        node("b", &["a"]),
        node("a", &[]),
    ])
    .unwrap();

    let order = graph.topological_order().unwrap();
    assert_eq!(names(&graph, &order), vec!["a", "b", "c"]);
}

#[test]
fn ready_tasks_keep_registration_order() {
    let graph = DependencyGraph::build(&[
        node("x", &[]),
        node("y", &[]),
        node("z", &["x"]),
        node("w", &[]),
    ])
    .unwrap();

    let order = graph.topological_order().unwrap();
    assert_eq!(names(&graph, &order), vec!["x", "y", "w", "z"]);
}

#[test]
fn released_task_queues_behind_tasks_ready_earlier() {
    let graph = DependencyGraph::build(&[
        node("a", &[]),
        node("b", &["a"]),
        node("c", &[]),
    ])
    .unwrap();

    let order = graph.topological_order().unwrap();
    assert_eq!(names(&graph, &order), vec!["a", "c", "b"]);
}

#[test]
fn dependents_released_together_keep_registration_order() {
    let graph = DependencyGraph::build(&[
        node("late", &["root"]),
        node("root", &[]),
        node("early", &["root"]),
        node("other", &[]),
    ])
    .unwrap();

    let order = graph.topological_order().unwrap();
    assert_eq!(names(&graph, &order), vec!["root", "other", "late", "early"]);
}

#[test]
fn repeated_dependency_is_a_single_edge() {
    let graph = DependencyGraph::build(&[node("a", &[]), node("b", &["a", "a"])]).unwrap();

    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.in_degree(1), 1);
    assert_eq!(graph.dependencies_of(1), vec![0]);
    assert_eq!(graph.dependents_of(0), vec![1]);
    assert!(graph.is_depended_on(0));
    assert!(!graph.is_depended_on(1));
    assert_eq!(graph.roots(), vec![0]);
}

#[test]
fn cycle_is_reported_with_its_members() {
    let graph = DependencyGraph::build(&[
        node("a", &["c"]),
        node("b", &["a"]),
        node("c", &["b"]),
        node("free", &[]),
    ])
    .unwrap();

    match graph.topological_order() {
        Err(StarterError::DagCycle(msg)) => {
            assert!(msg.contains("cycle detected"), "{msg}");
            assert!(msg.contains("[a, b, c]"), "{msg}");
            assert!(!msg.contains("free"), "{msg}");
        }
        other => panic!("expected DagCycle, got {other:?}"),
    }
}

#[test]
fn unknown_dependency_is_rejected() {
    let err = DependencyGraph::build(&[node("a", &["ghost"])]).unwrap_err();
    match err {
        StarterError::UnknownDependency { task, dependency } => {
            assert_eq!(task.as_str(), "a");
            assert_eq!(dependency.as_str(), "ghost");
        }
        other => panic!("expected UnknownDependency, got {other:?}"),
    }
    assert!(
        DependencyGraph::build(&[node("a", &["ghost"])])
            .unwrap_err()
            .is_configuration()
    );
}

#[test]
fn self_dependency_is_rejected() {
    let err = DependencyGraph::build(&[node("a", &["a"])]).unwrap_err();
    assert!(matches!(err, StarterError::SelfDependency(ref id) if id.as_str() == "a"));
}

#[test]
fn duplicate_identity_is_rejected() {
    let err = DependencyGraph::build(&[node("a", &[]), node("a", &[])]).unwrap_err();
    assert!(matches!(err, StarterError::DuplicateTask(ref id) if id.as_str() == "a"));
}

#[test]
fn dispatch_order_puts_depended_on_then_run_as_soon_first() {
    // leaf1, slow (run_as_soon), base <- dep
    let graph = DependencyGraph::build(&[
        node("leaf1", &[]),
        node("slow", &[]),
        node("base", &[]),
        node("dep", &["base"]),
    ])
    .unwrap();
    let topo = graph.topological_order().unwrap();
    let order = graph.dispatch_order(&topo, &[false, true, false, false]);

    assert_eq!(names(&graph, &order), vec!["base", "slow", "leaf1", "dep"]);
}

#[test]
fn empty_graph_sorts_to_nothing() {
    let graph = DependencyGraph::build(&[]).unwrap();
    assert!(graph.is_empty());
    assert!(graph.topological_order().unwrap().is_empty());
}

/// Random DAG: task `i` may only depend on tasks `0..i`, then the
/// registration order is shuffled by reversing it.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = (Vec<GraphNode>, Vec<bool>)> {
    (1..=max_tasks).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..4), n),
            proptest::collection::vec(any::<bool>(), n),
        )
            .prop_map(move |(raw, soon)| {
                let mut nodes: Vec<GraphNode> = raw
                    .into_iter()
                    .enumerate()
                    .map(|(i, picks)| {
                        let deps: HashSet<usize> = if i == 0 {
                            HashSet::new()
                        } else {
                            picks.into_iter().map(|p| p % i).collect()
                        };
                        GraphNode::new(
                            format!("t{i}"),
                            deps.into_iter().map(|d| TaskId::from(format!("t{d}"))),
                        )
                    })
                    .collect();
                nodes.reverse();
                (nodes, soon)
            })
    })
}

fn respects_edges(graph: &DependencyGraph, order: &[usize]) -> bool {
    let mut position = vec![0; graph.len()];
    for (pos, &i) in order.iter().enumerate() {
        position[i] = pos;
    }
    (0..graph.len()).all(|v| {
        graph
            .dependencies_of(v)
            .into_iter()
            .all(|u| position[u] < position[v])
    })
}

proptest! {
    #[test]
    fn every_edge_points_forward_in_both_orders((nodes, soon) in dag_strategy(12)) {
        let graph = DependencyGraph::build(&nodes).unwrap();
        let topo = graph.topological_order().unwrap();
        prop_assert_eq!(topo.len(), nodes.len());
        prop_assert!(respects_edges(&graph, &topo));

        let dispatch = graph.dispatch_order(&topo, &soon);
        prop_assert_eq!(dispatch.len(), nodes.len());
        prop_assert!(respects_edges(&graph, &dispatch));
    }

    #[test]
    fn closing_a_back_edge_is_always_a_cycle(n in 2usize..8) {
        // t0 <- t1 <- ... <- t(n-1) <- t0
        let nodes: Vec<GraphNode> = (0..n)
            .map(|i| {
                let dep = if i == 0 { n - 1 } else { i - 1 };
                GraphNode::new(format!("t{i}"), [TaskId::from(format!("t{dep}"))])
            })
            .collect();
        let graph = DependencyGraph::build(&nodes).unwrap();
        let is_cycle = matches!(graph.topological_order(), Err(StarterError::DagCycle(_)));
        prop_assert!(is_cycle);
    }
}
