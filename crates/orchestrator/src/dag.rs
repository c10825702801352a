//! DAG algorithms over an [`Orion`]: structural validation beyond the
//! cheap cycle/dangling-edge checks on [`Orion::validate_dag`] itself —
//! unreachable-node detection and a configurable max-depth limit — plus
//! topological ordering used by diagnostics and tests.

use orion_common::{Error, Orion, Result, TaskId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Topo;
use std::collections::HashMap;

/// Builds a `petgraph` view of an Orion's current task/dependency shape.
pub fn build_graph(orion: &Orion) -> (DiGraph<TaskId, ()>, HashMap<TaskId, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    for &task_id in orion.tasks.keys() {
        indices.insert(task_id, graph.add_node(task_id));
    }
    for dep in &orion.dependencies {
        if let (Some(&from), Some(&to)) =
            (indices.get(&dep.from_task_id), indices.get(&dep.to_task_id))
        {
            graph.add_edge(from, to, ());
        }
    }
    (graph, indices)
}

/// Topological order of tasks, for diagnostics and deterministic test
/// assertions. The orchestrator itself never needs a full ordering — it
/// discovers readiness incrementally via `get_ready_tasks` — but this is
/// useful for rendering a plan or asserting execution order in tests.
pub fn topological_sort(orion: &Orion) -> Result<Vec<TaskId>> {
    let (graph, _) = build_graph(orion);
    let mut topo = Topo::new(&graph);
    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(node) = topo.next(&graph) {
        order.push(graph[node]);
    }
    if order.len() != graph.node_count() {
        return Err(Error::InvalidDag("DAG contains a cycle".to_string()));
    }
    Ok(order)
}

/// Tasks unreachable from any task with no incoming edges — a sign the
/// DAG was assembled incorrectly, since every task should eventually
/// become ready.
pub fn find_unreachable_nodes(orion: &Orion) -> Vec<TaskId> {
    let (graph, indices) = build_graph(orion);
    let roots: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&n| {
            graph
                .neighbors_directed(n, petgraph::Direction::Incoming)
                .next()
                .is_none()
        })
        .collect();

    let mut reachable = std::collections::HashSet::new();
    for root in roots {
        let mut dfs = petgraph::visit::Dfs::new(&graph, root);
        while let Some(node) = dfs.next(&graph) {
            reachable.insert(node);
        }
    }

    indices
        .iter()
        .filter(|(_, idx)| !reachable.contains(idx))
        .map(|(task_id, _)| *task_id)
        .collect()
}

/// Longest path from any root to any leaf, used to enforce a max-depth
/// limit and to size critical-path statistics.
pub fn calculate_depth(orion: &Orion) -> usize {
    let (graph, _) = build_graph(orion);
    let mut topo = Topo::new(&graph);
    let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
    let mut max_depth = 0;
    while let Some(node) = topo.next(&graph) {
        let d = graph
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .map(|pred| depth.get(&pred).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depth.insert(node, d);
        max_depth = max_depth.max(d);
    }
    max_depth
}

/// Full structural validation: the Orion's own acyclic/dangling-edge
/// checks, plus unreachable-node and max-depth checks.
pub fn validate(orion: &Orion, max_depth: usize) -> Result<()> {
    orion.validate_dag()?;

    let unreachable = find_unreachable_nodes(orion);
    if !unreachable.is_empty() {
        return Err(Error::InvalidDag(format!(
            "{} task(s) unreachable from any root",
            unreachable.len()
        )));
    }

    let depth = calculate_depth(orion);
    if depth > max_depth {
        return Err(Error::InvalidDag(format!(
            "DAG depth {depth} exceeds max_depth {max_depth}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_common::{DependencyType, TaskPriority, TaskStar, TaskStarLine};

    fn linear_orion() -> Orion {
        let mut orion = Orion::new("test");
        let a = TaskStar::new("a", TaskPriority::Medium);
        let b = TaskStar::new("b", TaskPriority::Medium);
        let (a_id, b_id) = (a.task_id, b.task_id);
        orion.add_task(a);
        orion.add_task(b);
        orion
            .add_dependency(TaskStarLine {
                from_task_id: a_id,
                to_task_id: b_id,
                dependency_type: DependencyType::Unconditional,
            })
            .unwrap();
        orion
    }

    #[test]
    fn validates_a_simple_chain() {
        let orion = linear_orion();
        assert!(validate(&orion, 10).is_ok());
    }

    #[test]
    fn rejects_depth_past_limit() {
        let orion = linear_orion();
        assert!(validate(&orion, 0).is_err());
    }

    #[test]
    fn topo_sort_orders_dependency_before_dependent() {
        let orion = linear_orion();
        let order = topological_sort(&orion).unwrap();
        let a_id = *orion.tasks.keys().next().unwrap();
        let pos_a = order.iter().position(|&id| id == a_id).unwrap();
        let pos_b = order.iter().position(|&id| id != a_id).unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn cycle_rejected_at_add_dependency() {
        let mut orion = Orion::new("cyclic");
        let a = TaskStar::new("a", TaskPriority::Medium);
        let b = TaskStar::new("b", TaskPriority::Medium);
        let (a_id, b_id) = (a.task_id, b.task_id);
        orion.add_task(a);
        orion.add_task(b);
        orion
            .add_dependency(TaskStarLine {
                from_task_id: a_id,
                to_task_id: b_id,
                dependency_type: DependencyType::Unconditional,
            })
            .unwrap();
        let result = orion.add_dependency(TaskStarLine {
            from_task_id: b_id,
            to_task_id: a_id,
            dependency_type: DependencyType::Unconditional,
        });
        assert!(result.is_err());
    }

    use proptest::prelude::*;
    proptest::proptest! {
        /// For any DAG built with edges only running from a lower to a
        /// higher task index (guaranteeing acyclicity by construction),
        /// `topological_sort` must place every edge's source strictly
        /// before its target.
        #[test]
        fn topo_sort_respects_all_edges(
            n in 2usize..8,
            edge_bits in proptest::collection::vec(proptest::bool::ANY, 28),
        ) {
            let mut orion = Orion::new("prop-dag");
            let ids: Vec<TaskId> = (0..n)
                .map(|i| {
                    let task = TaskStar::new(format!("t{i}"), TaskPriority::Medium);
                    let id = task.task_id;
                    orion.add_task(task);
                    id
                })
                .collect();

            let mut edges = Vec::new();
            let mut bit_idx = 0;
            for i in 0..n {
                for j in (i + 1)..n {
                    if edge_bits[bit_idx] {
                        edges.push((ids[i], ids[j]));
                    }
                    bit_idx += 1;
                }
            }
            for (from, to) in &edges {
                orion
                    .add_dependency(TaskStarLine {
                        from_task_id: *from,
                        to_task_id: *to,
                        dependency_type: DependencyType::Unconditional,
                    })
                    .unwrap();
            }

            let order = topological_sort(&orion).unwrap();
            let position: HashMap<TaskId, usize> =
                order.iter().enumerate().map(|(i, &id)| (id, i)).collect();
            for (from, to) in &edges {
                prop_assert!(position[from] < position[to]);
            }
        }
    }
}
