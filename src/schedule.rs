//! Execution-order builder.
//!
//! Orders modules so every module runs after the modules feeding it. Ties are
//! broken by ascending logical ID so the order is stable across rebuilds.
//!
//! Cycles are only schedulable when they pass through an input of a module
//! that tolerates feedback. The latest such edge in each cycle is marked
//! *delayed*: it is left out of the ordering and its destination reads the
//! source's output from the previous block.

use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::topology::{Connection, LogicalId};

/// A module as the scheduler sees it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ScheduleNode {
    pub(crate) id: LogicalId,
    pub(crate) tolerates_feedback: bool,
}

/// A valid processing order.
#[derive(Clone, Debug, Default)]
pub(crate) struct Schedule {
    pub(crate) order: Vec<LogicalId>,
    /// Indices into the connection list of edges read with one block of delay
    pub(crate) delayed: HashSet<usize>,
}

type EdgeGraph = DiGraph<LogicalId, usize>;

/// Build an execution order, or return the members of an unschedulable cycle.
pub(crate) fn build(
    nodes: &[ScheduleNode],
    connections: &[Connection],
) -> Result<Schedule, Vec<LogicalId>> {
    let feedback: HashMap<LogicalId, bool> = nodes
        .iter()
        .map(|n| (n.id, n.tolerates_feedback))
        .collect();
    let mut delayed = HashSet::new();

    // Each pass either succeeds or delays one more edge, so this terminates.
    loop {
        let graph = edge_graph(nodes, connections, &delayed);
        if let Some(order) = kahn(&graph) {
            return Ok(Schedule { order, delayed });
        }

        let mut progressed = false;
        for component in tarjan_scc(&graph) {
            if !is_cyclic(&graph, &component) {
                continue;
            }
            let members: HashSet<NodeIndex> = component.iter().copied().collect();
            let breakable = graph
                .edge_indices()
                .filter_map(|e| {
                    let (from, to) = graph.edge_endpoints(e)?;
                    let accepts = members.contains(&from)
                        && members.contains(&to)
                        && feedback.get(&graph[to]).copied().unwrap_or(false);
                    accepts.then(|| graph[e])
                })
                .max();

            match breakable {
                Some(index) => {
                    delayed.insert(index);
                    progressed = true;
                }
                None => {
                    let mut ids: Vec<LogicalId> = component.iter().map(|&n| graph[n]).collect();
                    ids.sort();
                    return Err(ids);
                }
            }
        }

        if !progressed {
            // Kahn left nodes behind but no component is cyclic; cannot happen
            // for a well-formed graph, report everything so callers refuse it.
            return Err(nodes.iter().map(|n| n.id).collect());
        }
    }
}

fn edge_graph(
    nodes: &[ScheduleNode],
    connections: &[Connection],
    delayed: &HashSet<usize>,
) -> EdgeGraph {
    let mut graph = EdgeGraph::with_capacity(nodes.len(), connections.len());
    let index: HashMap<LogicalId, NodeIndex> = nodes
        .iter()
        .map(|n| (n.id, graph.add_node(n.id)))
        .collect();

    for (i, c) in connections.iter().enumerate() {
        if c.dst_is_main_output || delayed.contains(&i) {
            continue;
        }
        if let (Some(&from), Some(&to)) = (index.get(&c.src), index.get(&c.dst)) {
            graph.add_edge(from, to, i);
        }
    }
    graph
}

/// Kahn's algorithm with a sorted ready set. `None` if a cycle remains.
fn kahn(graph: &EdgeGraph) -> Option<Vec<LogicalId>> {
    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.edges_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BTreeSet<(LogicalId, NodeIndex)> = graph
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|n| (graph[n], n))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some((id, node)) = ready.pop_first() {
        order.push(id);

        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                ready.insert((graph[next], next));
            }
        }
    }

    (order.len() == graph.node_count()).then_some(order)
}

fn is_cyclic(graph: &EdgeGraph, component: &[NodeIndex]) -> bool {
    match component {
        [single] => graph.find_edge(*single, *single).is_some(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32, tolerates_feedback: bool) -> ScheduleNode {
        ScheduleNode {
            id: LogicalId(id),
            tolerates_feedback,
        }
    }

    fn edge(src: u32, dst: u32) -> Connection {
        Connection::new(LogicalId(src), 0, LogicalId(dst), 0)
    }

    fn ids(order: &[LogicalId]) -> Vec<u32> {
        order.iter().map(|id| id.get()).collect()
    }

    #[test]
    fn orders_dependencies_first() {
        let nodes = [node(1, false), node(2, false), node(3, false)];
        let schedule = build(&nodes, &[edge(3, 1), edge(1, 2)]).unwrap();
        assert_eq!(ids(&schedule.order), vec![3, 1, 2]);
        assert!(schedule.delayed.is_empty());
    }

    #[test]
    fn independent_modules_sort_by_id() {
        let nodes = [node(4, false), node(2, false), node(9, false)];
        let schedule = build(&nodes, &[]).unwrap();
        assert_eq!(ids(&schedule.order), vec![2, 4, 9]);
    }

    #[test]
    fn parallel_edges_count_once_each() {
        let nodes = [node(1, false), node(2, false)];
        let mut second = edge(1, 2);
        second.src_channel = 1;
        let schedule = build(&nodes, &[edge(1, 2), second]).unwrap();
        assert_eq!(ids(&schedule.order), vec![1, 2]);
    }

    #[test]
    fn main_output_edges_do_not_constrain_order() {
        let nodes = [node(1, false)];
        let out = Connection::new(LogicalId(1), 0, LogicalId::MAIN_OUTPUT, 0);
        assert_eq!(ids(&build(&nodes, &[out]).unwrap().order), vec![1]);
    }

    #[test]
    fn plain_cycle_is_rejected() {
        let nodes = [node(1, false), node(2, false), node(3, false)];
        let err = build(&nodes, &[edge(1, 2), edge(2, 3), edge(3, 2)]).unwrap_err();
        assert_eq!(ids(&err), vec![2, 3]);
    }

    #[test]
    fn self_loop_needs_feedback_tolerance() {
        assert!(build(&[node(1, false)], &[edge(1, 1)]).is_err());
        let schedule = build(&[node(1, true)], &[edge(1, 1)]).unwrap();
        assert!(schedule.delayed.contains(&0));
    }

    #[test]
    fn feedback_edge_is_delayed() {
        // 1 -> 2 -> 3 -> 1, where 1 tolerates feedback
        let nodes = [node(1, true), node(2, false), node(3, false)];
        let schedule = build(&nodes, &[edge(1, 2), edge(2, 3), edge(3, 1)]).unwrap();
        assert_eq!(ids(&schedule.order), vec![1, 2, 3]);
        assert_eq!(schedule.delayed.iter().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn nested_cycles_each_get_a_delayed_edge() {
        // 1 <-> 2 and 2 <-> 3, with 1 and 2 tolerating feedback
        let nodes = [node(1, true), node(2, true), node(3, false)];
        let edges = [edge(1, 2), edge(2, 1), edge(2, 3), edge(3, 2)];
        let schedule = build(&nodes, &edges).unwrap();
        assert_eq!(schedule.order.len(), 3);
        assert!(schedule.delayed.contains(&3));
        assert!(schedule.delayed.len() <= 2);
    }
}
