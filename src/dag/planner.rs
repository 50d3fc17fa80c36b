// src/dag/planner.rs

//! Wave planning: a Kahn-style topological peel over the DAG.

use std::collections::{BTreeMap, HashMap};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::DagGraph;
use crate::errors::ValidationError;
use crate::types::NodeId;

/// A set of nodes whose dependencies are all satisfied by strictly earlier
/// waves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    pub wave_number: usize,
    pub nodes: Vec<NodeId>,
}

/// Partition the graph into waves.
///
/// Each iteration collects every node with zero *remaining* in-degree into
/// the next wave and then releases its dependents. Nodes inside a wave are
/// emitted in sorted order. If a peel comes up empty while nodes remain, the
/// leftovers contain a cycle and planning fails without producing any waves.
pub fn plan_waves(graph: &DagGraph) -> Result<Vec<Wave>, ValidationError> {
    if graph.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut remaining: BTreeMap<&str, usize> = graph
        .ids()
        .map(|id| (id, graph.dependencies_of(id).len()))
        .collect();

    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, in_degree)| **in_degree == 0)
            .map(|(id, _)| *id)
            .collect();

        if ready.is_empty() {
            let node = cycle_member(graph, &remaining);
            return Err(ValidationError::CyclicDependency { node });
        }

        for id in ready.iter() {
            remaining.remove(id);
            for dependent in graph.dependents_of(id) {
                if let Some(in_degree) = remaining.get_mut(dependent.as_str()) {
                    *in_degree = in_degree.saturating_sub(1);
                }
            }
        }

        debug!(wave = waves.len(), nodes = ?ready, "planned wave");
        waves.push(Wave {
            wave_number: waves.len(),
            nodes: ready.into_iter().map(str::to_string).collect(),
        });
    }

    Ok(waves)
}

/// Map each node id to the index of the wave that contains it.
pub fn wave_index(waves: &[Wave]) -> HashMap<&str, usize> {
    waves
        .iter()
        .flat_map(|w| w.nodes.iter().map(move |n| (n.as_str(), w.wave_number)))
        .collect()
}

/// Name one node that actually sits on a cycle.
///
/// The nodes left over after a stalled peel include everything downstream of
/// the cycle as well, so we ask petgraph for a node on the cycle itself.
fn cycle_member(graph: &DagGraph, remaining: &BTreeMap<&str, usize>) -> NodeId {
    let mut sub: DiGraphMap<&str, ()> = DiGraphMap::new();
    for id in remaining.keys() {
        sub.add_node(*id);
    }
    for id in remaining.keys() {
        for dep in graph.dependencies_of(id) {
            if remaining.contains_key(dep.as_str()) {
                sub.add_edge(dep.as_str(), *id, ());
            }
        }
    }

    match toposort(&sub, None) {
        Err(cycle) => cycle.node_id().to_string(),
        Ok(_) => remaining
            .keys()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Node;

    fn graph(nodes: &[(&str, &[&str])]) -> DagGraph {
        DagGraph::new(
            nodes
                .iter()
                .map(|(id, deps)| Node::new(*id, format!("task {id}")).with_dependencies(deps.iter().copied())),
        )
        .unwrap()
    }

    fn ids(wave: &Wave) -> Vec<&str> {
        wave.nodes.iter().map(String::as_str).collect()
    }

    #[test]
    fn diamond_like_dag_splits_into_three_waves() {
        let g = graph(&[("A", &[]), ("B", &["A"]), ("C", &[]), ("D", &["B", "C"])]);
        let waves = plan_waves(&g).unwrap();

        assert_eq!(waves.len(), 3);
        assert_eq!(ids(&waves[0]), vec!["A", "C"]);
        assert_eq!(ids(&waves[1]), vec!["B"]);
        assert_eq!(ids(&waves[2]), vec!["D"]);
        assert_eq!(
            waves.iter().map(|w| w.wave_number).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn two_node_cycle_names_a_member() {
        let g = graph(&[("A", &["B"]), ("B", &["A"])]);
        match plan_waves(&g) {
            Err(ValidationError::CyclicDependency { node }) => {
                assert!(node == "A" || node == "B", "unexpected node {node}");
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn cycle_error_ignores_nodes_downstream_of_the_cycle() {
        // Z depends on the cycle but is not part of it.
        let g = graph(&[("root", &[]), ("X", &["root", "Y"]), ("Y", &["X"]), ("Z", &["Y"])]);
        match plan_waves(&g) {
            Err(ValidationError::CyclicDependency { node }) => {
                assert!(node == "X" || node == "Y", "unexpected node {node}");
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let g = graph(&[("A", &["A"])]);
        assert_eq!(
            plan_waves(&g),
            Err(ValidationError::CyclicDependency { node: "A".into() })
        );
    }

    #[test]
    fn empty_graph_is_rejected() {
        let g = DagGraph::new(Vec::new()).unwrap();
        assert_eq!(plan_waves(&g), Err(ValidationError::Empty));
    }

    #[test]
    fn wave_index_covers_every_node() {
        let g = graph(&[("A", &[]), ("B", &["A"])]);
        let waves = plan_waves(&g).unwrap();
        let index = wave_index(&waves);
        assert_eq!(index.get("A"), Some(&0));
        assert_eq!(index.get("B"), Some(&1));
    }
}
