// src/dag/graph.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::types::NodeId;

/// A unit of work in the DAG. Immutable once the DAG has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Free-text task description handed to the worker.
    pub task: String,
    /// Nodes that must be `complete` before this one may start.
    pub dependencies: Vec<NodeId>,
    /// Worker type used to pick the launch command; `None` means the default
    /// `[worker]` command.
    pub worker_type: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            dependencies: Vec::new(),
            worker_type: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// Internal node structure: the node itself plus its direct dependents.
#[derive(Debug, Clone)]
struct DagNode {
    node: Node,
    /// Direct dependents: nodes that list this one in `dependencies`.
    dependents: Vec<NodeId>,
}

/// In-memory DAG keyed by node id.
///
/// Construction checks that every dependency refers to a known node.
/// Acyclicity is checked by the planner, which is the only consumer that needs
/// a full ordering.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: BTreeMap<NodeId, DagNode>,
}

impl DagGraph {
    /// Build a graph from a set of nodes, failing fast on the first unknown
    /// dependency. Duplicate dependency entries are collapsed.
    pub fn new<I>(nodes: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = Node>,
    {
        let mut map: BTreeMap<NodeId, DagNode> = nodes
            .into_iter()
            .map(|mut node| {
                node.dependencies.sort();
                node.dependencies.dedup();
                (
                    node.id.clone(),
                    DagNode {
                        node,
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        let mut edges = Vec::new();
        for (id, entry) in map.iter() {
            for dep in entry.node.dependencies.iter() {
                if !map.contains_key(dep) {
                    return Err(ValidationError::UnknownDependency {
                        node: id.clone(),
                        dependency: dep.clone(),
                    });
                }
                edges.push((dep.clone(), id.clone()));
            }
        }

        for (dep, dependent) in edges {
            if let Some(entry) = map.get_mut(&dep) {
                entry.dependents.push(dependent);
            }
        }

        Ok(Self { nodes: map })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids, in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().map(|n| &n.node)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id).map(|n| &n.node)
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, id: &str) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.node.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, id: &str) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dependency_fails_fast() {
        let err = DagGraph::new([Node::new("A", "a").with_dependencies(["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownDependency {
                node: "A".into(),
                dependency: "ghost".into()
            }
        );
    }

    #[test]
    fn dependents_are_derived_from_dependencies() {
        let graph = DagGraph::new([
            Node::new("A", "a"),
            Node::new("B", "b").with_dependencies(["A", "A"]),
            Node::new("C", "c").with_dependencies(["A"]),
        ])
        .unwrap();

        assert_eq!(graph.dependencies_of("B"), ["A".to_string()]);
        assert_eq!(graph.dependents_of("A"), ["B".to_string(), "C".to_string()]);
        assert!(graph.dependents_of("C").is_empty());
    }
}
