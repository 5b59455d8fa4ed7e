//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed graphs where:
//! - Nodes are triggers, filters, actions and notifications
//! - Edges order execution from a source node to a target node
//!
//! The graph is stored as JSONB in the database in the builder's
//! `{nodes, edges}` shape. Loading never fails on structural problems;
//! duplicate ids and dangling edges are remembered so [`WorkflowGraph::validate`]
//! can report them alongside everything else.

use crate::edge::Edge;
use crate::error::{GraphError, ValidationErrors};
use crate::node::{Node, NodeId, NodeKind, TriggerConfig};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphDocument", into = "GraphDocument")]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
    /// Ids seen more than once while building.
    duplicate_ids: Vec<NodeId>,
    /// Edges whose endpoints did not resolve while building.
    dangling_edges: Vec<Edge>,
}

/// Serialized form of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphDocument {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl From<GraphDocument> for WorkflowGraph {
    fn from(doc: GraphDocument) -> Self {
        let mut graph = Self::new();
        for node in doc.nodes {
            graph.add_node(node);
        }
        for edge in doc.edges {
            if graph.add_edge(edge.clone()).is_err() {
                graph.dangling_edges.push(edge);
            }
        }
        graph
    }
}

impl From<WorkflowGraph> for GraphDocument {
    fn from(graph: WorkflowGraph) -> Self {
        let edges = graph
            .graph
            .edge_references()
            .map(|e| e.weight().clone())
            .chain(graph.dangling_edges)
            .collect();
        let nodes = graph.graph.into_nodes_edges().0;
        Self {
            nodes: nodes.into_iter().map(|n| n.weight).collect(),
            edges,
        }
    }
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a graph from nodes and edges.
    #[must_use]
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        GraphDocument { nodes, edges }.into()
    }

    /// Adds a node to the graph.
    ///
    /// A node whose id is already taken is kept but not addressable; it is
    /// reported by [`validate`](Self::validate).
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        if self.node_index_map.contains_key(&node_id) {
            self.duplicate_ids.push(node_id.clone());
        } else {
            self.node_index_map.insert(node_id.clone(), index);
        }
        node_id
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source or target node doesn't exist.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        let source_index =
            *self
                .node_index_map
                .get(&edge.source)
                .ok_or_else(|| GraphError::NodeNotFound {
                    node_id: edge.source.clone(),
                })?;

        let target_index =
            *self
                .node_index_map
                .get(&edge.target)
                .ok_or_else(|| GraphError::NodeNotFound {
                    node_id: edge.target.clone(),
                })?;

        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all resolved edges in declaration order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of resolved edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns all trigger nodes.
    pub fn trigger_nodes(&self) -> Vec<&Node> {
        self.nodes()
            .filter(|node| node.kind() == NodeKind::Trigger)
            .collect()
    }

    /// Returns trigger nodes with their trigger config.
    pub fn triggers(&self) -> impl Iterator<Item = (&Node, &TriggerConfig)> {
        self.nodes()
            .filter_map(|node| node.as_trigger().map(|config| (node, config)))
    }

    /// Returns cron trigger nodes.
    pub fn cron_triggers(&self) -> impl Iterator<Item = (&Node, &TriggerConfig)> {
        self.triggers().filter(|(_, config)| config.is_cron())
    }

    /// Returns the successors of a node in edge-declaration order.
    pub fn successors(&self, node_id: &NodeId) -> Vec<&Node> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        // petgraph walks outgoing edges newest first
        let mut outgoing: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .collect();
        outgoing.sort_by_key(|edge| edge.id());

        outgoing
            .into_iter()
            .filter_map(|edge| self.graph.node_weight(edge.target()))
            .collect()
    }

    /// Returns the predecessors (upstream nodes) of a given node.
    pub fn predecessors(&self, node_id: &NodeId) -> Vec<&Node> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        self.graph
            .edges_directed(index, Direction::Incoming)
            .filter_map(|edge| self.graph.node_weight(edge.source()))
            .collect()
    }

    /// Validates the workflow graph.
    ///
    /// Checks:
    /// - Node ids are unique
    /// - Every edge references existing nodes
    /// - At least one trigger and at least one action or notify node
    /// - No edge from a non-trigger node into a trigger node
    /// - No cycles (DAG validation)
    /// - Each node's configuration values
    ///
    /// # Errors
    ///
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        ValidationErrors::new(self.validation_errors()).into_result()
    }

    /// Collects every validation problem in the graph.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<GraphError> {
        let mut errors: Vec<GraphError> = self
            .duplicate_ids
            .iter()
            .map(|node_id| GraphError::DuplicateNodeId {
                node_id: node_id.clone(),
            })
            .collect();

        for edge in &self.dangling_edges {
            let missing = if self.node_index_map.contains_key(&edge.source) {
                edge.target.clone()
            } else {
                edge.source.clone()
            };
            errors.push(GraphError::DanglingEdge {
                source: edge.source.clone(),
                target: edge.target.clone(),
                missing,
            });
        }

        if !self.nodes().any(|n| n.kind() == NodeKind::Trigger) {
            errors.push(GraphError::MissingTrigger);
        }
        if !self
            .nodes()
            .any(|n| matches!(n.kind(), NodeKind::Action | NodeKind::Notify))
        {
            errors.push(GraphError::MissingEffect);
        }

        for edge in self.graph.edge_references() {
            let (Some(source), Some(target)) = (
                self.graph.node_weight(edge.source()),
                self.graph.node_weight(edge.target()),
            ) else {
                continue;
            };
            if target.kind() == NodeKind::Trigger && source.kind() != NodeKind::Trigger {
                errors.push(GraphError::EdgeIntoTrigger {
                    source: source.id.clone(),
                    target: target.id.clone(),
                });
            }
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            errors.push(GraphError::CycleDetected);
        }

        for node in self.nodes() {
            errors.extend(
                node.config_errors()
                    .into_iter()
                    .map(|reason| GraphError::InvalidConfig {
                        node_id: node.id.clone(),
                        reason,
                    }),
            );
        }

        errors
    }
}
