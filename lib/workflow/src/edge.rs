//! Edge types for workflow graphs.
//!
//! An edge is a directed connection from a source node to a target node.
//! Data does not flow along edges; they only order execution.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Builder-assigned edge id, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The source node ID.
    pub source: NodeId,
    /// The target node ID.
    pub target: NodeId,
}

impl Edge {
    /// Creates an edge without an id.
    #[must_use]
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_creation() {
        let edge = Edge::new("trigger", "notify");
        assert_eq!(edge.source, NodeId::from("trigger"));
        assert_eq!(edge.target, NodeId::from("notify"));
        assert!(edge.id.is_none());
    }

    #[test]
    fn edge_deserializes_builder_shape() {
        let edge: Edge = serde_json::from_str(r#"{"id":"e1","source":"a","target":"b"}"#)
            .expect("deserialize");
        assert_eq!(edge.id.as_deref(), Some("e1"));
        assert_eq!(edge.source.as_str(), "a");
    }
}
