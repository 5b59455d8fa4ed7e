//! Error types for the workflow crate.
//!
//! Errors are wrapped in rootcause reports:
//! - `GraphError`: One structural or configuration problem in a graph
//! - `ValidationErrors`: Every problem found in a graph, reported together
//! - `ExecutionError`: A node executor failure

use crate::node::{NodeId, NodeKind};
use std::fmt;

/// Errors from graph operations and validation.
///
/// These errors contain only information available at the graph layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// Two nodes share an ID.
    DuplicateNodeId { node_id: NodeId },
    /// An edge references a node that does not exist.
    DanglingEdge {
        source: NodeId,
        target: NodeId,
        missing: NodeId,
    },
    /// The graph has no trigger node.
    MissingTrigger,
    /// The graph has no action or notify node.
    MissingEffect,
    /// A non-trigger node points into a trigger node.
    EdgeIntoTrigger { source: NodeId, target: NodeId },
    /// Graph contains cycles.
    CycleDetected,
    /// A node's configuration values are invalid.
    InvalidConfig { node_id: NodeId, reason: String },
    /// A cron trigger's schedule or timezone is invalid.
    InvalidSchedule { node_id: NodeId, reason: String },
    /// Workflow safety limits are invalid.
    InvalidSafetyLimit { field: String, reason: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => {
                write!(f, "node not found: {node_id}")
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate node id: {node_id}")
            }
            Self::DanglingEdge {
                source,
                target,
                missing,
            } => {
                write!(f, "edge {source} -> {target} references unknown node {missing}")
            }
            Self::MissingTrigger => write!(f, "workflow needs at least one trigger node"),
            Self::MissingEffect => {
                write!(f, "workflow needs at least one action or notify node")
            }
            Self::EdgeIntoTrigger { source, target } => {
                write!(f, "edge {source} -> {target} points into a trigger node")
            }
            Self::CycleDetected => write!(f, "graph contains cycles"),
            Self::InvalidConfig { node_id, reason } => {
                write!(f, "node {node_id}: {reason}")
            }
            Self::InvalidSchedule { node_id, reason } => {
                write!(f, "node {node_id}: invalid schedule: {reason}")
            }
            Self::InvalidSafetyLimit { field, reason } => {
                write!(f, "safety limit {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Every validation problem found in a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<GraphError>,
}

impl ValidationErrors {
    /// Wraps a list of errors.
    #[must_use]
    pub fn new(errors: Vec<GraphError>) -> Self {
        Self { errors }
    }

    /// Returns `Ok(())` when there are no errors.
    ///
    /// # Errors
    ///
    /// Returns `self` if any error was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Appends more errors.
    pub fn extend(&mut self, errors: impl IntoIterator<Item = GraphError>) {
        self.errors.extend(errors);
    }

    /// Returns true if no errors were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the collected errors.
    #[must_use]
    pub fn errors(&self) -> &[GraphError] {
        &self.errors
    }

    /// Returns each error as a message.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workflow is invalid: {}", self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors raised by node executors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// No executor is registered for the node kind.
    NoExecutor { kind: NodeKind },
    /// The executor was handed a node of another kind.
    UnexpectedConfig { expected: NodeKind, found: NodeKind },
    /// The action would exceed a safety ceiling.
    SafetyLimitExceeded { limit: String, reason: String },
    /// The market does not accept orders.
    MarketClosed { ticker: String, status: String },
    /// The collaborator needed by this node is not configured.
    NotConfigured { collaborator: String },
    /// A collaborator call failed.
    Collaborator { operation: String, reason: String },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoExecutor { kind } => {
                write!(f, "no executor registered for {kind} nodes")
            }
            Self::UnexpectedConfig { expected, found } => {
                write!(f, "expected a {expected} node, found {found}")
            }
            Self::SafetyLimitExceeded { limit, reason } => {
                write!(f, "safety limit {limit} exceeded: {reason}")
            }
            Self::MarketClosed { ticker, status } => {
                write!(f, "market {ticker} is not open (status {status})")
            }
            Self::NotConfigured { collaborator } => {
                write!(f, "{collaborator} is not configured")
            }
            Self::Collaborator { operation, reason } => {
                write!(f, "{operation} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}
