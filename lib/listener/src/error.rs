//! Error types for the listener crate.

use chainflow_core::{ExecutionId, WorkflowId};
use chainflow_workflow::NodeId;
use std::fmt;

/// Errors from subscription management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// A trigger could not be subscribed.
    Subscribe {
        workflow_id: WorkflowId,
        trigger_node_id: NodeId,
        reason: String,
    },
    /// A matched event could not be enqueued.
    Enqueue {
        execution_id: ExecutionId,
        reason: String,
    },
    /// The enabled-workflow list could not be loaded.
    WorkflowSource { reason: String },
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe {
                workflow_id,
                trigger_node_id,
                reason,
            } => write!(
                f,
                "failed to subscribe {trigger_node_id} of workflow {workflow_id}: {reason}"
            ),
            Self::Enqueue {
                execution_id,
                reason,
            } => write!(f, "failed to enqueue execution {execution_id}: {reason}"),
            Self::WorkflowSource { reason } => write!(f, "failed to load workflows: {reason}"),
        }
    }
}

impl std::error::Error for ListenerError {}
