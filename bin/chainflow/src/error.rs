//! Error types for the chainflow binary.

use chainflow_core::WorkflowId;
use chainflow_workflow::ValidationErrors;
use std::fmt;

/// Errors from workflow mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The workflow failed validation; nothing was written.
    Validation(ValidationErrors),
    /// No live workflow with this id.
    NotFound { workflow_id: WorkflowId },
    /// The workflow table could not be read or written.
    Database { operation: String, reason: String },
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(errors) => write!(f, "{errors}"),
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::Database { operation, reason } => {
                write!(f, "workflow {operation} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ServiceError {}

/// Errors that stop the process from starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    Config { reason: String },
    Database { reason: String },
    Queue { reason: String },
    Chain { reason: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { reason } => write!(f, "invalid configuration: {reason}"),
            Self::Database { reason } => write!(f, "database unavailable: {reason}"),
            Self::Queue { reason } => write!(f, "queue unavailable: {reason}"),
            Self::Chain { reason } => write!(f, "chain endpoint unavailable: {reason}"),
        }
    }
}

impl std::error::Error for StartupError {}
