//! Error types for job processing.

use chainflow_core::ExecutionId;
use std::fmt;

/// Errors from an execution store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing database rejected or failed the operation.
    Database { operation: String, reason: String },
    /// No row exists for the execution id.
    NotFound { execution_id: ExecutionId },
    /// A stored row could not be decoded.
    Corrupt { execution_id: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database { operation, reason } => {
                write!(f, "execution store {operation} failed: {reason}")
            }
            Self::NotFound { execution_id } => write!(f, "execution not found: {execution_id}"),
            Self::Corrupt {
                execution_id,
                reason,
            } => write!(f, "execution {execution_id} is corrupt: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors that make a job eligible for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The execution row could not be written.
    Store {
        execution_id: ExecutionId,
        reason: String,
    },
    /// The engine failed in a way it could not record itself.
    Engine {
        execution_id: ExecutionId,
        reason: String,
    },
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store {
                execution_id,
                reason,
            } => write!(f, "failed to record execution {execution_id}: {reason}"),
            Self::Engine {
                execution_id,
                reason,
            } => write!(f, "execution {execution_id} aborted: {reason}"),
        }
    }
}

impl std::error::Error for ProcessorError {}
