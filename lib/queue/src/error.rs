//! Error types for the job queue, registry and cache.

use std::fmt;

/// Errors from the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Connecting to the message broker failed.
    ConnectionFailed {
        /// Error message.
        message: String,
    },
    /// Creating a stream, consumer or bucket failed.
    SetupFailed {
        /// Error message.
        message: String,
    },
    /// Publishing a job failed.
    PublishFailed {
        /// Error message.
        message: String,
    },
    /// Pulling jobs from the consumer failed.
    ConsumeFailed {
        /// Error message.
        message: String,
    },
    /// Acknowledging a delivery failed.
    AckFailed {
        /// Error message.
        message: String,
    },
    /// A payload could not be encoded or decoded.
    Serialization {
        /// Error message.
        message: String,
    },
    /// Reading or writing the repeatable-job registry failed.
    Registry {
        /// Error message.
        message: String,
    },
    /// Reading or writing the dedup cache failed.
    Cache {
        /// Error message.
        message: String,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => write!(f, "connection failed: {message}"),
            Self::SetupFailed { message } => write!(f, "setup failed: {message}"),
            Self::PublishFailed { message } => write!(f, "publish failed: {message}"),
            Self::ConsumeFailed { message } => write!(f, "consume failed: {message}"),
            Self::AckFailed { message } => write!(f, "ack failed: {message}"),
            Self::Serialization { message } => write!(f, "serialization error: {message}"),
            Self::Registry { message } => write!(f, "job registry error: {message}"),
            Self::Cache { message } => write!(f, "cache error: {message}"),
        }
    }
}

impl std::error::Error for QueueError {}
