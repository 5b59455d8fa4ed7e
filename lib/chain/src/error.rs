//! Error types for the pubsub client.

use std::fmt;

/// Errors from the Solana pubsub connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The websocket could not be opened.
    ConnectionFailed { reason: String },
    /// The connection dropped before a reply arrived.
    Disconnected,
    /// The node answered with a JSON-RPC error.
    Rpc { code: i64, message: String },
    /// A frame did not have the expected shape.
    Protocol { reason: String },
    /// No reply arrived in time.
    Timeout,
    /// The connection task has stopped.
    Closed,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => write!(f, "connection failed: {reason}"),
            Self::Disconnected => write!(f, "connection lost"),
            Self::Rpc { code, message } => write!(f, "rpc error {code}: {message}"),
            Self::Protocol { reason } => write!(f, "protocol error: {reason}"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Closed => write!(f, "pubsub connection closed"),
        }
    }
}

impl std::error::Error for ChainError {}
