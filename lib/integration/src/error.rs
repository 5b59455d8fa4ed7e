//! Error types for the integration crate.
//!
//! `ConnectorError` covers a single request to an external service.

use std::fmt;

/// Errors from connector operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Connection to service failed.
    ConnectionFailed { reason: String },
    /// Authentication failed.
    AuthenticationFailed { reason: String },
    /// Rate limit exceeded.
    RateLimited { retry_after_secs: Option<u64> },
    /// The service answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The collaborator has no configuration in this deployment.
    NotConfigured { service: String },
    /// Protocol error (unexpected response shape).
    ProtocolError { reason: String },
    /// Timeout waiting for response.
    Timeout,
}

impl fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => {
                write!(f, "connection failed: {reason}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "authentication failed: {reason}")
            }
            Self::RateLimited { retry_after_secs } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "rate limited, retry after {secs}s")
                } else {
                    write!(f, "rate limited")
                }
            }
            Self::Rejected { status, body } => {
                write!(f, "request rejected with status {status}: {body}")
            }
            Self::NotConfigured { service } => {
                write!(f, "{service} is not configured")
            }
            Self::ProtocolError { reason } => {
                write!(f, "protocol error: {reason}")
            }
            Self::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for ConnectorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_error_display() {
        let err = ConnectorError::ConnectionFailed {
            reason: "host unreachable".to_string(),
        };
        assert!(err.to_string().contains("connection failed"));
        assert!(err.to_string().contains("host unreachable"));
    }

    #[test]
    fn connector_error_rate_limited() {
        let err = ConnectorError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert!(err.to_string().contains("60s"));
    }

    #[test]
    fn connector_error_rejected_includes_status() {
        let err = ConnectorError::Rejected {
            status: 400,
            body: "bad ticker".to_string(),
        };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("bad ticker"));
    }
}
