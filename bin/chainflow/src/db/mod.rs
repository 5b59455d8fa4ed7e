//! Database repositories for the chainflow platform.
//!
//! - Workflows: desired state for subscriptions and cron registrations
//! - Executions: one row per processed trigger event

pub mod execution;
pub mod workflow;

pub use execution::PgExecutionStore;
pub use workflow::WorkflowRepository;

/// Wraps a decode failure the way sqlx reports column decode errors.
fn decode_error(what: &str, value: &str, reason: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{value}': {reason}"),
    )))
}
