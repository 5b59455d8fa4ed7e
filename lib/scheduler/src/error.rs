//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: a cron expression or timezone is unusable
//! - `SchedulerError`: a registry or queue operation failed

use chainflow_core::WorkflowId;
use chainflow_workflow::NodeId;
use std::fmt;

/// Errors from parsing and evaluating schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// The expression does not parse.
    InvalidCronExpression { expression: String, reason: String },
    /// The timezone is not a known IANA name.
    InvalidTimezone { timezone: String },
    /// Consecutive runs are closer than the configured floor.
    IntervalTooShort {
        expression: String,
        interval_secs: i64,
        min_interval_secs: u64,
    },
    /// The expression never fires again.
    NoUpcomingRun { expression: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "invalid timezone: {timezone}"),
            Self::IntervalTooShort {
                expression,
                interval_secs,
                min_interval_secs,
            } => write!(
                f,
                "cron expression '{expression}' runs every {interval_secs}s; \
                 minimum interval is {min_interval_secs}s"
            ),
            Self::NoUpcomingRun { expression } => {
                write!(f, "cron expression '{expression}' has no upcoming run")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A cron trigger could not be registered.
    InvalidTrigger {
        workflow_id: WorkflowId,
        trigger_node_id: NodeId,
        reason: String,
    },
    /// The registry could not be read or written.
    Registry { operation: String, reason: String },
    /// A due job could not be enqueued.
    Enqueue { registration_id: String, reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTrigger {
                workflow_id,
                trigger_node_id,
                reason,
            } => write!(
                f,
                "cannot schedule {trigger_node_id} of workflow {workflow_id}: {reason}"
            ),
            Self::Registry { operation, reason } => {
                write!(f, "registry {operation} failed: {reason}")
            }
            Self::Enqueue {
                registration_id,
                reason,
            } => write!(f, "failed to enqueue {registration_id}: {reason}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_error_names_the_floor() {
        let err = ScheduleError::IntervalTooShort {
            expression: "*/1 * * * * *".to_string(),
            interval_secs: 1,
            min_interval_secs: 60,
        };
        assert!(err.to_string().contains("minimum interval is 60s"));
    }

    #[test]
    fn scheduler_error_display() {
        let err = SchedulerError::Registry {
            operation: "list".to_string(),
            reason: "timeout".to_string(),
        };
        assert_eq!(err.to_string(), "registry list failed: timeout");
    }
}
