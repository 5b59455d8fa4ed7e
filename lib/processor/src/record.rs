//! Execution records.

use chainflow_core::{ExecutionId, ExecutionRecordId, WorkflowId};
use chainflow_queue::TriggerJob;
use chainflow_workflow::context::{NOTIFICATION_ERROR_VAR, NOTIFIED_AT_VAR};
use chainflow_workflow::{ExecutionResult, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one execution. A row leaves `Processing` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    /// A filter rejected the event before any effect ran.
    Filtered,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Filtered => "filtered",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Filtered)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown execution status: {}", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for ExecutionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "filtered" => Ok(Self::Filtered),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One row of the execution table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionRecordId,
    /// Unique across all executions; the dedup authority.
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub trigger_node_id: NodeId,
    pub status: ExecutionStatus,
    pub trigger_data: JsonValue,
    pub tx_signature: Option<String>,
    pub tx_error: Option<String>,
    pub notified_at: Option<DateTime<Utc>>,
    pub notification_error: Option<String>,
    pub execution_path: Vec<NodeId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// A fresh `processing` row for a job.
    #[must_use]
    pub fn processing(job: &TriggerJob) -> Self {
        Self {
            id: ExecutionRecordId::new(),
            execution_id: job.execution_id.clone(),
            workflow_id: job.workflow_id,
            trigger_node_id: job.trigger_node_id.clone(),
            status: ExecutionStatus::Processing,
            trigger_data: job.trigger_data.clone(),
            tx_signature: None,
            tx_error: None,
            notified_at: None,
            notification_error: None,
            execution_path: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Applies a terminal update.
    pub fn apply(&mut self, completion: &Completion) {
        self.status = completion.status;
        self.tx_signature.clone_from(&completion.tx_signature);
        self.tx_error.clone_from(&completion.tx_error);
        self.notified_at = completion.notified_at;
        self.notification_error
            .clone_from(&completion.notification_error);
        self.execution_path.clone_from(&completion.execution_path);
        self.completed_at = Some(completion.completed_at);
    }
}

/// The terminal update written when an execution finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: ExecutionStatus,
    pub tx_signature: Option<String>,
    pub tx_error: Option<String>,
    pub notified_at: Option<DateTime<Utc>>,
    pub notification_error: Option<String>,
    pub execution_path: Vec<NodeId>,
    pub completed_at: DateTime<Utc>,
}

impl Completion {
    /// Derives the terminal state from an engine result.
    #[must_use]
    pub fn from_result(result: &ExecutionResult) -> Self {
        let status = if !result.success {
            ExecutionStatus::Failed
        } else if result.was_filtered() {
            ExecutionStatus::Filtered
        } else {
            ExecutionStatus::Success
        };
        let variable = |name: &str| {
            result
                .variables
                .get(name)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        Self {
            status,
            tx_signature: result.tx_signature().map(str::to_string),
            tx_error: result.joined_errors(),
            notified_at: variable(NOTIFIED_AT_VAR)
                .and_then(|at| DateTime::parse_from_rfc3339(&at).ok())
                .map(|at| at.with_timezone(&Utc)),
            notification_error: variable(NOTIFICATION_ERROR_VAR),
            execution_path: result.execution_path.clone(),
            completed_at: Utc::now(),
        }
    }

    /// A failure that happened outside the engine's own bookkeeping.
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            tx_signature: None,
            tx_error: Some(reason.into()),
            notified_at: None,
            notification_error: None,
            execution_path: Vec::new(),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainflow_workflow::context::TX_SIGNATURE_VAR;
    use serde_json::{Map, json};

    fn result(success: bool, stopped_by_filter: bool, reached_effect: bool) -> ExecutionResult {
        ExecutionResult {
            success,
            execution_path: vec![NodeId::from("t"), NodeId::from("f")],
            errors: if success {
                Vec::new()
            } else {
                vec!["act: relay down".to_string(), "act2: timeout".to_string()]
            },
            variables: Map::new(),
            stopped_by_filter,
            reached_effect,
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Processing,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Filtered,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>(), Ok(status));
        }
        assert!("done".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn filter_rejection_is_filtered() {
        let completion = Completion::from_result(&result(true, true, false));
        assert_eq!(completion.status, ExecutionStatus::Filtered);
    }

    #[test]
    fn filter_on_one_branch_with_effect_elsewhere_is_success() {
        let completion = Completion::from_result(&result(true, true, true));
        assert_eq!(completion.status, ExecutionStatus::Success);
    }

    #[test]
    fn failure_joins_errors() {
        let completion = Completion::from_result(&result(false, false, true));
        assert_eq!(completion.status, ExecutionStatus::Failed);
        assert_eq!(
            completion.tx_error.as_deref(),
            Some("act: relay down; act2: timeout")
        );
    }

    #[test]
    fn captures_signature_and_notification() {
        let mut result = result(true, false, true);
        result
            .variables
            .insert(TX_SIGNATURE_VAR.to_string(), json!("5sig"));
        result.variables.insert(
            NOTIFIED_AT_VAR.to_string(),
            json!("2026-01-02T03:04:05+00:00"),
        );
        result
            .variables
            .insert(NOTIFICATION_ERROR_VAR.to_string(), json!("discord: 500"));

        let completion = Completion::from_result(&result);

        assert_eq!(completion.tx_signature.as_deref(), Some("5sig"));
        assert_eq!(
            completion.notified_at.map(|at| at.to_rfc3339()),
            Some("2026-01-02T03:04:05+00:00".to_string())
        );
        assert_eq!(completion.notification_error.as_deref(), Some("discord: 500"));
        assert_eq!(completion.execution_path.len(), 2);
    }
}
