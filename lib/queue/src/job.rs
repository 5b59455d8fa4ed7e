//! Trigger jobs and the queue they travel through.

use crate::envelope::{CURRENT_VERSION, Envelope, RawEnvelope};
use crate::error::QueueError;
use async_trait::async_trait;
use chainflow_core::{ExecutionId, WorkflowId};
use chainflow_workflow::{NodeId, WorkflowGraph, WorkflowMetadata};
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// What produced a trigger job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    /// A blockchain notification.
    ChainEvent,
    /// A cron registration firing.
    Cron,
}

impl JobSource {
    /// Job name, also used as the last subject token.
    #[must_use]
    pub fn job_name(self) -> &'static str {
        match self {
            Self::ChainEvent => "chain_event",
            Self::Cron => "cron",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

/// One unit of work: run `graph` for a single triggering event.
///
/// The job carries its own copy of the graph and metadata so that a worker
/// never reads workflow state from the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerJob {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub trigger_node_id: NodeId,
    pub source: JobSource,
    pub trigger_data: JsonValue,
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub enqueued_at: DateTime<Utc>,
}

impl TriggerJob {
    /// Encodes the job inside a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be serialized.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Report<QueueError>> {
        Envelope::new(self)
            .to_json_bytes()
            .map_err(|e| {
                QueueError::Serialization {
                    message: format!("failed to encode job {}: {e}", self.execution_id),
                }
                .into()
            })
    }

    /// Decodes a job, rejecting envelope versions this build does not know.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a current-version job envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Report<QueueError>> {
        let raw = RawEnvelope::from_json_bytes(bytes).map_err(|e| QueueError::Serialization {
            message: format!("not a job envelope: {e}"),
        })?;
        if raw.version != CURRENT_VERSION {
            return Err(QueueError::Serialization {
                message: format!("unsupported job envelope version {}", raw.version),
            }
            .into());
        }
        let envelope: Envelope<Self> =
            raw.deserialize_payload()
                .map_err(|e| QueueError::Serialization {
                    message: format!("malformed job payload: {e}"),
                })?;
        Ok(envelope.into_payload())
    }
}

/// Per-enqueue options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Messages sharing a key inside the duplicate window are stored once.
    pub dedup_key: Option<String>,
}

impl EnqueueOptions {
    #[must_use]
    pub fn dedup(key: impl Into<String>) -> Self {
        Self {
            dedup_key: Some(key.into()),
        }
    }

    /// Options deduplicating on the job's execution id.
    #[must_use]
    pub fn for_job(job: &TriggerJob) -> Self {
        Self::dedup(job.execution_id.as_str())
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was stored.
    Enqueued,
    /// An identical dedup key was already seen; nothing new was stored.
    Duplicate,
}

/// A durable at-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a trigger job.
    async fn enqueue(
        &self,
        job: &TriggerJob,
        options: &EnqueueOptions,
    ) -> Result<EnqueueOutcome, Report<QueueError>>;
}
