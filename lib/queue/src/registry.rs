//! Repeatable-job registry.
//!
//! The registry holds the scheduler's actual state: one entry per cron
//! registration. The database holds desired state and the two are diffed.

use crate::error::QueueError;
use crate::job::{JobSource, TriggerJob};
use async_trait::async_trait;
use chainflow_core::{ExecutionId, WorkflowId};
use chainflow_workflow::{NodeId, WorkflowGraph, WorkflowMetadata};
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

/// A registered recurring job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatableJob {
    /// Registry key, `cron:{workflowId}:{triggerNodeId}`.
    pub id: String,
    pub workflow_id: WorkflowId,
    pub trigger_node_id: NodeId,
    /// Cron expression, five or six fields.
    pub schedule: String,
    /// IANA timezone name; UTC when absent.
    pub timezone: Option<String>,
    /// Static payload merged into the trigger data of every run.
    pub payload: Option<JsonValue>,
    pub graph: WorkflowGraph,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub registered_at: DateTime<Utc>,
    /// Scheduled time of the most recent fire.
    pub last_fired_at: Option<DateTime<Utc>>,
}

impl RepeatableJob {
    /// Builds the trigger job for the run scheduled at `fire_time`.
    #[must_use]
    pub fn job_for(&self, fire_time: DateTime<Utc>) -> TriggerJob {
        let mut trigger_data = json!({
            "scheduledAt": fire_time.to_rfc3339(),
            "schedule": self.schedule,
            "timezone": self.timezone.as_deref().unwrap_or("UTC"),
        });
        if let Some(payload) = &self.payload {
            trigger_data["payload"] = payload.clone();
        }

        TriggerJob {
            execution_id: ExecutionId::new(format!("{}:{}", self.id, fire_time.timestamp())),
            workflow_id: self.workflow_id,
            trigger_node_id: self.trigger_node_id.clone(),
            source: JobSource::Cron,
            trigger_data,
            graph: self.graph.clone(),
            metadata: self.metadata.clone(),
            enqueued_at: Utc::now(),
        }
    }
}

/// Storage for repeatable jobs.
#[async_trait]
pub trait RepeatableJobStore: Send + Sync {
    /// Lists every registration.
    async fn list(&self) -> Result<Vec<RepeatableJob>, Report<QueueError>>;

    /// Lists registration ids only.
    async fn list_ids(&self) -> Result<Vec<String>, Report<QueueError>> {
        Ok(self.list().await?.into_iter().map(|job| job.id).collect())
    }

    /// Loads one registration.
    async fn get(&self, id: &str) -> Result<Option<RepeatableJob>, Report<QueueError>>;

    /// Inserts or replaces a registration.
    async fn put(&self, job: &RepeatableJob) -> Result<(), Report<QueueError>>;

    /// Removes a registration. Returns false if it did not exist.
    async fn remove(&self, id: &str) -> Result<bool, Report<QueueError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn registration(payload: Option<JsonValue>) -> RepeatableJob {
        RepeatableJob {
            id: "cron:wf_1:tick".to_string(),
            workflow_id: WorkflowId::new(),
            trigger_node_id: NodeId::from("tick"),
            schedule: "*/5 * * * *".to_string(),
            timezone: None,
            payload,
            graph: WorkflowGraph::new(),
            metadata: WorkflowMetadata::default(),
            registered_at: Utc::now(),
            last_fired_at: None,
        }
    }

    #[test]
    fn fire_time_is_part_of_execution_id() {
        let fire = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).single().expect("time");
        let job = registration(None).job_for(fire);

        assert_eq!(
            job.execution_id.as_str(),
            format!("cron:wf_1:tick:{}", fire.timestamp())
        );
        assert_eq!(job.source, JobSource::Cron);
        assert_eq!(job.trigger_data["timezone"], "UTC");
    }

    #[test]
    fn static_payload_is_carried() {
        let fire = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).single().expect("time");
        let job = registration(Some(json!({ "market": "BTC-100K" }))).job_for(fire);

        assert_eq!(job.trigger_data["payload"]["market"], "BTC-100K");
    }
}
