//! Enabled-workflow source backed by the workflow table.

use crate::db::WorkflowRepository;
use async_trait::async_trait;
use chainflow_listener::{ListenerError, WorkflowSource};
use chainflow_workflow::Workflow;
use rootcause::Report;

#[async_trait]
impl WorkflowSource for WorkflowRepository {
    async fn enabled_workflows(&self) -> Result<Vec<Workflow>, Report<ListenerError>> {
        self.list_enabled().await.map_err(|e| {
            ListenerError::WorkflowSource {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
