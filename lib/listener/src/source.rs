//! Where the listener learns which workflows should be live.

use crate::error::ListenerError;
use async_trait::async_trait;
use chainflow_workflow::Workflow;
use rootcause::Report;

/// Supplies the current enabled workflows.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    async fn enabled_workflows(&self) -> Result<Vec<Workflow>, Report<ListenerError>>;
}
