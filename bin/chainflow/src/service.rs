//! Workflow mutations.
//!
//! Every mutation validates the whole workflow first and reports every
//! problem at once, writes the workflow table, then brings that workflow's
//! cron registrations in line. The subscription manager picks up changes on
//! its next resync.

use crate::db::WorkflowRepository;
use crate::error::ServiceError;
use async_trait::async_trait;
use chainflow_core::{UserId, WorkflowId};
use chainflow_scheduler::{CronScheduler, validate_workflow};
use chainflow_workflow::{Workflow, WorkflowGraph, WorkflowMetadata};
use rootcause::Report;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Persistence used by [`WorkflowService`].
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find(&self, id: WorkflowId) -> Result<Option<Workflow>, Report<ServiceError>>;

    async fn insert(&self, workflow: &Workflow) -> Result<(), Report<ServiceError>>;

    /// Returns false if no row matched.
    async fn save(&self, workflow: &Workflow) -> Result<bool, Report<ServiceError>>;
}

fn database_error(operation: &'static str) -> impl FnOnce(sqlx::Error) -> ServiceError {
    move |e| ServiceError::Database {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl WorkflowStore for WorkflowRepository {
    async fn find(&self, id: WorkflowId) -> Result<Option<Workflow>, Report<ServiceError>> {
        Ok(self.find_by_id(id).await.map_err(database_error("lookup"))?)
    }

    async fn insert(&self, workflow: &Workflow) -> Result<(), Report<ServiceError>> {
        Ok(self.create(workflow).await.map_err(database_error("insert"))?)
    }

    async fn save(&self, workflow: &Workflow) -> Result<bool, Report<ServiceError>> {
        Ok(self.update(workflow).await.map_err(database_error("update"))?)
    }
}

/// Input for [`WorkflowService::create`].
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub user_id: UserId,
    pub name: String,
    pub graph: WorkflowGraph,
    pub metadata: WorkflowMetadata,
    pub enabled: bool,
}

/// Creates, edits, toggles and deletes workflows.
pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
    scheduler: CronScheduler,
}

impl WorkflowService {
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowStore>, scheduler: CronScheduler) -> Self {
        Self { store, scheduler }
    }

    /// Validates and stores a new workflow.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`] with every problem found, or a
    /// database error.
    #[instrument(skip_all, fields(user_id = %new.user_id, name = %new.name))]
    pub async fn create(&self, new: NewWorkflow) -> Result<Workflow, Report<ServiceError>> {
        let mut workflow = Workflow::new(new.user_id, new.name, new.graph);
        workflow.metadata = new.metadata;
        workflow.enabled = new.enabled;

        self.validate(&workflow)?;
        self.store.insert(&workflow).await?;
        info!(workflow_id = %workflow.id, enabled = workflow.enabled, "workflow created");

        self.sync_cron(&workflow).await;
        Ok(workflow)
    }

    /// Replaces a workflow's graph, bumping its version.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`], [`ServiceError::NotFound`] or a
    /// database error.
    #[instrument(skip_all, fields(workflow_id = %id))]
    pub async fn update_graph(
        &self,
        id: WorkflowId,
        graph: WorkflowGraph,
    ) -> Result<Workflow, Report<ServiceError>> {
        let mut workflow = self.load(id).await?;
        workflow.replace_graph(graph);

        self.validate(&workflow)?;
        self.persist(&workflow).await?;
        info!(version = workflow.metadata.version, "workflow graph updated");

        self.sync_cron(&workflow).await;
        Ok(workflow)
    }

    /// Enables or disables a workflow. Enabling re-validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Validation`], [`ServiceError::NotFound`] or a
    /// database error.
    #[instrument(skip_all, fields(workflow_id = %id, enabled = enabled))]
    pub async fn set_enabled(
        &self,
        id: WorkflowId,
        enabled: bool,
    ) -> Result<Workflow, Report<ServiceError>> {
        let mut workflow = self.load(id).await?;
        if enabled {
            workflow.enable();
            self.validate(&workflow)?;
        } else {
            workflow.disable();
        }

        self.persist(&workflow).await?;
        info!("workflow toggled");

        self.sync_cron(&workflow).await;
        Ok(workflow)
    }

    /// Soft-deletes a workflow and drops its cron registrations.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::NotFound`] or a database error.
    #[instrument(skip_all, fields(workflow_id = %id))]
    pub async fn delete(&self, id: WorkflowId) -> Result<(), Report<ServiceError>> {
        let mut workflow = self.load(id).await?;
        workflow.mark_deleted();

        self.persist(&workflow).await?;
        info!("workflow deleted");

        self.sync_cron(&workflow).await;
        Ok(())
    }

    fn validate(&self, workflow: &Workflow) -> Result<(), ServiceError> {
        validate_workflow(workflow, self.scheduler.min_interval()).map_err(ServiceError::Validation)
    }

    async fn load(&self, id: WorkflowId) -> Result<Workflow, Report<ServiceError>> {
        match self.store.find(id).await? {
            Some(workflow) if workflow.deleted_at.is_none() => Ok(workflow),
            _ => Err(ServiceError::NotFound { workflow_id: id }.into()),
        }
    }

    async fn persist(&self, workflow: &Workflow) -> Result<(), Report<ServiceError>> {
        if self.store.save(workflow).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound {
                workflow_id: workflow.id,
            }
            .into())
        }
    }

    /// The workflow row is already committed; a failed sync is repaired by
    /// the next startup reconciliation.
    async fn sync_cron(&self, workflow: &Workflow) {
        match self
            .scheduler
            .sync_workflow_cron_jobs(
                workflow.id,
                &workflow.graph,
                &workflow.metadata,
                workflow.is_active(),
            )
            .await
        {
            Ok(result) => info!(
                workflow_id = %workflow.id,
                added = result.added,
                removed = result.removed,
                failed = result.failed,
                "cron registrations synced"
            ),
            Err(e) => warn!(
                workflow_id = %workflow.id,
                error = %e.current_context(),
                "cron sync failed, left to reconciliation"
            ),
        }
    }
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService").finish_non_exhaustive()
    }
}
