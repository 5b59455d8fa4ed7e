//! Cron registration management.
//!
//! The scheduler is the only writer of the repeatable-job registry. Every
//! registration is keyed `cron:{workflowId}:{triggerNodeId}` and scheduling
//! always replaces.

use crate::error::SchedulerError;
use crate::reconcile::{self, cron_job_id, workflow_prefix};
use crate::schedule::{CronSchedule, DEFAULT_MIN_INTERVAL};
use chainflow_core::WorkflowId;
use chainflow_queue::{QueueError, RepeatableJob, RepeatableJobStore};
use chainflow_workflow::{NodeId, TriggerConfig, Workflow, WorkflowGraph, WorkflowMetadata};
use chrono::Utc;
use rootcause::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A cron trigger node lifted out of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronTrigger {
    pub trigger_node_id: NodeId,
    pub schedule: String,
    pub timezone: Option<String>,
    pub payload: Option<JsonValue>,
}

impl CronTrigger {
    /// Every cron trigger in `graph`.
    #[must_use]
    pub fn from_graph(graph: &WorkflowGraph) -> Vec<Self> {
        graph
            .cron_triggers()
            .filter_map(|(node, config)| match config {
                TriggerConfig::Cron {
                    schedule,
                    timezone,
                    payload,
                } => Some(Self {
                    trigger_node_id: node.id.clone(),
                    schedule: schedule.clone(),
                    timezone: timezone.clone(),
                    payload: payload.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Counts from syncing one workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Counts from reconciling every workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub added: usize,
    pub removed: usize,
    /// Registrations re-put because their stored trigger or graph drifted.
    pub refreshed: usize,
    pub failed: usize,
}

impl ReconcileResult {
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.removed > 0 || self.refreshed > 0
    }
}

/// Whether a stored registration differs from what the workflow wants now.
fn is_stale(registered: &RepeatableJob, trigger: &CronTrigger, workflow: &Workflow) -> bool {
    if registered.schedule != trigger.schedule
        || registered.timezone != trigger.timezone
        || registered.payload != trigger.payload
        || registered.metadata != workflow.metadata
    {
        return true;
    }
    match (
        serde_json::to_value(&registered.graph),
        serde_json::to_value(&workflow.graph),
    ) {
        (Ok(stored), Ok(wanted)) => stored != wanted,
        _ => true,
    }
}

fn registry_error(operation: &'static str) -> impl FnOnce(Report<QueueError>) -> SchedulerError {
    move |e| SchedulerError::Registry {
        operation: operation.to_string(),
        reason: e.current_context().to_string(),
    }
}

/// Keeps cron registrations in line with workflow state.
#[derive(Clone)]
pub struct CronScheduler {
    store: Arc<dyn RepeatableJobStore>,
    min_interval: Duration,
}

impl CronScheduler {
    /// Creates a scheduler writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RepeatableJobStore>) -> Self {
        Self {
            store,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }

    /// Overrides the minimum interval used when validating workflows.
    #[must_use]
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Registers (or re-registers) one cron trigger.
    ///
    /// Returns the registration id.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule does not parse or the registry is
    /// unavailable.
    #[instrument(skip_all, fields(workflow_id = %workflow_id, trigger_node_id = %trigger.trigger_node_id))]
    pub async fn schedule_cron_trigger(
        &self,
        workflow_id: WorkflowId,
        trigger: &CronTrigger,
        graph: &WorkflowGraph,
        metadata: &WorkflowMetadata,
    ) -> Result<String, Report<SchedulerError>> {
        CronSchedule::parse(&trigger.schedule, trigger.timezone.as_deref()).map_err(|e| {
            SchedulerError::InvalidTrigger {
                workflow_id,
                trigger_node_id: trigger.trigger_node_id.clone(),
                reason: e.to_string(),
            }
        })?;

        let id = cron_job_id(workflow_id, &trigger.trigger_node_id);
        self.store
            .remove(&id)
            .await
            .map_err(registry_error("remove"))?;

        let registration = RepeatableJob {
            id: id.clone(),
            workflow_id,
            trigger_node_id: trigger.trigger_node_id.clone(),
            schedule: trigger.schedule.clone(),
            timezone: trigger.timezone.clone(),
            payload: trigger.payload.clone(),
            graph: graph.clone(),
            metadata: metadata.clone(),
            registered_at: Utc::now(),
            last_fired_at: None,
        };
        self.store
            .put(&registration)
            .await
            .map_err(registry_error("put"))?;

        info!(registration_id = %id, schedule = %trigger.schedule, "cron trigger scheduled");
        Ok(id)
    }

    /// Removes one registration. Returns false if none existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    pub async fn remove_cron_trigger(
        &self,
        workflow_id: WorkflowId,
        trigger_node_id: &NodeId,
    ) -> Result<bool, Report<SchedulerError>> {
        let id = cron_job_id(workflow_id, trigger_node_id);
        let removed = self
            .store
            .remove(&id)
            .await
            .map_err(registry_error("remove"))?;
        if removed {
            info!(registration_id = %id, "cron trigger removed");
        }
        Ok(removed)
    }

    /// Removes every registration of a workflow. Returns how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be listed. Individual removal
    /// failures are logged and skipped.
    pub async fn remove_all_for_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<usize, Report<SchedulerError>> {
        let mut removed = 0;
        for id in self.registered_for(workflow_id).await? {
            match self.store.remove(&id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(registration_id = %id, error = %e.current_context(), "failed to remove registration");
                }
            }
        }
        if removed > 0 {
            info!(workflow_id = %workflow_id, removed, "cron triggers removed");
        }
        Ok(removed)
    }

    /// Brings one workflow's registrations in line with its graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be listed.
    #[instrument(skip_all, fields(workflow_id = %workflow_id, enabled = enabled))]
    pub async fn sync_workflow_cron_jobs(
        &self,
        workflow_id: WorkflowId,
        graph: &WorkflowGraph,
        metadata: &WorkflowMetadata,
        enabled: bool,
    ) -> Result<SyncResult, Report<SchedulerError>> {
        let triggers = CronTrigger::from_graph(graph);
        if !enabled || triggers.is_empty() {
            let removed = self.remove_all_for_workflow(workflow_id).await?;
            return Ok(SyncResult {
                removed,
                ..SyncResult::default()
            });
        }

        let existing = self.registered_for(workflow_id).await?;
        let mut result = SyncResult::default();
        let mut current = BTreeSet::new();

        for trigger in &triggers {
            current.insert(cron_job_id(workflow_id, &trigger.trigger_node_id));
            match self
                .schedule_cron_trigger(workflow_id, trigger, graph, metadata)
                .await
            {
                Ok(_) => result.added += 1,
                Err(e) => {
                    warn!(trigger_node_id = %trigger.trigger_node_id, error = %e.current_context(), "failed to schedule cron trigger");
                    result.failed += 1;
                }
            }
        }

        for stale in existing.difference(&current) {
            match self.store.remove(stale).await {
                Ok(true) => result.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(registration_id = %stale, error = %e.current_context(), "failed to remove stale registration");
                    result.failed += 1;
                }
            }
        }

        debug!(added = result.added, removed = result.removed, "workflow cron jobs synced");
        Ok(result)
    }

    /// Reconciles the registry against every workflow.
    ///
    /// Registrations with no active cron trigger behind them are removed,
    /// missing ones are added, and existing ones whose schedule, timezone,
    /// payload or graph snapshot drifted are re-registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be listed.
    #[instrument(skip_all, fields(workflows = workflows.len()))]
    pub async fn reconcile_all(
        &self,
        workflows: &[Workflow],
    ) -> Result<ReconcileResult, Report<SchedulerError>> {
        let mut expected: BTreeMap<String, (&Workflow, CronTrigger)> = BTreeMap::new();
        for workflow in workflows.iter().filter(|w| w.is_active()) {
            for trigger in CronTrigger::from_graph(&workflow.graph) {
                expected.insert(
                    cron_job_id(workflow.id, &trigger.trigger_node_id),
                    (workflow, trigger),
                );
            }
        }

        let registered: BTreeMap<String, RepeatableJob> = self
            .store
            .list()
            .await
            .map_err(registry_error("list"))?
            .into_iter()
            .filter(|job| job.id.starts_with("cron:"))
            .map(|job| (job.id.clone(), job))
            .collect();
        let actual: BTreeSet<String> = registered.keys().cloned().collect();
        let plan = reconcile::plan(&expected.keys().cloned().collect(), &actual);
        let stale: Vec<&String> = expected
            .iter()
            .filter(|(id, (workflow, trigger))| {
                registered
                    .get(*id)
                    .is_some_and(|job| is_stale(job, trigger, workflow))
            })
            .map(|(id, _)| id)
            .collect();

        let mut result = ReconcileResult::default();
        for id in &plan.to_remove {
            match self.store.remove(id).await {
                Ok(_) => result.removed += 1,
                Err(e) => {
                    warn!(registration_id = %id, error = %e.current_context(), "failed to remove orphaned registration");
                    result.failed += 1;
                }
            }
        }
        for id in &plan.to_add {
            let Some((workflow, trigger)) = expected.get(id) else {
                continue;
            };
            match self
                .schedule_cron_trigger(workflow.id, trigger, &workflow.graph, &workflow.metadata)
                .await
            {
                Ok(_) => result.added += 1,
                Err(e) => {
                    warn!(registration_id = %id, error = %e.current_context(), "failed to add registration");
                    result.failed += 1;
                }
            }
        }
        for id in stale {
            let Some((workflow, trigger)) = expected.get(id) else {
                continue;
            };
            match self
                .schedule_cron_trigger(workflow.id, trigger, &workflow.graph, &workflow.metadata)
                .await
            {
                Ok(_) => result.refreshed += 1,
                Err(e) => {
                    warn!(registration_id = %id, error = %e.current_context(), "failed to refresh registration");
                    result.failed += 1;
                }
            }
        }

        info!(
            added = result.added,
            removed = result.removed,
            refreshed = result.refreshed,
            failed = result.failed,
            "cron registrations reconciled"
        );
        Ok(result)
    }

    async fn registered_for(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<BTreeSet<String>, Report<SchedulerError>> {
        let prefix = workflow_prefix(workflow_id);
        Ok(self
            .store
            .list_ids()
            .await
            .map_err(registry_error("list"))?
            .into_iter()
            .filter(|id| id.starts_with(&prefix))
            .collect())
    }
}

impl std::fmt::Debug for CronScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronScheduler")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
