//! Subscription manager.
//!
//! Holds one live chain subscription per (workflow, chain-event trigger node)
//! and turns each matching notification into a deduplicated job. The map is
//! in memory only; a restart rebuilds it from the enabled workflows.

use crate::error::ListenerError;
use crate::event::{TriggerMatcher, execution_id, request_for};
use crate::source::WorkflowSource;
use chainflow_chain::{ChainEvent, ChainNotification, ChainSubscriber, SubscriptionHandle, SubscriptionRequest};
use chainflow_core::{ExecutionId, WorkflowId};
use chainflow_queue::{EnqueueOptions, EnqueueOutcome, JobQueue, JobSource, TriggerJob};
use chainflow_workflow::{NodeId, Workflow, WorkflowGraph, WorkflowMetadata};
use chrono::{DateTime, Utc};
use rootcause::Report;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default period between resyncs against the enabled workflows.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Counts exposed for health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    /// Workflows with at least one chain-event trigger held.
    pub workflows: usize,
    /// Triggers with a live subscription.
    pub active_subscriptions: usize,
    /// Triggers waiting to be (re)subscribed.
    pub pending_subscriptions: usize,
}

/// Counts from subscribing one workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeSummary {
    pub subscribed: usize,
    pub failed: usize,
}

/// Counts from a resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub subscribed: usize,
    pub resubscribed: usize,
    pub unsubscribed: usize,
}

/// What became of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Enqueued(ExecutionId),
    Duplicate(ExecutionId),
    /// The trigger's own checks rejected the event.
    NoMatch,
    /// The handle belongs to no held subscription.
    UnknownSubscription,
}

struct HeldTrigger {
    trigger_node_id: NodeId,
    request: SubscriptionRequest,
    matcher: TriggerMatcher,
    handle: Option<SubscriptionHandle>,
}

struct HeldWorkflow {
    updated_at: DateTime<Utc>,
    graph: WorkflowGraph,
    metadata: WorkflowMetadata,
    triggers: Vec<HeldTrigger>,
}

#[derive(Default)]
struct State {
    workflows: HashMap<WorkflowId, HeldWorkflow>,
    handles: HashMap<SubscriptionHandle, (WorkflowId, usize)>,
}

/// Keeps chain subscriptions in line with enabled workflows.
pub struct SubscriptionManager {
    chain: Arc<dyn ChainSubscriber>,
    queue: Arc<dyn JobQueue>,
    state: Mutex<State>,
    /// Serializes subscribe and unsubscribe sequences.
    ops: tokio::sync::Mutex<()>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainSubscriber>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            chain,
            queue,
            state: Mutex::new(State::default()),
            ops: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes every chain-event trigger of `workflow`, replacing any
    /// subscriptions already held for it.
    ///
    /// A trigger that fails to subscribe is kept as pending and retried on
    /// the next resync or reconnect.
    #[instrument(skip_all, fields(workflow_id = %workflow.id))]
    pub async fn subscribe(&self, workflow: &Workflow) -> SubscribeSummary {
        let _ops = self.ops.lock().await;
        self.release(workflow.id).await;
        if !workflow.is_active() {
            return SubscribeSummary::default();
        }

        let mut summary = SubscribeSummary::default();
        let mut triggers = Vec::new();
        for (node, config) in workflow.graph.triggers() {
            let Some(request) = request_for(config) else {
                continue;
            };
            match TriggerMatcher::new(config.clone()) {
                Ok(matcher) => triggers.push(HeldTrigger {
                    trigger_node_id: node.id.clone(),
                    request,
                    matcher,
                    handle: None,
                }),
                Err(e) => {
                    warn!(trigger_node_id = %node.id, error = %e, "skipping trigger with invalid log filter");
                    summary.failed += 1;
                }
            }
        }
        if triggers.is_empty() {
            return summary;
        }

        // Held before any subscription opens, so a notification on an early
        // trigger resolves while later triggers are still subscribing.
        let pending: Vec<(NodeId, SubscriptionRequest)> = triggers
            .iter()
            .map(|t| (t.trigger_node_id.clone(), t.request.clone()))
            .collect();
        self.state().workflows.insert(
            workflow.id,
            HeldWorkflow {
                updated_at: workflow.updated_at,
                graph: workflow.graph.clone(),
                metadata: workflow.metadata.clone(),
                triggers,
            },
        );

        for (index, (trigger_node_id, request)) in pending.into_iter().enumerate() {
            match self.open(workflow.id, &trigger_node_id, &request).await {
                Some(handle) if self.attach(workflow.id, index, handle) => summary.subscribed += 1,
                Some(handle) => {
                    self.close(handle).await;
                    summary.failed += 1;
                }
                None => summary.failed += 1,
            }
        }

        info!(
            subscribed = summary.subscribed,
            failed = summary.failed,
            "workflow subscribed"
        );
        summary
    }

    /// Drops every subscription of a workflow. Returns how many were live.
    pub async fn unsubscribe(&self, workflow_id: WorkflowId) -> usize {
        let _ops = self.ops.lock().await;
        self.release(workflow_id).await
    }

    /// Drops every subscription held. Returns how many were live.
    pub async fn unsubscribe_all(&self) -> usize {
        let _ops = self.ops.lock().await;
        let held = std::mem::take(&mut *self.state());
        let mut closed = 0;
        for handle in held.handles.into_keys() {
            if self.close(handle).await {
                closed += 1;
            }
        }
        info!(closed, "all subscriptions released");
        closed
    }

    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        let state = self.state();
        let (active, pending) = state
            .workflows
            .values()
            .flat_map(|held| &held.triggers)
            .fold((0, 0), |(active, pending), trigger| {
                if trigger.handle.is_some() {
                    (active + 1, pending)
                } else {
                    (active, pending + 1)
                }
            });
        ListenerStats {
            workflows: state.workflows.len(),
            active_subscriptions: active,
            pending_subscriptions: pending,
        }
    }

    /// Matches a notification against its trigger and enqueues a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be enqueued.
    pub async fn handle_notification(
        &self,
        notification: &ChainNotification,
    ) -> Result<NotificationOutcome, Report<ListenerError>> {
        let job = {
            let mut state = self.state();
            let Some(&(workflow_id, index)) = state.handles.get(&notification.handle) else {
                return Ok(NotificationOutcome::UnknownSubscription);
            };
            let Some(held) = state.workflows.get_mut(&workflow_id) else {
                return Ok(NotificationOutcome::UnknownSubscription);
            };
            let Some(trigger) = held.triggers.get_mut(index) else {
                return Ok(NotificationOutcome::UnknownSubscription);
            };
            let Some(matched) = trigger
                .matcher
                .observe(notification.slot, &notification.payload)
            else {
                return Ok(NotificationOutcome::NoMatch);
            };

            TriggerJob {
                execution_id: execution_id(
                    workflow_id,
                    notification.slot,
                    &trigger.trigger_node_id,
                    &matched.discriminator,
                ),
                workflow_id,
                trigger_node_id: trigger.trigger_node_id.clone(),
                source: JobSource::ChainEvent,
                trigger_data: matched.trigger_data,
                graph: held.graph.clone(),
                metadata: held.metadata.clone(),
                enqueued_at: Utc::now(),
            }
        };

        let outcome = self
            .queue
            .enqueue(&job, &EnqueueOptions::for_job(&job))
            .await
            .map_err(|e| ListenerError::Enqueue {
                execution_id: job.execution_id.clone(),
                reason: e.current_context().to_string(),
            })?;

        debug!(
            workflow_id = %job.workflow_id,
            trigger_node_id = %job.trigger_node_id,
            execution_id = %job.execution_id,
            slot = notification.slot,
            ?outcome,
            "notification enqueued"
        );
        Ok(match outcome {
            EnqueueOutcome::Enqueued => NotificationOutcome::Enqueued(job.execution_id),
            EnqueueOutcome::Duplicate => NotificationOutcome::Duplicate(job.execution_id),
        })
    }

    /// Re-issues every held subscription after a connection loss.
    pub async fn resubscribe_all(&self) -> usize {
        let _ops = self.ops.lock().await;
        let mut targets: Vec<(WorkflowId, usize, NodeId, SubscriptionRequest)> = Vec::new();
        {
            let mut state = self.state();
            state.handles.clear();
            for (&workflow_id, held) in &mut state.workflows {
                for (index, trigger) in held.triggers.iter_mut().enumerate() {
                    trigger.handle = None;
                    targets.push((
                        workflow_id,
                        index,
                        trigger.trigger_node_id.clone(),
                        trigger.request.clone(),
                    ));
                }
            }
        }

        let mut restored = 0;
        for (workflow_id, index, trigger_node_id, request) in targets {
            if let Some(handle) = self.open(workflow_id, &trigger_node_id, &request).await
                && self.attach(workflow_id, index, handle)
            {
                restored += 1;
            }
        }
        info!(restored, "subscriptions re-issued");
        restored
    }

    /// Diffs held subscriptions against `workflows`.
    ///
    /// New workflows are subscribed, missing or disabled ones dropped, and
    /// ones whose `updated_at` moved are re-subscribed. Pending triggers of
    /// unchanged workflows are retried.
    #[instrument(skip_all, fields(workflows = workflows.len()))]
    pub async fn resync(&self, workflows: &[Workflow]) -> ResyncSummary {
        let wanted: HashMap<WorkflowId, &Workflow> = workflows
            .iter()
            .filter(|w| w.is_active() && w.graph.triggers().any(|(_, c)| c.is_chain_event()))
            .map(|w| (w.id, w))
            .collect();
        let held: HashMap<WorkflowId, DateTime<Utc>> = self
            .state()
            .workflows
            .iter()
            .map(|(id, held)| (*id, held.updated_at))
            .collect();

        let mut summary = ResyncSummary::default();
        for workflow_id in held.keys().filter(|id| !wanted.contains_key(id)) {
            self.unsubscribe(*workflow_id).await;
            summary.unsubscribed += 1;
        }
        for (workflow_id, workflow) in &wanted {
            match held.get(workflow_id) {
                None => {
                    self.subscribe(workflow).await;
                    summary.subscribed += 1;
                }
                Some(updated_at) if *updated_at != workflow.updated_at => {
                    self.subscribe(workflow).await;
                    summary.resubscribed += 1;
                }
                Some(_) => self.retry_pending(*workflow_id).await,
            }
        }

        if summary != ResyncSummary::default() {
            info!(
                subscribed = summary.subscribed,
                resubscribed = summary.resubscribed,
                unsubscribed = summary.unsubscribed,
                "subscriptions resynced"
            );
        }
        summary
    }

    /// Consumes chain events until `cancel` fires.
    ///
    /// Reconnects and periodic resyncs run on their own tasks so the event
    /// loop keeps draining notifications meanwhile.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChainEvent>,
        source: Arc<dyn WorkflowSource>,
        resync_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut resync = tokio::time::interval(resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Skip);
        resync.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    None => {
                        warn!("chain event stream closed");
                        break;
                    }
                    Some(ChainEvent::Notification(notification)) => {
                        if let Err(e) = self.handle_notification(&notification).await {
                            error!(error = %e.current_context(), "failed to enqueue notification");
                        }
                    }
                    Some(ChainEvent::Reconnected) => {
                        let manager = Arc::clone(&self);
                        tokio::spawn(async move {
                            manager.resubscribe_all().await;
                        });
                    }
                },
                _ = resync.tick() => {
                    let manager = Arc::clone(&self);
                    let source = Arc::clone(&source);
                    tokio::spawn(async move {
                        match source.enabled_workflows().await {
                            Ok(workflows) => {
                                manager.resync(&workflows).await;
                            }
                            Err(e) => warn!(error = %e.current_context(), "resync skipped"),
                        }
                    });
                }
            }
        }
        info!("listener stopped");
    }

    async fn retry_pending(&self, workflow_id: WorkflowId) {
        let _ops = self.ops.lock().await;
        let pending: Vec<(usize, NodeId, SubscriptionRequest)> = {
            let state = self.state();
            let Some(held) = state.workflows.get(&workflow_id) else {
                return;
            };
            held.triggers
                .iter()
                .enumerate()
                .filter(|(_, trigger)| trigger.handle.is_none())
                .map(|(index, trigger)| {
                    (index, trigger.trigger_node_id.clone(), trigger.request.clone())
                })
                .collect()
        };
        for (index, trigger_node_id, request) in pending {
            if let Some(handle) = self.open(workflow_id, &trigger_node_id, &request).await {
                self.attach(workflow_id, index, handle);
            }
        }
    }

    /// Records a fresh handle. Returns false if the workflow went away.
    fn attach(&self, workflow_id: WorkflowId, index: usize, handle: SubscriptionHandle) -> bool {
        let mut state = self.state();
        let attached = match state
            .workflows
            .get_mut(&workflow_id)
            .and_then(|held| held.triggers.get_mut(index))
        {
            Some(trigger) => {
                trigger.handle = Some(handle);
                true
            }
            None => false,
        };
        if attached {
            state.handles.insert(handle, (workflow_id, index));
        }
        attached
    }

    async fn open(
        &self,
        workflow_id: WorkflowId,
        trigger_node_id: &NodeId,
        request: &SubscriptionRequest,
    ) -> Option<SubscriptionHandle> {
        match self.chain.subscribe(request.clone()).await {
            Ok(handle) => {
                debug!(workflow_id = %workflow_id, trigger_node_id = %trigger_node_id, handle = %handle, "subscribed");
                Some(handle)
            }
            Err(e) => {
                let err = ListenerError::Subscribe {
                    workflow_id,
                    trigger_node_id: trigger_node_id.clone(),
                    reason: e.current_context().to_string(),
                };
                warn!(error = %err, "subscription failed");
                None
            }
        }
    }

    async fn close(&self, handle: SubscriptionHandle) -> bool {
        match self.chain.unsubscribe(handle).await {
            Ok(()) => true,
            Err(e) => {
                warn!(handle = %handle, error = %e.current_context(), "unsubscribe failed");
                false
            }
        }
    }

    /// Removes a workflow from the map and closes its subscriptions.
    /// Callers hold `ops`.
    async fn release(&self, workflow_id: WorkflowId) -> usize {
        let handles: Vec<SubscriptionHandle> = {
            let mut state = self.state();
            let Some(held) = state.workflows.remove(&workflow_id) else {
                return 0;
            };
            let handles: Vec<_> = held.triggers.iter().filter_map(|t| t.handle).collect();
            for handle in &handles {
                state.handles.remove(handle);
            }
            handles
        };

        let mut closed = 0;
        for handle in handles {
            if self.close(handle).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!(workflow_id = %workflow_id, closed, "workflow unsubscribed");
        }
        closed
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
