//! Fires due cron registrations into the job queue.
//!
//! Each fire carries the execution id
//! `cron:{workflowId}:{triggerNodeId}:{fireTimestamp}`, so replicas ticking
//! the same registry collapse into one queued job. Runs missed while no
//! ticker was alive are not replayed; only the latest due run fires.

use crate::error::SchedulerError;
use crate::schedule::CronSchedule;
use chainflow_queue::{EnqueueOptions, EnqueueOutcome, JobQueue, RepeatableJob, RepeatableJobStore};
use chrono::{DateTime, Utc};
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default time between registry scans.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub fired: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Periodically enqueues due cron jobs.
pub struct CronTicker {
    store: Arc<dyn RepeatableJobStore>,
    queue: Arc<dyn JobQueue>,
    interval: Duration,
}

impl CronTicker {
    #[must_use]
    pub fn new(store: Arc<dyn RepeatableJobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            queue,
            interval: DEFAULT_TICK_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Scans every registration once, firing those due at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be listed. Per-registration
    /// failures are logged and counted.
    #[instrument(skip_all)]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary, Report<SchedulerError>> {
        let registrations = self
            .store
            .list()
            .await
            .map_err(|e| SchedulerError::Registry {
                operation: "list".to_string(),
                reason: e.current_context().to_string(),
            })?;

        let mut summary = TickSummary::default();
        for registration in registrations {
            match self.fire_if_due(registration, now).await {
                Ok(Some(EnqueueOutcome::Enqueued)) => summary.fired += 1,
                Ok(Some(EnqueueOutcome::Duplicate)) => summary.duplicates += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e.current_context(), "cron fire failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn fire_if_due(
        &self,
        mut registration: RepeatableJob,
        now: DateTime<Utc>,
    ) -> Result<Option<EnqueueOutcome>, Report<SchedulerError>> {
        let schedule = CronSchedule::parse(&registration.schedule, registration.timezone.as_deref())
            .map_err(|e| SchedulerError::InvalidTrigger {
                workflow_id: registration.workflow_id,
                trigger_node_id: registration.trigger_node_id.clone(),
                reason: e.to_string(),
            })?;

        let anchor = registration
            .last_fired_at
            .unwrap_or(registration.registered_at);
        let Some(fire_time) = schedule.latest_due(anchor, now) else {
            return Ok(None);
        };

        let job = registration.job_for(fire_time);
        let outcome = self
            .queue
            .enqueue(&job, &EnqueueOptions::for_job(&job))
            .await
            .map_err(|e| SchedulerError::Enqueue {
                registration_id: registration.id.clone(),
                reason: e.current_context().to_string(),
            })?;
        debug!(execution_id = %job.execution_id, ?outcome, "cron job fired");

        // Skip the write-back if the registration was replaced meanwhile.
        let current = self
            .store
            .get(&registration.id)
            .await
            .map_err(|e| SchedulerError::Registry {
                operation: "get".to_string(),
                reason: e.current_context().to_string(),
            })?;
        if current.is_some_and(|c| c.registered_at == registration.registered_at) {
            registration.last_fired_at = Some(fire_time);
            self.store
                .put(&registration)
                .await
                .map_err(|e| SchedulerError::Registry {
                    operation: "put".to_string(),
                    reason: e.current_context().to_string(),
                })?;
        }

        Ok(Some(outcome))
    }

    /// Ticks until `cancel` is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "cron ticker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(summary) if summary.fired + summary.duplicates + summary.failed > 0 => {
                            debug!(?summary, "cron tick");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e.current_context(), "cron tick failed"),
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        info!("cron ticker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{CronScheduler, CronTrigger};
    use chainflow_core::WorkflowId;
    use chainflow_queue::testing::{InMemoryJobQueue, InMemoryRepeatableJobStore};
    use chainflow_workflow::{NodeId, WorkflowGraph, WorkflowMetadata};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0)
            .single()
            .expect("valid time")
    }

    fn registration(registered_at: DateTime<Utc>) -> RepeatableJob {
        RepeatableJob {
            id: "cron:wf_x:tick".to_string(),
            workflow_id: WorkflowId::new(),
            trigger_node_id: NodeId::from("tick"),
            schedule: "*/15 * * * *".to_string(),
            timezone: None,
            payload: None,
            graph: WorkflowGraph::new(),
            metadata: WorkflowMetadata::default(),
            registered_at,
            last_fired_at: None,
        }
    }

    async fn ticker_with(
        registration: &RepeatableJob,
        queue: Arc<InMemoryJobQueue>,
    ) -> (CronTicker, Arc<InMemoryRepeatableJobStore>) {
        let store = Arc::new(InMemoryRepeatableJobStore::new());
        store.put(registration).await.expect("put");
        (CronTicker::new(store.clone(), queue), store)
    }

    #[tokio::test]
    async fn fires_only_the_latest_due_run() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let (ticker, store) = ticker_with(&registration(at(10, 0)), queue.clone()).await;

        let summary = ticker.tick(at(10, 50)).await.expect("tick");

        assert_eq!(summary.fired, 1);
        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].execution_id.as_str(),
            format!("cron:wf_x:tick:{}", at(10, 45).timestamp())
        );
        let stored = store.get("cron:wf_x:tick").await.expect("get").expect("kept");
        assert_eq!(stored.last_fired_at, Some(at(10, 45)));
    }

    #[tokio::test]
    async fn nothing_fires_before_the_next_run() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let (ticker, _) = ticker_with(&registration(at(10, 0)), queue.clone()).await;

        ticker.tick(at(10, 50)).await.expect("first");
        let summary = ticker.tick(at(10, 55)).await.expect("second");

        assert_eq!(summary, TickSummary::default());
        assert_eq!(queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn replicas_collapse_into_one_job() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let registration = registration(at(10, 0));
        let (first, _) = ticker_with(&registration, queue.clone()).await;
        let (second, _) = ticker_with(&registration, queue.clone()).await;

        let a = first.tick(at(10, 16)).await.expect("first");
        let b = second.tick(at(10, 16)).await.expect("second");

        assert_eq!(a.fired, 1);
        assert_eq!(b.duplicates, 1);
        assert_eq!(queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn failed_enqueue_is_retried_next_tick() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let (ticker, store) = ticker_with(&registration(at(10, 0)), queue.clone()).await;

        queue.set_failing(true);
        let summary = ticker.tick(at(10, 16)).await.expect("tick");
        assert_eq!(summary.failed, 1);
        let stored = store.get("cron:wf_x:tick").await.expect("get").expect("kept");
        assert!(stored.last_fired_at.is_none());

        queue.set_failing(false);
        assert_eq!(ticker.tick(at(10, 17)).await.expect("retry").fired, 1);
    }

    #[tokio::test]
    async fn scheduled_triggers_reach_the_queue() {
        let store = Arc::new(InMemoryRepeatableJobStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let scheduler = CronScheduler::new(store.clone());
        let workflow_id = WorkflowId::new();
        let trigger = CronTrigger {
            trigger_node_id: NodeId::from("hourly"),
            schedule: "0 * * * *".to_string(),
            timezone: None,
            payload: Some(serde_json::json!({ "kind": "report" })),
        };
        scheduler
            .schedule_cron_trigger(
                workflow_id,
                &trigger,
                &WorkflowGraph::new(),
                &WorkflowMetadata::default(),
            )
            .await
            .expect("schedule");

        let ticker = CronTicker::new(store, queue.clone());
        ticker
            .tick(Utc::now() + chrono::Duration::hours(1))
            .await
            .expect("tick");

        let jobs = queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].workflow_id, workflow_id);
        assert_eq!(jobs[0].trigger_data["payload"]["kind"], "report");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = Arc::new(InMemoryRepeatableJobStore::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let ticker = CronTicker::new(store, queue).with_interval(Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(ticker.run(cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped in time")
            .expect("joined");
    }
}
