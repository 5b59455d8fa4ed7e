//! Idempotent job processing.
//!
//! A job runs at most once per execution id. The dedup cache is checked
//! first as a fast path; the execution table's unique constraint is the
//! authority. Whichever worker inserts the `processing` row owns the run.
//! A row left `processing` longer than the lease is presumed abandoned and
//! the next delivery takes it over.

use crate::error::{ProcessorError, StoreError};
use crate::record::{Completion, ExecutionRecord, ExecutionStatus};
use crate::store::{ExecutionStore, InsertOutcome};
use chainflow_queue::{DedupCache, DedupMarker, TriggerJob};
use chainflow_workflow::{ExecutionContext, WorkflowEngine};
use chrono::Utc;
use futures::FutureExt;
use rootcause::Report;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Why a job was not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The cache already holds a marker for the execution id.
    Cached(DedupMarker),
    /// Another delivery already finished the execution.
    AlreadyRecorded,
    /// Another delivery holds the execution row and its lease is still
    /// running.
    InFlight,
}

/// Time after which a `processing` row is presumed abandoned.
///
/// Matches the consumer's default `ack_wait`: a run still going past it is
/// redelivered by the queue anyway.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(60);

/// Result of processing one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(ExecutionStatus),
    Skipped(SkipReason),
}

/// Runs trigger jobs through the engine exactly once per execution id.
pub struct EventProcessor {
    engine: WorkflowEngine,
    store: Arc<dyn ExecutionStore>,
    cache: Arc<dyn DedupCache>,
    lease: Duration,
}

impl EventProcessor {
    #[must_use]
    pub fn new(
        engine: WorkflowEngine,
        store: Arc<dyn ExecutionStore>,
        cache: Arc<dyn DedupCache>,
    ) -> Self {
        Self {
            engine,
            store,
            cache,
            lease: DEFAULT_LEASE,
        }
    }

    /// Overrides how long a `processing` row is held before takeover.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Processes one job.
    ///
    /// # Errors
    ///
    /// Returns an error when the execution row cannot be written or the
    /// engine aborts. The row is marked failed when possible and the caller
    /// should let the queue redeliver.
    #[instrument(skip_all, fields(
        workflow_id = %job.workflow_id,
        execution_id = %job.execution_id,
        trigger_node_id = %job.trigger_node_id,
    ))]
    pub async fn process_event(
        &self,
        job: &TriggerJob,
    ) -> Result<ProcessOutcome, Report<ProcessorError>> {
        match self.cache.get(job.execution_id.as_str()).await {
            Ok(Some(marker)) => {
                debug!(%marker, "already processed, cached");
                return Ok(ProcessOutcome::Skipped(SkipReason::Cached(marker)));
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e.current_context(), "dedup cache unavailable, using execution table"),
        }

        let record = ExecutionRecord::processing(job);
        let inserted = self
            .store
            .insert_processing(&record)
            .await
            .map_err(|e| ProcessorError::Store {
                execution_id: job.execution_id.clone(),
                reason: e.current_context().to_string(),
            })?;
        if inserted == InsertOutcome::Duplicate
            && let Some(reason) = self.existing_row(job).await?
        {
            return Ok(ProcessOutcome::Skipped(reason));
        }

        let ctx = ExecutionContext::new(
            job.workflow_id,
            job.execution_id.clone(),
            job.trigger_data.clone(),
            job.metadata.clone(),
        )
        .with_trigger_node(job.trigger_node_id.clone());

        let result = match AssertUnwindSafe(self.engine.execute(&job.graph, ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                self.abort(job, &reason).await;
                return Err(ProcessorError::Engine {
                    execution_id: job.execution_id.clone(),
                    reason,
                }
                .into());
            }
        };

        let completion = Completion::from_result(&result);
        if let Err(e) = self.store.complete(&job.execution_id, &completion).await {
            let reason = e.current_context().to_string();
            self.abort(job, &reason).await;
            return Err(ProcessorError::Store {
                execution_id: job.execution_id.clone(),
                reason,
            }
            .into());
        }

        let marker = match completion.status {
            ExecutionStatus::Failed => DedupMarker::Failed,
            _ => DedupMarker::Completed,
        };
        if let Err(e) = self.cache.set(job.execution_id.as_str(), marker).await {
            warn!(error = %e.current_context(), "failed to cache execution marker");
        }

        info!(status = %completion.status, nodes = completion.execution_path.len(), "execution finished");
        Ok(ProcessOutcome::Completed(completion.status))
    }

    /// Decides what to do with a row another delivery inserted. `None`
    /// means the stale row was taken over and this delivery runs it.
    async fn existing_row(&self, job: &TriggerJob) -> Result<Option<SkipReason>, Report<ProcessorError>> {
        let store_error = |e: Report<StoreError>| ProcessorError::Store {
            execution_id: job.execution_id.clone(),
            reason: e.current_context().to_string(),
        };

        let status = self
            .store
            .get(&job.execution_id)
            .await
            .map_err(store_error)?
            .map(|row| row.status);
        if status.is_none_or(|status| status.is_terminal()) {
            debug!("already processed, row exists");
            return Ok(Some(SkipReason::AlreadyRecorded));
        }

        let now = Utc::now();
        let Some(stale_before) = chrono::Duration::from_std(self.lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
        else {
            return Ok(Some(SkipReason::InFlight));
        };
        let reclaimed = self
            .store
            .reclaim_stale(&job.execution_id, stale_before, now)
            .await
            .map_err(store_error)?;
        if reclaimed {
            warn!(lease_secs = self.lease.as_secs(), "taking over abandoned execution");
            Ok(None)
        } else {
            debug!("execution in flight elsewhere");
            Ok(Some(SkipReason::InFlight))
        }
    }

    async fn abort(&self, job: &TriggerJob, reason: &str) {
        error!(reason = %reason, "execution aborted");
        if let Err(e) = self
            .store
            .complete(&job.execution_id, &Completion::aborted(reason))
            .await
        {
            error!(error = %e.current_context(), "failed to mark execution failed");
        }
    }
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "node executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryExecutionStore;
    use async_trait::async_trait;
    use chainflow_core::{ExecutionId, WorkflowId};
    use chainflow_queue::JobSource;
    use chainflow_queue::testing::InMemoryDedupCache;
    use chainflow_workflow::{
        ActionConfig, Condition, ConditionOperator, Edge, ExecutionError, FilterConfig,
        FilterLogic, Node, NodeExecutor, NodeExecutorRegistry, NodeId, NodeKind, TriggerConfig,
        WorkflowGraph, WorkflowMetadata,
    };
    use chrono::Utc;
    use serde_json::{Value as JsonValue, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAction {
        runs: AtomicUsize,
        fail: bool,
        panic: bool,
    }

    #[async_trait]
    impl NodeExecutor for CountingAction {
        async fn execute(
            &self,
            _node: &Node,
            _ctx: &mut ExecutionContext,
        ) -> Result<JsonValue, Report<ExecutionError>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            assert!(!self.panic, "executor exploded");
            if self.fail {
                return Err(ExecutionError::Collaborator {
                    operation: "send_sol".to_string(),
                    reason: "relay down".to_string(),
                }
                .into());
            }
            Ok(json!({ "sent": true }))
        }
    }

    fn graph() -> WorkflowGraph {
        WorkflowGraph::from_parts(
            vec![
                Node::trigger(
                    "wallet",
                    TriggerConfig::BalanceChange {
                        address: "Wallet1".to_string(),
                        min_change_lamports: None,
                    },
                ),
                Node::filter(
                    "big",
                    FilterConfig {
                        conditions: vec![Condition {
                            field: "delta".to_string(),
                            operator: ConditionOperator::GreaterThan,
                            value: json!(100),
                        }],
                        logic: FilterLogic::And,
                    },
                ),
                Node::action("act", ActionConfig::DoNothing),
            ],
            vec![Edge::new("wallet", "big"), Edge::new("big", "act")],
        )
    }

    fn job(delta: i64) -> TriggerJob {
        TriggerJob {
            execution_id: ExecutionId::from("exec-1"),
            workflow_id: WorkflowId::new(),
            trigger_node_id: NodeId::from("wallet"),
            source: JobSource::ChainEvent,
            trigger_data: json!({ "address": "Wallet1", "delta": delta }),
            graph: graph(),
            metadata: WorkflowMetadata::default(),
            enqueued_at: Utc::now(),
        }
    }

    struct Harness {
        processor: EventProcessor,
        action: Arc<CountingAction>,
        store: Arc<InMemoryExecutionStore>,
        cache: Arc<InMemoryDedupCache>,
    }

    fn harness(action: CountingAction) -> Harness {
        let action = Arc::new(action);
        let registry = NodeExecutorRegistry::with_builtin().with(NodeKind::Action, action.clone());
        let store = Arc::new(InMemoryExecutionStore::new());
        let cache = Arc::new(InMemoryDedupCache::new());
        Harness {
            processor: EventProcessor::new(
                WorkflowEngine::new(registry),
                store.clone(),
                cache.clone(),
            ),
            action,
            store,
            cache,
        }
    }

    #[tokio::test]
    async fn success_is_recorded_and_cached() {
        let h = harness(CountingAction::default());
        let job = job(500);

        let outcome = h.processor.process_event(&job).await.expect("process");

        assert_eq!(outcome, ProcessOutcome::Completed(ExecutionStatus::Success));
        let row = h
            .store
            .get(&job.execution_id)
            .await
            .expect("get")
            .expect("row");
        assert_eq!(row.status, ExecutionStatus::Success);
        assert_eq!(
            row.execution_path,
            vec![NodeId::from("wallet"), NodeId::from("big"), NodeId::from("act")]
        );
        assert!(row.completed_at.is_some());
        assert_eq!(h.cache.marker("exec-1"), Some(DedupMarker::Completed));
    }

    #[tokio::test]
    async fn rejected_filter_is_filtered() {
        let h = harness(CountingAction::default());

        let outcome = h.processor.process_event(&job(5)).await.expect("process");

        assert_eq!(outcome, ProcessOutcome::Completed(ExecutionStatus::Filtered));
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn action_failure_is_recorded_not_returned() {
        let h = harness(CountingAction {
            fail: true,
            ..Default::default()
        });
        let job = job(500);

        let outcome = h.processor.process_event(&job).await.expect("process");

        assert_eq!(outcome, ProcessOutcome::Completed(ExecutionStatus::Failed));
        let row = h.store.rows().remove(0);
        assert!(row.tx_error.is_some_and(|e| e.contains("relay down")));
        assert_eq!(h.cache.marker("exec-1"), Some(DedupMarker::Failed));
    }

    #[tokio::test]
    async fn second_delivery_is_skipped() {
        let h = harness(CountingAction::default());
        let job = job(500);

        h.processor.process_event(&job).await.expect("first");
        let again = h.processor.process_event(&job).await.expect("second");

        assert_eq!(
            again,
            ProcessOutcome::Skipped(SkipReason::Cached(DedupMarker::Completed))
        );
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_execution_table() {
        let h = harness(CountingAction::default());
        h.cache.set_unavailable(true);
        let job = job(500);

        let first = h.processor.process_event(&job).await.expect("first");
        let second = h.processor.process_event(&job).await.expect("second");

        assert_eq!(first, ProcessOutcome::Completed(ExecutionStatus::Success));
        assert_eq!(second, ProcessOutcome::Skipped(SkipReason::AlreadyRecorded));
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_duplicates_run_once() {
        let h = harness(CountingAction::default());
        let job = job(500);

        let (a, b) = tokio::join!(
            h.processor.process_event(&job),
            h.processor.process_event(&job)
        );
        let outcomes = [a.expect("a"), b.expect("b")];

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, ProcessOutcome::Completed(_)))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, ProcessOutcome::Skipped(_)))
            .count();
        assert_eq!((completed, skipped), (1, 1));
        let rows = h.store.rows();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].status.is_terminal());
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn executor_panic_marks_row_failed() {
        let h = harness(CountingAction {
            panic: true,
            ..Default::default()
        });
        let job = job(500);

        let err = h.processor.process_event(&job).await.expect_err("aborted");

        assert!(matches!(
            err.current_context(),
            ProcessorError::Engine { .. }
        ));
        let row = h.store.rows().remove(0);
        assert_eq!(row.status, ExecutionStatus::Failed);
        assert!(row.tx_error.is_some_and(|e| e.contains("executor exploded")));
        assert_eq!(h.cache.marker("exec-1"), None);
    }

    #[tokio::test]
    async fn unwritable_completion_is_returned() {
        let h = harness(CountingAction::default());
        h.store.set_fail_completions(true);

        let err = h
            .processor
            .process_event(&job(500))
            .await
            .expect_err("store failure");

        assert!(matches!(err.current_context(), ProcessorError::Store { .. }));
        let row = h.store.rows().remove(0);
        assert_eq!(row.status, ExecutionStatus::Processing);
    }

    #[tokio::test]
    async fn abandoned_row_is_taken_over_after_lease() {
        let mut h = harness(CountingAction::default());
        h.processor = h.processor.with_lease(Duration::from_secs(60));
        let job = job(500);

        h.store.set_fail_completions(true);
        h.processor.process_event(&job).await.expect_err("completion lost");
        h.store.set_fail_completions(false);

        let fresh = h.processor.process_event(&job).await.expect("within lease");
        assert_eq!(fresh, ProcessOutcome::Skipped(SkipReason::InFlight));
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 1);

        h.store.backdate(&job.execution_id, chrono::TimeDelta::minutes(2));
        let outcome = h.processor.process_event(&job).await.expect("takeover");

        assert_eq!(outcome, ProcessOutcome::Completed(ExecutionStatus::Success));
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 2);
        let rows = h.store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn finished_row_is_never_taken_over() {
        let h = harness(CountingAction::default());
        h.cache.set_unavailable(true);
        let job = job(500);

        h.processor.process_event(&job).await.expect("first");
        h.store.backdate(&job.execution_id, chrono::TimeDelta::hours(1));
        let again = h.processor.process_event(&job).await.expect("second");

        assert_eq!(again, ProcessOutcome::Skipped(SkipReason::AlreadyRecorded));
        assert_eq!(h.action.runs.load(Ordering::SeqCst), 1);
    }
}
