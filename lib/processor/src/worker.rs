//! Worker loop: pulls jobs from the queue and runs them through the
//! processor with bounded concurrency and a fixed-window rate limit.

use crate::processor::{EventProcessor, ProcessOutcome, SkipReason};
use async_trait::async_trait;
use chainflow_integration::{RateLimitConfig, RateLimiter};
use chainflow_queue::{Delivery, QueueError, TriggerJob};
use futures::{Stream, StreamExt};
use rootcause::Report;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RATE_LIMIT_KEY: &str = "jobs";

/// A delivered job awaiting settlement.
#[async_trait]
pub trait QueuedJob: Send + Sync {
    /// Decodes the payload.
    fn job(&self) -> Result<TriggerJob, Report<QueueError>>;

    /// Delivery attempt, starting at 1.
    fn attempt(&self) -> i64;

    async fn ack(&self) -> Result<(), Report<QueueError>>;

    async fn nak(&self, delay: Duration) -> Result<(), Report<QueueError>>;

    async fn term(&self) -> Result<(), Report<QueueError>>;
}

#[async_trait]
impl QueuedJob for Delivery {
    fn job(&self) -> Result<TriggerJob, Report<QueueError>> {
        Delivery::job(self)
    }

    fn attempt(&self) -> i64 {
        Delivery::attempt(self)
    }

    async fn ack(&self) -> Result<(), Report<QueueError>> {
        Delivery::ack(self).await
    }

    async fn nak(&self, delay: Duration) -> Result<(), Report<QueueError>> {
        Delivery::nak(self, delay).await
    }

    async fn term(&self) -> Result<(), Report<QueueError>> {
        Delivery::term(self).await
    }
}

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed at once.
    pub concurrency: usize,
    /// Jobs started per rate-limit window.
    pub rate_limit: RateLimitConfig,
    /// Base redelivery delay; doubles with each attempt.
    pub retry_delay: Duration,
    /// Attempts before a failing job is dropped. Matches the consumer's
    /// `max_deliver`.
    pub max_deliver: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            rate_limit: RateLimitConfig::per_second(10),
            retry_delay: Duration::from_secs(5),
            max_deliver: 5,
        }
    }
}

impl WorkerConfig {
    /// Redelivery delay after a failed `attempt`.
    #[must_use]
    pub fn retry_delay_for(&self, attempt: i64) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1).clamp(0, 16)).unwrap_or(0);
        self.retry_delay.saturating_mul(2u32.saturating_pow(exponent))
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Retried,
    Dropped,
}

/// Consumes queued jobs.
pub struct Worker {
    processor: Arc<EventProcessor>,
    limiter: RateLimiter,
    config: WorkerConfig,
}

impl Worker {
    #[must_use]
    pub fn new(processor: Arc<EventProcessor>, config: WorkerConfig) -> Self {
        Self {
            processor,
            limiter: RateLimiter::new(config.rate_limit.clone()),
            config,
        }
    }

    /// Processes one delivery and settles it.
    pub async fn handle<D: QueuedJob>(&self, delivery: &D) -> Disposition {
        let job = match delivery.job() {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e.current_context(), "dropping undecodable job");
                settle("term", delivery.term().await);
                return Disposition::Dropped;
            }
        };

        self.limiter.acquire(RATE_LIMIT_KEY).await;

        match self.processor.process_event(&job).await {
            Ok(ProcessOutcome::Skipped(SkipReason::InFlight)) => {
                self.retry(delivery, &job, "execution held by another delivery")
                    .await
            }
            Ok(outcome) => {
                debug!(execution_id = %job.execution_id, ?outcome, "job processed");
                settle("ack", delivery.ack().await);
                Disposition::Acked
            }
            Err(e) => {
                self.retry(delivery, &job, &e.current_context().to_string())
                    .await
            }
        }
    }

    /// Naks with backoff, or terminates once the attempts are used up.
    async fn retry<D: QueuedJob>(&self, delivery: &D, job: &TriggerJob, reason: &str) -> Disposition {
        let attempt = delivery.attempt();
        if attempt >= self.config.max_deliver {
            error!(
                execution_id = %job.execution_id,
                attempt,
                reason = %reason,
                "job failed on final attempt, dropping"
            );
            settle("term", delivery.term().await);
            return Disposition::Dropped;
        }
        let delay = self.config.retry_delay_for(attempt);
        warn!(
            execution_id = %job.execution_id,
            attempt,
            retry_in_ms = delay.as_millis(),
            reason = %reason,
            "job not finished, will retry"
        );
        settle("nak", delivery.nak(delay).await);
        Disposition::Retried
    }

    /// Runs until the stream ends or `cancel` fires, then waits for jobs
    /// already started.
    pub async fn run<S, D>(&self, deliveries: S, cancel: CancellationToken)
    where
        S: Stream<Item = Result<D, Report<QueueError>>> + Send,
        D: QueuedJob,
    {
        info!(concurrency = self.config.concurrency, "worker started");
        deliveries
            .take_until(cancel.cancelled())
            .for_each_concurrent(self.config.concurrency, |delivery| async move {
                match delivery {
                    Ok(delivery) => {
                        self.handle(&delivery).await;
                    }
                    Err(e) => warn!(error = %e.current_context(), "failed to pull job"),
                }
            })
            .await;
        info!("worker stopped");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn settle(action: &'static str, result: Result<(), Report<QueueError>>) {
    if let Err(e) = result {
        warn!(action, error = %e.current_context(), "failed to settle job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryExecutionStore;
    use chainflow_core::{ExecutionId, WorkflowId};
    use chainflow_queue::JobSource;
    use chainflow_queue::testing::InMemoryDedupCache;
    use chainflow_workflow::{
        ActionConfig, Edge, Node, NodeExecutorRegistry, NodeId, TriggerConfig, WorkflowEngine,
        WorkflowGraph, WorkflowMetadata,
    };
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeDelivery {
        payload: Vec<u8>,
        attempt: i64,
        log: Log,
    }

    impl FakeDelivery {
        fn record(&self, entry: String) {
            self.log.lock().expect("lock").push(entry);
        }
    }

    #[async_trait]
    impl QueuedJob for FakeDelivery {
        fn job(&self) -> Result<TriggerJob, Report<QueueError>> {
            TriggerJob::from_bytes(&self.payload)
        }

        fn attempt(&self) -> i64 {
            self.attempt
        }

        async fn ack(&self) -> Result<(), Report<QueueError>> {
            self.record("ack".to_string());
            Ok(())
        }

        async fn nak(&self, delay: Duration) -> Result<(), Report<QueueError>> {
            self.record(format!("nak {}s", delay.as_secs()));
            Ok(())
        }

        async fn term(&self) -> Result<(), Report<QueueError>> {
            self.record("term".to_string());
            Ok(())
        }
    }

    fn job(execution_id: &str) -> TriggerJob {
        TriggerJob {
            execution_id: ExecutionId::from(execution_id),
            workflow_id: WorkflowId::new(),
            trigger_node_id: NodeId::from("tick"),
            source: JobSource::Cron,
            trigger_data: json!({ "schedule": "* * * * *" }),
            graph: WorkflowGraph::from_parts(
                vec![
                    Node::trigger(
                        "tick",
                        TriggerConfig::Cron {
                            schedule: "* * * * *".to_string(),
                            timezone: None,
                            payload: None,
                        },
                    ),
                    Node::action("act", ActionConfig::DoNothing),
                ],
                vec![Edge::new("tick", "act")],
            ),
            metadata: WorkflowMetadata::default(),
            enqueued_at: Utc::now(),
        }
    }

    fn delivery(job: &TriggerJob, attempt: i64, log: &Log) -> FakeDelivery {
        FakeDelivery {
            payload: job.to_bytes().expect("encode"),
            attempt,
            log: Arc::clone(log),
        }
    }

    fn worker(store: Arc<InMemoryExecutionStore>) -> Worker {
        let processor = EventProcessor::new(
            WorkflowEngine::new(NodeExecutorRegistry::with_builtin()),
            store,
            Arc::new(InMemoryDedupCache::new()),
        );
        Worker::new(
            Arc::new(processor),
            WorkerConfig {
                concurrency: 2,
                rate_limit: RateLimitConfig::per_second(100),
                retry_delay: Duration::from_secs(5),
                max_deliver: 3,
            },
        )
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().expect("lock").clone()
    }

    #[tokio::test]
    async fn processed_job_is_acked() {
        let log = log();
        let worker = worker(Arc::new(InMemoryExecutionStore::new()));

        let disposition = worker.handle(&delivery(&job("e1"), 1, &log)).await;

        assert_eq!(disposition, Disposition::Acked);
        assert_eq!(entries(&log), vec!["ack"]);
    }

    #[tokio::test]
    async fn undecodable_job_is_terminated() {
        let log = log();
        let worker = worker(Arc::new(InMemoryExecutionStore::new()));
        let garbage = FakeDelivery {
            payload: b"not json".to_vec(),
            attempt: 1,
            log: Arc::clone(&log),
        };

        assert_eq!(worker.handle(&garbage).await, Disposition::Dropped);
        assert_eq!(entries(&log), vec!["term"]);
    }

    #[tokio::test]
    async fn failure_is_retried_with_backoff_then_dropped() {
        let log = log();
        let store = Arc::new(InMemoryExecutionStore::new());
        store.set_fail_completions(true);
        let worker = worker(store);

        let first = worker.handle(&delivery(&job("e1"), 1, &log)).await;
        let second = worker.handle(&delivery(&job("e2"), 2, &log)).await;
        let last = worker.handle(&delivery(&job("e3"), 3, &log)).await;

        assert_eq!(
            [first, second, last],
            [Disposition::Retried, Disposition::Retried, Disposition::Dropped]
        );
        assert_eq!(entries(&log), vec!["nak 5s", "nak 10s", "term"]);
    }

    #[tokio::test]
    async fn job_held_elsewhere_is_retried_not_acked() {
        let log = log();
        let store = Arc::new(InMemoryExecutionStore::new());
        let worker = worker(Arc::clone(&store));
        let job = job("e1");

        store.set_fail_completions(true);
        worker.handle(&delivery(&job, 1, &log)).await;
        store.set_fail_completions(false);
        let redelivered = worker.handle(&delivery(&job, 2, &log)).await;

        assert_eq!(redelivered, Disposition::Retried);
        assert_eq!(entries(&log), vec!["nak 5s", "nak 10s"]);
        assert_eq!(store.rows()[0].status, crate::ExecutionStatus::Processing);
    }

    #[test]
    fn retry_delay_is_capped() {
        let config = WorkerConfig::default();
        assert_eq!(config.retry_delay_for(1), Duration::from_secs(5));
        assert_eq!(config.retry_delay_for(0), Duration::from_secs(5));
        assert_eq!(config.retry_delay_for(100), config.retry_delay_for(17));
    }

    #[tokio::test]
    async fn run_drains_stream() {
        let log = log();
        let store = Arc::new(InMemoryExecutionStore::new());
        let worker = worker(Arc::clone(&store));
        let deliveries = vec![
            Ok(delivery(&job("e1"), 1, &log)),
            Ok(delivery(&job("e2"), 1, &log)),
            Ok(delivery(&job("e1"), 1, &log)),
        ];

        worker
            .run(futures::stream::iter(deliveries), CancellationToken::new())
            .await;

        assert_eq!(entries(&log), vec!["ack", "ack", "ack"]);
        assert_eq!(store.rows().len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let worker = worker(Arc::new(InMemoryExecutionStore::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        worker
            .run(
                futures::stream::pending::<Result<FakeDelivery, Report<QueueError>>>(),
                cancel,
            )
            .await;
    }
}
