//! In-memory implementations for tests and single-process runs.

use crate::cache::{DedupCache, DedupMarker};
use crate::error::QueueError;
use crate::job::{EnqueueOptions, EnqueueOutcome, JobQueue, TriggerJob};
use crate::registry::{RepeatableJob, RepeatableJobStore};
use async_trait::async_trait;
use rootcause::Report;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Queue that keeps every accepted job in memory.
///
/// Dedup keys are remembered forever, unlike a server-side window.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<TriggerJob>>,
    seen_keys: Mutex<HashSet<String>>,
    failing: AtomicBool,
}

impl InMemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent enqueue fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Jobs accepted so far, in enqueue order.
    #[must_use]
    pub fn jobs(&self) -> Vec<TriggerJob> {
        lock(&self.jobs).clone()
    }

    /// Removes and returns every accepted job.
    pub fn drain(&self) -> Vec<TriggerJob> {
        std::mem::take(&mut *lock(&self.jobs))
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        job: &TriggerJob,
        options: &EnqueueOptions,
    ) -> Result<EnqueueOutcome, Report<QueueError>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::PublishFailed {
                message: "queue unavailable".to_string(),
            }
            .into());
        }
        if let Some(key) = &options.dedup_key
            && !lock(&self.seen_keys).insert(key.clone())
        {
            return Ok(EnqueueOutcome::Duplicate);
        }
        lock(&self.jobs).push(job.clone());
        Ok(EnqueueOutcome::Enqueued)
    }
}

/// Registry backed by a sorted map.
#[derive(Debug, Default)]
pub struct InMemoryRepeatableJobStore {
    jobs: Mutex<BTreeMap<String, RepeatableJob>>,
}

impl InMemoryRepeatableJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        lock(&self.jobs).keys().cloned().collect()
    }
}

#[async_trait]
impl RepeatableJobStore for InMemoryRepeatableJobStore {
    async fn list(&self) -> Result<Vec<RepeatableJob>, Report<QueueError>> {
        Ok(lock(&self.jobs).values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<RepeatableJob>, Report<QueueError>> {
        Ok(lock(&self.jobs).get(id).cloned())
    }

    async fn put(&self, job: &RepeatableJob) -> Result<(), Report<QueueError>> {
        lock(&self.jobs).insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, Report<QueueError>> {
        Ok(lock(&self.jobs).remove(id).is_some())
    }
}

/// Cache backed by a hash map, without expiry.
#[derive(Debug, Default)]
pub struct InMemoryDedupCache {
    markers: Mutex<HashMap<String, DedupMarker>>,
    unavailable: AtomicBool,
}

impl InMemoryDedupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail, as if the bucket were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn marker(&self, execution_id: &str) -> Option<DedupMarker> {
        lock(&self.markers).get(execution_id).copied()
    }

    fn check_available(&self) -> Result<(), Report<QueueError>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Cache {
                message: "cache unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl DedupCache for InMemoryDedupCache {
    async fn get(&self, execution_id: &str) -> Result<Option<DedupMarker>, Report<QueueError>> {
        self.check_available()?;
        Ok(self.marker(execution_id))
    }

    async fn set(&self, execution_id: &str, marker: DedupMarker) -> Result<(), Report<QueueError>> {
        self.check_available()?;
        lock(&self.markers).insert(execution_id.to_string(), marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSource;
    use chainflow_core::{ExecutionId, WorkflowId};
    use chainflow_workflow::{NodeId, WorkflowGraph, WorkflowMetadata};
    use chrono::Utc;
    use serde_json::json;

    fn job(execution_id: &str) -> TriggerJob {
        TriggerJob {
            execution_id: ExecutionId::from(execution_id),
            workflow_id: WorkflowId::new(),
            trigger_node_id: NodeId::from("t1"),
            source: JobSource::ChainEvent,
            trigger_data: json!({}),
            graph: WorkflowGraph::new(),
            metadata: WorkflowMetadata::default(),
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn repeated_dedup_key_is_stored_once() {
        let queue = InMemoryJobQueue::new();
        let first = job("e1");

        let a = queue
            .enqueue(&first, &EnqueueOptions::for_job(&first))
            .await
            .expect("enqueue");
        let b = queue
            .enqueue(&first, &EnqueueOptions::for_job(&first))
            .await
            .expect("enqueue");

        assert_eq!(a, EnqueueOutcome::Enqueued);
        assert_eq!(b, EnqueueOutcome::Duplicate);
        assert_eq!(queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn jobs_without_key_are_never_deduplicated() {
        let queue = InMemoryJobQueue::new();
        let job = job("e1");
        let options = EnqueueOptions::default();

        queue.enqueue(&job, &options).await.expect("enqueue");
        queue.enqueue(&job, &options).await.expect("enqueue");

        assert_eq!(queue.drain().len(), 2);
        assert!(queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn unavailable_cache_errors() {
        let cache = InMemoryDedupCache::new();
        cache.set("e1", DedupMarker::Completed).await.expect("set");
        cache.set_unavailable(true);

        assert!(cache.get("e1").await.is_err());
        assert_eq!(cache.marker("e1"), Some(DedupMarker::Completed));
    }
}
