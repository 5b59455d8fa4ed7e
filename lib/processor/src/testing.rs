//! In-memory execution store for tests.

use crate::error::StoreError;
use crate::record::{Completion, ExecutionRecord, ExecutionStatus};
use crate::store::{ExecutionStore, InsertOutcome};
use async_trait::async_trait;
use chainflow_core::ExecutionId;
use chrono::{DateTime, TimeDelta, Utc};
use rootcause::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Execution rows in a hash map keyed by execution id.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    rows: Mutex<HashMap<ExecutionId, ExecutionRecord>>,
    fail_completions: AtomicBool,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `complete` fail, as a lost database connection would.
    pub fn set_fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Moves a row's start time `age` into the past.
    pub fn backdate(&self, execution_id: &ExecutionId, age: TimeDelta) {
        if let Some(row) = self.lock().get_mut(execution_id) {
            row.started_at -= age;
        }
    }

    #[must_use]
    pub fn rows(&self) -> Vec<ExecutionRecord> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ExecutionId, ExecutionRecord>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert_processing(
        &self,
        record: &ExecutionRecord,
    ) -> Result<InsertOutcome, Report<StoreError>> {
        let mut rows = self.lock();
        if rows.contains_key(&record.execution_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(record.execution_id.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn complete(
        &self,
        execution_id: &ExecutionId,
        completion: &Completion,
    ) -> Result<(), Report<StoreError>> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(StoreError::Database {
                operation: "complete".to_string(),
                reason: "connection reset".to_string(),
            }
            .into());
        }
        let mut rows = self.lock();
        let row = rows
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound {
                execution_id: execution_id.clone(),
            })?;
        row.apply(completion);
        Ok(())
    }

    async fn get(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, Report<StoreError>> {
        Ok(self.lock().get(execution_id).cloned())
    }

    async fn reclaim_stale(
        &self,
        execution_id: &ExecutionId,
        stale_before: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, Report<StoreError>> {
        let mut rows = self.lock();
        match rows.get_mut(execution_id) {
            Some(row) if row.status == ExecutionStatus::Processing && row.started_at < stale_before => {
                row.started_at = started_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
