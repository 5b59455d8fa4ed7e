//! Persistence seam for execution records.

use crate::error::StoreError;
use crate::record::{Completion, ExecutionRecord};
use async_trait::async_trait;
use chainflow_core::ExecutionId;
use chrono::{DateTime, Utc};
use rootcause::Report;

/// Result of inserting a `processing` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same execution id already exists.
    Duplicate,
}

/// Storage for execution records with a unique execution id.
///
/// `insert_processing` is the only mutual exclusion between workers: exactly
/// one concurrent insert per execution id reports [`InsertOutcome::Inserted`].
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_processing(
        &self,
        record: &ExecutionRecord,
    ) -> Result<InsertOutcome, Report<StoreError>>;

    async fn complete(
        &self,
        execution_id: &ExecutionId,
        completion: &Completion,
    ) -> Result<(), Report<StoreError>>;

    async fn get(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, Report<StoreError>>;

    /// Takes over a `processing` row whose run started before
    /// `stale_before`, restarting its clock at `started_at`.
    ///
    /// Returns false if the row is terminal, still fresh, or was taken over
    /// by another worker first.
    async fn reclaim_stale(
        &self,
        execution_id: &ExecutionId,
        stale_before: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, Report<StoreError>>;
}
