//! Execution table, the dedup authority for job processing.

use super::decode_error;
use async_trait::async_trait;
use chainflow_core::{ExecutionId, ExecutionRecordId, WorkflowId};
use chainflow_processor::{
    Completion, ExecutionRecord, ExecutionStatus, ExecutionStore, InsertOutcome, StoreError,
};
use chainflow_workflow::NodeId;
use chrono::{DateTime, Utc};
use rootcause::Report;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for execution queries.
#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    execution_id: String,
    workflow_id: String,
    trigger_node_id: String,
    status: String,
    trigger_data: serde_json::Value,
    tx_signature: Option<String>,
    tx_error: Option<String>,
    notified_at: Option<DateTime<Utc>>,
    notification_error: Option<String>,
    execution_path: serde_json::Value,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<ExecutionRecord, sqlx::Error> {
        let id = ExecutionRecordId::from_str(&self.id)
            .map_err(|e| decode_error("execution record id", &self.id, e))?;
        let workflow_id = WorkflowId::from_str(&self.workflow_id)
            .map_err(|e| decode_error("workflow id", &self.workflow_id, e))?;
        let status = ExecutionStatus::from_str(&self.status)
            .map_err(|e| decode_error("execution status", &self.status, e))?;
        let execution_path: Vec<NodeId> = serde_json::from_value(self.execution_path)
            .map_err(|e| decode_error("execution path", &self.execution_id, e))?;

        Ok(ExecutionRecord {
            id,
            execution_id: ExecutionId::new(self.execution_id),
            workflow_id,
            trigger_node_id: NodeId::from(self.trigger_node_id),
            status,
            trigger_data: self.trigger_data,
            tx_signature: self.tx_signature,
            tx_error: self.tx_error,
            notified_at: self.notified_at,
            notification_error: self.notification_error,
            execution_path,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn database_error(operation: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Database {
        operation: operation.to_string(),
        reason: e.to_string(),
    }
}

/// Postgres-backed [`ExecutionStore`].
#[derive(Debug, Clone)]
pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert_processing(
        &self,
        record: &ExecutionRecord,
    ) -> Result<InsertOutcome, Report<StoreError>> {
        let path = serde_json::to_value(&record.execution_path).map_err(|e| {
            StoreError::Database {
                operation: "insert".to_string(),
                reason: e.to_string(),
            }
        })?;
        let result = sqlx::query(
            r#"
            INSERT INTO executions
                (id, execution_id, workflow_id, trigger_node_id, status, trigger_data,
                 execution_path, started_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (execution_id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.execution_id.as_str())
        .bind(record.workflow_id.to_string())
        .bind(record.trigger_node_id.as_str())
        .bind(record.status.as_str())
        .bind(&record.trigger_data)
        .bind(path)
        .bind(record.started_at)
        .execute(&self.pool)
        .await
        .map_err(database_error("insert"))?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn complete(
        &self,
        execution_id: &ExecutionId,
        completion: &Completion,
    ) -> Result<(), Report<StoreError>> {
        let path = serde_json::to_value(&completion.execution_path).map_err(|e| {
            StoreError::Database {
                operation: "complete".to_string(),
                reason: e.to_string(),
            }
        })?;
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $2, tx_signature = $3, tx_error = $4, notified_at = $5,
                notification_error = $6, execution_path = $7, completed_at = $8
            WHERE execution_id = $1 AND status = 'processing'
            "#,
        )
        .bind(execution_id.as_str())
        .bind(completion.status.as_str())
        .bind(&completion.tx_signature)
        .bind(&completion.tx_error)
        .bind(completion.notified_at)
        .bind(&completion.notification_error)
        .bind(path)
        .bind(completion.completed_at)
        .execute(&self.pool)
        .await
        .map_err(database_error("complete"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                execution_id: execution_id.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn get(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionRecord>, Report<StoreError>> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            r#"
            SELECT id, execution_id, workflow_id, trigger_node_id, status, trigger_data,
                   tx_signature, tx_error, notified_at, notification_error,
                   execution_path, started_at, completed_at
            FROM executions
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error("get"))?;

        row.map(ExecutionRow::try_into_record)
            .transpose()
            .map_err(|e| {
                StoreError::Corrupt {
                    execution_id: execution_id.to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    async fn reclaim_stale(
        &self,
        execution_id: &ExecutionId,
        stale_before: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, Report<StoreError>> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET started_at = $3
            WHERE execution_id = $1 AND status = 'processing' AND started_at < $2
            "#,
        )
        .bind(execution_id.as_str())
        .bind(stale_before)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(database_error("reclaim"))?;

        Ok(result.rows_affected() > 0)
    }
}
