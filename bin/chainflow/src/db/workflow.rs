//! Workflow repository.

use super::decode_error;
use chainflow_core::{UserId, WorkflowId};
use chainflow_workflow::{Workflow, WorkflowGraph, WorkflowMetadata};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

/// Row type for workflow queries.
#[derive(FromRow)]
struct WorkflowRow {
    id: String,
    user_id: String,
    name: String,
    graph: serde_json::Value,
    metadata: serde_json::Value,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl WorkflowRow {
    fn try_into_workflow(self) -> Result<Workflow, sqlx::Error> {
        let id = WorkflowId::from_str(&self.id)
            .map_err(|e| decode_error("workflow id", &self.id, e))?;
        let user_id =
            UserId::from_str(&self.user_id).map_err(|e| decode_error("user id", &self.user_id, e))?;
        let graph: WorkflowGraph = serde_json::from_value(self.graph)
            .map_err(|e| decode_error("workflow graph", &self.id, e))?;
        let metadata: WorkflowMetadata = serde_json::from_value(self.metadata)
            .map_err(|e| decode_error("workflow metadata", &self.id, e))?;

        Ok(Workflow {
            id,
            user_id,
            name: self.name,
            graph,
            metadata,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Repository for workflow operations.
#[derive(Debug, Clone)]
pub struct WorkflowRepository {
    pool: PgPool,
}

impl WorkflowRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds a workflow by ID, including soft-deleted ones.
    pub async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, sqlx::Error> {
        let row: Option<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, graph, metadata, enabled,
                   created_at, updated_at, deleted_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowRow::try_into_workflow).transpose()
    }

    /// Lists enabled, non-deleted workflows.
    pub async fn list_enabled(&self) -> Result<Vec<Workflow>, sqlx::Error> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, name, graph, metadata, enabled,
                   created_at, updated_at, deleted_at
            FROM workflows
            WHERE enabled AND deleted_at IS NULL
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowRow::try_into_workflow).collect()
    }

    /// Creates a new workflow.
    pub async fn create(&self, workflow: &Workflow) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, user_id, name, graph, metadata, enabled, created_at, updated_at, deleted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(workflow.user_id.to_string())
        .bind(&workflow.name)
        .bind(to_json(&workflow.graph)?)
        .bind(to_json(&workflow.metadata)?)
        .bind(workflow.enabled)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .bind(workflow.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes every mutable field. Returns false if no row matched.
    pub async fn update(&self, workflow: &Workflow) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, graph = $3, metadata = $4, enabled = $5,
                updated_at = $6, deleted_at = $7
            WHERE id = $1
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(to_json(&workflow.graph)?)
        .bind(to_json(&workflow.metadata)?)
        .bind(workflow.enabled)
        .bind(workflow.updated_at)
        .bind(workflow.deleted_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
