//! Workflow definition types.
//!
//! A workflow is a named automation owned by a user that consists of:
//! - A directed graph of nodes
//! - Metadata (version, safety limits, provenance)
//! - An enabled flag, timestamps and a soft-delete marker

use crate::error::{GraphError, ValidationErrors};
use crate::graph::WorkflowGraph;
use chainflow_core::{UserId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ceilings that actions in a workflow must respect.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum SOL moved by one transfer.
    #[serde(default)]
    pub max_sol_per_transaction: Option<f64>,
    /// Maximum transactions per hour.
    #[serde(default)]
    pub max_transactions_per_hour: Option<u32>,
    /// Maximum cost of one order in cents.
    #[serde(default)]
    pub max_order_cost_cents: Option<u64>,
    /// Maximum exposure in one market in cents, including the new order.
    #[serde(default)]
    pub max_position_cents: Option<u64>,
}

impl SafetyLimits {
    /// Checks that the configured limits are usable.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<GraphError> {
        let mut errors = Vec::new();
        if let Some(max) = self.max_sol_per_transaction
            && (!max.is_finite() || max <= 0.0)
        {
            errors.push(GraphError::InvalidSafetyLimit {
                field: "max_sol_per_transaction".to_string(),
                reason: "must be a positive number".to_string(),
            });
        }
        if self.max_transactions_per_hour == Some(0) {
            errors.push(GraphError::InvalidSafetyLimit {
                field: "max_transactions_per_hour".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        errors
    }
}

/// Metadata carried with a workflow and every job it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Definition version, bumped on every graph change.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Safety ceilings for actions.
    #[serde(default)]
    pub limits: SafetyLimits,
    /// Where the definition came from (builder, template, import).
    #[serde(default)]
    pub source: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl Default for WorkflowMetadata {
    fn default() -> Self {
        Self {
            version: default_version(),
            limits: SafetyLimits::default(),
            source: None,
        }
    }
}

impl WorkflowMetadata {
    /// Sets the safety limits.
    #[must_use]
    pub fn with_limits(mut self, limits: SafetyLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the provenance.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A complete workflow definition.
///
/// This is the source of truth for desired state: which triggers should be
/// subscribed and which cron jobs should be registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Owner.
    pub user_id: UserId,
    /// Human-readable name.
    pub name: String,
    /// The workflow graph (nodes and edges).
    pub graph: WorkflowGraph,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// Whether triggers are live.
    pub enabled: bool,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// Creates a new, disabled workflow.
    #[must_use]
    pub fn new(user_id: UserId, name: impl Into<String>, graph: WorkflowGraph) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            user_id,
            name: name.into(),
            graph,
            metadata: WorkflowMetadata::default(),
            enabled: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns true if the workflow is enabled and not deleted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.deleted_at.is_none()
    }

    /// Enables the workflow.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.touch();
    }

    /// Disables the workflow.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.touch();
    }

    /// Replaces the graph and bumps the definition version.
    pub fn replace_graph(&mut self, graph: WorkflowGraph) {
        self.graph = graph;
        self.metadata.version += 1;
        self.touch();
    }

    /// Soft-deletes the workflow. Deleted workflows are never active.
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.enabled = false;
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    /// Validates the graph and metadata.
    ///
    /// # Errors
    ///
    /// Returns every problem found.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new(self.graph.validation_errors());
        errors.extend(self.metadata.limits.validation_errors());
        errors.into_result()
    }

    /// Marks the workflow as updated (bumps updated_at timestamp).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
