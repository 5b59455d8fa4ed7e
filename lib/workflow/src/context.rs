//! Per-execution state threaded through the node executors.

use crate::definition::WorkflowMetadata;
use crate::node::{NodeId, NodeKind};
use chainflow_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Variable holding the signature of the last submitted transaction.
pub const TX_SIGNATURE_VAR: &str = "txSignature";
/// Variable holding the id of the last placed order.
pub const ORDER_ID_VAR: &str = "orderId";
/// Variable holding the RFC 3339 time of the last delivered notification.
pub const NOTIFIED_AT_VAR: &str = "notifiedAt";
/// Variable holding notification delivery failures.
pub const NOTIFICATION_ERROR_VAR: &str = "notificationError";

/// State shared by every node of one execution.
///
/// Executors read trigger data and earlier outputs from here and write their
/// own results back into `variables`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: WorkflowId,
    pub execution_id: ExecutionId,
    /// Trigger that fired, if known. `None` runs every trigger.
    pub trigger_node_id: Option<NodeId>,
    pub trigger_data: JsonValue,
    /// Node outputs keyed by node id, plus named values like `txSignature`.
    pub variables: Map<String, JsonValue>,
    pub execution_path: Vec<NodeId>,
    pub has_errors: bool,
    pub errors: Vec<String>,
    pub metadata: WorkflowMetadata,
}

impl ExecutionContext {
    /// Creates a fresh context for one execution.
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
        trigger_data: JsonValue,
        metadata: WorkflowMetadata,
    ) -> Self {
        Self {
            workflow_id,
            execution_id,
            trigger_node_id: None,
            trigger_data,
            variables: Map::new(),
            execution_path: Vec::new(),
            has_errors: false,
            errors: Vec::new(),
            metadata,
        }
    }

    /// Restricts execution to the trigger that fired.
    #[must_use]
    pub fn with_trigger_node(mut self, trigger_node_id: NodeId) -> Self {
        self.trigger_node_id = Some(trigger_node_id);
        self
    }

    /// Records a node failure.
    pub fn record_error(&mut self, message: String) {
        self.has_errors = true;
        self.errors.push(message);
    }

    /// Sets a named variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: JsonValue) {
        self.variables.insert(name.into(), value);
    }

    /// Resolves a field reference.
    ///
    /// `$name.rest` reads variable `name` then walks `rest`; anything else is
    /// a dot path into the trigger data. Numeric segments index arrays.
    #[must_use]
    pub fn resolve(&self, field: &str) -> Option<&JsonValue> {
        let field = field.trim();
        match field.strip_prefix('$') {
            Some(reference) => {
                let (name, rest) = reference.split_once('.').unwrap_or((reference, ""));
                lookup_path(self.variables.get(name)?, rest)
            }
            None => lookup_path(&self.trigger_data, field),
        }
    }

    /// Stable key for side effects of one node in this execution.
    ///
    /// Redeliveries of the same execution produce the same key.
    #[must_use]
    pub fn idempotency_key(&self, node_id: &NodeId) -> String {
        format!("{}:{}", self.execution_id, node_id)
    }
}

/// Walks a dot path into a JSON value. An empty path returns the value.
#[must_use]
pub fn lookup_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Outcome of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// False if any branch produced an error.
    pub success: bool,
    /// Nodes invoked, in order.
    pub execution_path: Vec<NodeId>,
    /// One message per failed node.
    pub errors: Vec<String>,
    /// Final variables.
    pub variables: Map<String, JsonValue>,
    /// A filter stopped at least one branch.
    pub stopped_by_filter: bool,
    /// At least one action or notify node ran.
    pub reached_effect: bool,
}

impl ExecutionResult {
    /// Returns true when a filter rejected the event before any action or
    /// notify node ran and nothing failed.
    #[must_use]
    pub fn was_filtered(&self) -> bool {
        self.success && self.stopped_by_filter && !self.reached_effect
    }

    /// Returns the captured transaction signature, if any.
    #[must_use]
    pub fn tx_signature(&self) -> Option<&str> {
        self.variables.get(TX_SIGNATURE_VAR)?.as_str()
    }

    /// Returns the errors joined for storage.
    #[must_use]
    pub fn joined_errors(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }

    pub(crate) fn from_context(
        ctx: ExecutionContext,
        stopped_by_filter: bool,
        kinds: impl Fn(&NodeId) -> Option<NodeKind>,
    ) -> Self {
        let reached_effect = ctx
            .execution_path
            .iter()
            .any(|id| matches!(kinds(id), Some(NodeKind::Action | NodeKind::Notify)));
        Self {
            success: !ctx.has_errors,
            execution_path: ctx.execution_path,
            errors: ctx.errors,
            variables: ctx.variables,
            stopped_by_filter,
            reached_effect,
        }
    }
}
