//! Graph execution engine.
//!
//! The engine walks a workflow graph depth-first from its trigger nodes.
//! Each node is handed to the executor registered for its kind:
//!
//! - An executor error is recorded and stops that branch
//! - A filter returning `false` stops that branch without an error
//! - Otherwise the output is stored under the node id and the walk continues
//!   into the node's successors in edge-declaration order
//!
//! A node runs at most once per execution even if several branches reach it.
//! The engine itself never fails; callers inspect [`ExecutionResult`].

use crate::action::ActionExecutor;
use crate::context::{ExecutionContext, ExecutionResult};
use crate::error::ExecutionError;
use crate::filter;
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeConfig, NodeId, NodeKind};
use crate::notify::NotifyExecutor;
use async_trait::async_trait;
use chainflow_integration::Notifier;
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Executes one kind of node.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs the node and returns its output.
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<JsonValue, Report<ExecutionError>>;
}

/// Dispatch table from node kind to executor.
#[derive(Clone, Default)]
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the trigger and filter executors.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(NodeKind::Trigger, Arc::new(TriggerExecutor));
        registry.register(NodeKind::Filter, Arc::new(FilterExecutor));
        registry
    }

    /// Creates a registry covering every node kind.
    #[must_use]
    pub fn standard(actions: ActionExecutor, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_builtin()
            .with(NodeKind::Action, Arc::new(actions))
            .with(NodeKind::Notify, Arc::new(NotifyExecutor::new(notifier)))
    }

    /// Registers (or replaces) the executor for a kind.
    pub fn register(&mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(kind, executor);
    }

    /// Registers an executor, builder style.
    #[must_use]
    pub fn with(mut self, kind: NodeKind, executor: Arc<dyn NodeExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    /// Returns the executor for a kind.
    #[must_use]
    pub fn get(&self, kind: NodeKind) -> Option<&Arc<dyn NodeExecutor>> {
        self.executors.get(&kind)
    }
}

impl std::fmt::Debug for NodeExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutorRegistry")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Passes the trigger payload through.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerExecutor;

#[async_trait]
impl NodeExecutor for TriggerExecutor {
    async fn execute(
        &self,
        _node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        Ok(ctx.trigger_data.clone())
    }
}

/// Evaluates filter conditions; outputs a boolean.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        let NodeConfig::Filter(config) = &node.config else {
            return Err(ExecutionError::UnexpectedConfig {
                expected: NodeKind::Filter,
                found: node.kind(),
            }
            .into());
        };
        Ok(JsonValue::Bool(filter::evaluate(config, ctx)))
    }
}

/// Interprets workflow graphs.
#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    registry: NodeExecutorRegistry,
}

impl WorkflowEngine {
    /// Creates an engine over a registry.
    #[must_use]
    pub fn new(registry: NodeExecutorRegistry) -> Self {
        Self { registry }
    }

    /// Executes a graph.
    #[instrument(skip_all, fields(workflow_id = %ctx.workflow_id, execution_id = %ctx.execution_id))]
    pub async fn execute(&self, graph: &WorkflowGraph, mut ctx: ExecutionContext) -> ExecutionResult {
        let starts: Vec<NodeId> = match &ctx.trigger_node_id {
            Some(id) if graph.get_node(id).is_some_and(|n| n.kind() == NodeKind::Trigger) => {
                vec![id.clone()]
            }
            Some(id) => {
                warn!(trigger_node_id = %id, "trigger node not in graph, running every trigger");
                graph.trigger_nodes().iter().map(|n| n.id.clone()).collect()
            }
            None => graph.trigger_nodes().iter().map(|n| n.id.clone()).collect(),
        };

        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stopped_by_filter = false;

        for start in starts {
            let mut stack = vec![start];
            while let Some(node_id) = stack.pop() {
                if !visited.insert(node_id.clone()) {
                    continue;
                }
                let Some(node) = graph.get_node(&node_id) else {
                    continue;
                };

                let outcome = match self.registry.get(node.kind()) {
                    Some(executor) => executor.execute(node, &mut ctx).await,
                    None => Err(ExecutionError::NoExecutor { kind: node.kind() }.into()),
                };
                ctx.execution_path.push(node_id.clone());

                let output = match outcome {
                    Ok(output) => output,
                    Err(report) => {
                        warn!(node_id = %node_id, error = %report.current_context(), "node failed");
                        ctx.record_error(format!("{node_id}: {}", report.current_context()));
                        continue;
                    }
                };

                if node.kind() == NodeKind::Filter && output == JsonValue::Bool(false) {
                    debug!(node_id = %node_id, "filter stopped branch");
                    stopped_by_filter = true;
                    continue;
                }

                debug!(node_id = %node_id, kind = %node.kind(), "node completed");
                ctx.variables.insert(node_id.to_string(), output);

                // reversed so the first-declared successor runs first
                for successor in graph.successors(&node_id).into_iter().rev() {
                    stack.push(successor.id.clone());
                }
            }
        }

        let result = ExecutionResult::from_context(ctx, stopped_by_filter, |id| {
            graph.get_node(id).map(Node::kind)
        });
        info!(
            success = result.success,
            nodes = result.execution_path.len(),
            errors = result.errors.len(),
            "workflow executed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowMetadata;
    use crate::edge::Edge;
    use crate::node::{
        ActionConfig, Condition, ConditionOperator, FilterConfig, FilterLogic, TriggerConfig,
    };
    use chainflow_core::{ExecutionId, WorkflowId};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records visited nodes and optionally fails some.
    #[derive(Default)]
    struct RecordingExecutor {
        fail: HashSet<String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeExecutor for RecordingExecutor {
        async fn execute(
            &self,
            node: &Node,
            _ctx: &mut ExecutionContext,
        ) -> Result<JsonValue, Report<ExecutionError>> {
            self.seen
                .lock()
                .expect("lock")
                .push(node.id.to_string());
            if self.fail.contains(node.id.as_str()) {
                return Err(ExecutionError::Collaborator {
                    operation: "test".to_string(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(json!({ "ok": node.id.as_str() }))
        }
    }

    fn trigger(id: &str) -> Node {
        Node::trigger(
            id,
            TriggerConfig::BalanceChange {
                address: "Wallet".to_string(),
                min_change_lamports: None,
            },
        )
    }

    fn amount_filter(id: &str, threshold: i64) -> Node {
        Node::filter(
            id,
            FilterConfig {
                conditions: vec![Condition {
                    field: "amount".to_string(),
                    operator: ConditionOperator::GreaterThan,
                    value: json!(threshold),
                }],
                logic: FilterLogic::And,
            },
        )
    }

    fn notify(id: &str) -> Node {
        Node::notify(
            id,
            crate::node::NotifyConfig {
                destinations: vec![chainflow_integration::NotificationTarget::Webhook {
                    url: "https://example.com".to_string(),
                }],
                template: None,
            },
        )
    }

    fn engine(recorder: Arc<RecordingExecutor>) -> WorkflowEngine {
        WorkflowEngine::new(
            NodeExecutorRegistry::with_builtin()
                .with(NodeKind::Action, recorder.clone())
                .with(NodeKind::Notify, recorder),
        )
    }

    fn ctx(trigger_data: JsonValue) -> ExecutionContext {
        ExecutionContext::new(
            WorkflowId::new(),
            ExecutionId::from("exec-1"),
            trigger_data,
            WorkflowMetadata::default(),
        )
    }

    fn path(result: &ExecutionResult) -> Vec<&str> {
        result.execution_path.iter().map(NodeId::as_str).collect()
    }

    fn linear_graph(threshold: i64) -> WorkflowGraph {
        WorkflowGraph::from_parts(
            vec![
                trigger("t"),
                amount_filter("f", threshold),
                Node::action("a", ActionConfig::DoNothing),
                notify("n"),
            ],
            vec![Edge::new("t", "f"), Edge::new("f", "a"), Edge::new("a", "n")],
        )
    }

    #[tokio::test]
    async fn linear_chain_runs_in_order_when_filter_passes() {
        let recorder = Arc::new(RecordingExecutor::default());
        let result = engine(recorder.clone())
            .execute(&linear_graph(3), ctx(json!({ "amount": 5 })))
            .await;

        assert!(result.success);
        assert_eq!(path(&result), vec!["t", "f", "a", "n"]);
        assert_eq!(result.variables["t"], json!({ "amount": 5 }));
        assert_eq!(result.variables["f"], json!(true));
        assert!(!result.was_filtered());
    }

    #[tokio::test]
    async fn linear_chain_stops_after_rejecting_filter() {
        let recorder = Arc::new(RecordingExecutor::default());
        let result = engine(recorder.clone())
            .execute(&linear_graph(10), ctx(json!({ "amount": 5 })))
            .await;

        assert!(result.success);
        assert!(result.errors.is_empty());
        assert_eq!(path(&result), vec!["t", "f"]);
        assert!(recorder.seen.lock().expect("lock").is_empty());
        assert!(result.was_filtered());
        assert!(!result.variables.contains_key("f"));
    }

    #[tokio::test]
    async fn failure_stops_branch_but_not_siblings() {
        let recorder = Arc::new(RecordingExecutor {
            fail: HashSet::from(["a1".to_string()]),
            ..RecordingExecutor::default()
        });
        let graph = WorkflowGraph::from_parts(
            vec![
                trigger("t"),
                Node::action("a1", ActionConfig::DoNothing),
                notify("n1"),
                Node::action("a2", ActionConfig::DoNothing),
            ],
            vec![Edge::new("t", "a1"), Edge::new("a1", "n1"), Edge::new("t", "a2")],
        );

        let result = engine(recorder).execute(&graph, ctx(json!({}))).await;

        assert!(!result.success);
        assert_eq!(path(&result), vec!["t", "a1", "a2"]);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("a1: "));
        assert!(result.errors[0].contains("boom"));
    }

    #[tokio::test]
    async fn shared_descendant_runs_once() {
        let recorder = Arc::new(RecordingExecutor::default());
        let graph = WorkflowGraph::from_parts(
            vec![
                trigger("t"),
                Node::action("left", ActionConfig::DoNothing),
                Node::action("right", ActionConfig::DoNothing),
                notify("n"),
            ],
            vec![
                Edge::new("t", "left"),
                Edge::new("t", "right"),
                Edge::new("left", "n"),
                Edge::new("right", "n"),
            ],
        );

        let result = engine(recorder.clone()).execute(&graph, ctx(json!({}))).await;

        assert_eq!(path(&result), vec!["t", "left", "n", "right"]);
        assert_eq!(
            *recorder.seen.lock().expect("lock"),
            vec!["left", "n", "right"]
        );
    }

    #[tokio::test]
    async fn only_the_fired_trigger_runs() {
        let recorder = Arc::new(RecordingExecutor::default());
        let graph = WorkflowGraph::from_parts(
            vec![trigger("t1"), trigger("t2"), notify("n1"), notify("n2")],
            vec![Edge::new("t1", "n1"), Edge::new("t2", "n2")],
        );

        let result = engine(recorder)
            .execute(&graph, ctx(json!({})).with_trigger_node(NodeId::from("t2")))
            .await;

        assert_eq!(path(&result), vec!["t2", "n2"]);
    }

    #[tokio::test]
    async fn missing_executor_is_a_node_error() {
        let graph = WorkflowGraph::from_parts(
            vec![trigger("t"), notify("n")],
            vec![Edge::new("t", "n")],
        );
        let engine = WorkflowEngine::new(NodeExecutorRegistry::with_builtin());

        let result = engine.execute(&graph, ctx(json!({}))).await;

        assert!(!result.success);
        assert_eq!(path(&result), vec!["t", "n"]);
        assert!(result.errors[0].contains("no executor registered for notify"));
    }
}
