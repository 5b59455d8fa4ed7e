//! Workflow engine for the chainflow platform.
//!
//! This crate provides the workflow model and the engine that runs it:
//!
//! - **Graph Model**: Directed graphs using petgraph with typed nodes and edges
//! - **Node Types**: Trigger, Filter, Action, Notify
//! - **Validation**: Structural and configuration checks, all errors collected
//! - **Execution**: Depth-first traversal with per-kind executors

pub mod action;
pub mod context;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod filter;
pub mod graph;
pub mod node;
pub mod notify;
pub mod template;

pub use action::ActionExecutor;
pub use context::{ExecutionContext, ExecutionResult};
pub use definition::{SafetyLimits, Workflow, WorkflowMetadata};
pub use edge::Edge;
pub use engine::{NodeExecutor, NodeExecutorRegistry, WorkflowEngine};
pub use error::{ExecutionError, GraphError, ValidationErrors};
pub use graph::WorkflowGraph;
pub use node::{
    ActionConfig, Condition, ConditionOperator, FilterConfig, FilterLogic, Node, NodeConfig,
    NodeId, NodeKind, NotifyConfig, TriggerConfig,
};
pub use notify::NotifyExecutor;
