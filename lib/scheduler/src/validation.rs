//! Workflow validation including cron schedules.

use crate::schedule::check_cron_expression;
use chainflow_workflow::{GraphError, TriggerConfig, ValidationErrors, Workflow, WorkflowGraph};
use std::time::Duration;

/// One error per cron trigger whose schedule is unusable.
///
/// Empty schedules are left to the graph's own config checks.
#[must_use]
pub fn schedule_errors(graph: &WorkflowGraph, min_interval: Duration) -> Vec<GraphError> {
    graph
        .cron_triggers()
        .filter_map(|(node, config)| {
            let TriggerConfig::Cron {
                schedule, timezone, ..
            } = config
            else {
                return None;
            };
            if schedule.trim().is_empty() {
                return None;
            }
            check_cron_expression(schedule, timezone.as_deref(), min_interval)
                .err()
                .map(|e| GraphError::InvalidSchedule {
                    node_id: node.id.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

/// Validates a graph, collecting structural, config and schedule errors.
///
/// # Errors
///
/// Returns every problem found.
pub fn validate_graph(graph: &WorkflowGraph, min_interval: Duration) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new(graph.validation_errors());
    errors.extend(schedule_errors(graph, min_interval));
    errors.into_result()
}

/// Validates a whole workflow: graph, safety limits and schedules.
///
/// # Errors
///
/// Returns every problem found.
pub fn validate_workflow(workflow: &Workflow, min_interval: Duration) -> Result<(), ValidationErrors> {
    let mut errors = match workflow.validate() {
        Ok(()) => ValidationErrors::new(Vec::new()),
        Err(errors) => errors,
    };
    errors.extend(schedule_errors(&workflow.graph, min_interval));
    errors.into_result()
}
