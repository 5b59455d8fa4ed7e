//! Registration ids and set arithmetic for reconciliation.

use chainflow_core::WorkflowId;
use chainflow_workflow::NodeId;
use std::collections::BTreeSet;

/// Registry id of the cron trigger `trigger_node_id` in `workflow_id`.
#[must_use]
pub fn cron_job_id(workflow_id: WorkflowId, trigger_node_id: &NodeId) -> String {
    format!("{}{trigger_node_id}", workflow_prefix(workflow_id))
}

/// Prefix shared by every registration of `workflow_id`.
#[must_use]
pub fn workflow_prefix(workflow_id: WorkflowId) -> String {
    format!("cron:{workflow_id}:")
}

/// What to change so that `actual` becomes `expected`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl ReconcilePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diffs desired registration ids against registered ones.
#[must_use]
pub fn plan(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> ReconcilePlan {
    ReconcilePlan {
        to_add: expected.difference(actual).cloned().collect(),
        to_remove: actual.difference(expected).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    #[test]
    fn id_has_workflow_prefix() {
        let workflow_id = WorkflowId::new();
        let id = cron_job_id(workflow_id, &NodeId::from("tick"));

        assert!(id.starts_with(&workflow_prefix(workflow_id)));
        assert_eq!(id, format!("cron:{workflow_id}:tick"));
    }

    #[test]
    fn plan_adds_missing_and_removes_stale() {
        let plan = plan(&set(&["a", "b"]), &set(&["b", "c"]));

        assert_eq!(plan.to_add, set(&["a"]));
        assert_eq!(plan.to_remove, set(&["c"]));
    }

    #[test]
    fn matching_sets_need_nothing() {
        assert!(plan(&set(&["a"]), &set(&["a"])).is_empty());
    }
}
