//! Notify node executor.
//!
//! Every destination is delivered concurrently. Delivery failures are logged
//! and reported in the node output but never fail the node.

use crate::context::{ExecutionContext, NOTIFICATION_ERROR_VAR, NOTIFIED_AT_VAR};
use crate::engine::NodeExecutor;
use crate::error::ExecutionError;
use crate::node::{Node, NodeConfig, NodeKind};
use crate::template;
use async_trait::async_trait;
use chainflow_integration::{Notification, Notifier};
use chrono::Utc;
use futures::future::join_all;
use rootcause::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes notify nodes.
#[derive(Clone)]
pub struct NotifyExecutor {
    notifier: Arc<dyn Notifier>,
}

impl NotifyExecutor {
    /// Creates an executor delivering through `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl std::fmt::Debug for NotifyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl NodeExecutor for NotifyExecutor {
    async fn execute(
        &self,
        node: &Node,
        ctx: &mut ExecutionContext,
    ) -> Result<JsonValue, Report<ExecutionError>> {
        let NodeConfig::Notify(config) = &node.config else {
            return Err(ExecutionError::UnexpectedConfig {
                expected: NodeKind::Notify,
                found: node.kind(),
            }
            .into());
        };

        let message = match &config.template {
            Some(text) => template::render(text, ctx),
            None => template::default_message(ctx),
        };
        let context = json!({
            "workflow_id": ctx.workflow_id.to_string(),
            "execution_id": ctx.execution_id,
            "trigger_data": ctx.trigger_data,
        });

        let notifications: Vec<Notification> = config
            .destinations
            .iter()
            .map(|target| Notification {
                target: target.clone(),
                message: message.clone(),
                context: context.clone(),
            })
            .collect();

        let results = join_all(
            notifications
                .iter()
                .map(|notification| self.notifier.send(notification)),
        )
        .await;

        let mut errors = Vec::new();
        for (notification, result) in notifications.iter().zip(results) {
            let channel = notification.target.channel();
            match result {
                Ok(()) => debug!(node_id = %node.id, channel, "notification delivered"),
                Err(e) => {
                    warn!(node_id = %node.id, channel, error = %e.current_context(), "notification failed");
                    errors.push(format!("{channel}: {}", e.current_context()));
                }
            }
        }

        let delivered = notifications.len() - errors.len();
        if delivered > 0 {
            ctx.set_variable(NOTIFIED_AT_VAR, json!(Utc::now().to_rfc3339()));
        }
        if !errors.is_empty() {
            ctx.set_variable(NOTIFICATION_ERROR_VAR, json!(errors.join("; ")));
        }

        Ok(json!({
            "delivered": delivered,
            "failed": errors.len(),
            "errors": errors,
            "message": message,
        }))
    }
}
