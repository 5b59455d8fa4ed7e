//! Message templates for notify nodes.
//!
//! `{{path}}` reads trigger data, `{{$name.path}}` reads variables. Missing
//! values render as an empty string.

use crate::context::ExecutionContext;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Renders a template against the execution context.
#[must_use]
pub fn render(template: &str, ctx: &ExecutionContext) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match ctx.resolve(&caps[1]) {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Message used when a notify node has no template.
#[must_use]
pub fn default_message(ctx: &ExecutionContext) -> String {
    let mut message = format!(
        "Workflow {} triggered (execution {})",
        ctx.workflow_id, ctx.execution_id
    );
    if let Some(signature) = ctx
        .variables
        .get(crate::context::TX_SIGNATURE_VAR)
        .and_then(JsonValue::as_str)
    {
        message.push_str(&format!("\nTransaction: {signature}"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TX_SIGNATURE_VAR;
    use crate::definition::WorkflowMetadata;
    use chainflow_core::{ExecutionId, WorkflowId};
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(
            WorkflowId::new(),
            ExecutionId::from("exec-9"),
            json!({ "address": "Wallet1", "delta": 1500, "meta": { "slot": 7 } }),
            WorkflowMetadata::default(),
        );
        ctx.set_variable(TX_SIGNATURE_VAR, json!("5sig"));
        ctx
    }

    #[test]
    fn renders_trigger_data_and_variables() {
        let text = render(
            "{{address}} moved {{ delta }} lamports at slot {{meta.slot}} ({{$txSignature}})",
            &ctx(),
        );
        assert_eq!(text, "Wallet1 moved 1500 lamports at slot 7 (5sig)");
    }

    #[test]
    fn missing_values_render_empty() {
        assert_eq!(render("[{{nope}}]", &ctx()), "[]");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render("plain text", &ctx()), "plain text");
    }

    #[test]
    fn default_message_mentions_signature() {
        let message = default_message(&ctx());
        assert!(message.contains("exec-9"));
        assert!(message.contains("5sig"));
    }
}
