//! Filter condition evaluation.

use crate::context::ExecutionContext;
use crate::node::{Condition, ConditionOperator, FilterConfig, FilterLogic};
use serde_json::Value as JsonValue;

/// Evaluates a filter against the execution context.
///
/// An empty condition list passes.
#[must_use]
pub fn evaluate(filter: &FilterConfig, ctx: &ExecutionContext) -> bool {
    if filter.conditions.is_empty() {
        return true;
    }
    let mut results = filter.conditions.iter().map(|c| evaluate_condition(c, ctx));
    match filter.logic {
        FilterLogic::And => results.all(|passed| passed),
        FilterLogic::Or => results.any(|passed| passed),
    }
}

/// Evaluates one condition. Missing fields only satisfy `not_equals`.
#[must_use]
pub fn evaluate_condition(condition: &Condition, ctx: &ExecutionContext) -> bool {
    let Some(actual) = ctx.resolve(&condition.field) else {
        return condition.operator == ConditionOperator::NotEquals;
    };
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => loosely_equal(actual, expected),
        ConditionOperator::NotEquals => !loosely_equal(actual, expected),
        ConditionOperator::GreaterThan => {
            matches!((as_number(actual), as_number(expected)), (Some(a), Some(b)) if a > b)
        }
        ConditionOperator::LessThan => {
            matches!((as_number(actual), as_number(expected)), (Some(a), Some(b)) if a < b)
        }
        ConditionOperator::Contains => match actual {
            JsonValue::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
            JsonValue::String(text) => text.contains(&as_text(expected)),
            _ => false,
        },
        ConditionOperator::StartsWith => actual
            .as_str()
            .is_some_and(|text| text.starts_with(&as_text(expected))),
        ConditionOperator::EndsWith => actual
            .as_str()
            .is_some_and(|text| text.ends_with(&as_text(expected))),
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numbers compare numerically (including numeric strings); everything
/// else compares structurally.
fn loosely_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(_), _) | (_, JsonValue::Number(_)) => {
            matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y)
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowMetadata;
    use chainflow_core::{ExecutionId, WorkflowId};
    use serde_json::json;

    fn ctx(trigger_data: JsonValue) -> ExecutionContext {
        ExecutionContext::new(
            WorkflowId::new(),
            ExecutionId::from("e"),
            trigger_data,
            WorkflowMetadata::default(),
        )
    }

    fn condition(field: &str, operator: ConditionOperator, value: JsonValue) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    fn filter(logic: FilterLogic, conditions: Vec<Condition>) -> FilterConfig {
        FilterConfig { conditions, logic }
    }

    #[test]
    fn greater_than_compares_numbers() {
        let ctx = ctx(json!({ "amount": 5 }));

        let passes = filter(
            FilterLogic::And,
            vec![condition("amount", ConditionOperator::GreaterThan, json!(3))],
        );
        let fails = filter(
            FilterLogic::And,
            vec![condition("amount", ConditionOperator::GreaterThan, json!(10))],
        );

        assert!(evaluate(&passes, &ctx));
        assert!(!evaluate(&fails, &ctx));
    }

    #[test]
    fn empty_filter_passes() {
        assert!(evaluate(&FilterConfig::default(), &ctx(json!({}))));
    }

    #[test]
    fn or_logic_needs_one_match() {
        let ctx = ctx(json!({ "token": "USDC", "amount": 1 }));
        let config = filter(
            FilterLogic::Or,
            vec![
                condition("token", ConditionOperator::Equals, json!("BONK")),
                condition("amount", ConditionOperator::LessThan, json!(2)),
            ],
        );
        assert!(evaluate(&config, &ctx));
    }

    #[test]
    fn and_logic_needs_every_match() {
        let ctx = ctx(json!({ "token": "USDC", "amount": 1 }));
        let config = filter(
            FilterLogic::And,
            vec![
                condition("token", ConditionOperator::Equals, json!("USDC")),
                condition("amount", ConditionOperator::GreaterThan, json!(2)),
            ],
        );
        assert!(!evaluate(&config, &ctx));
    }

    #[test]
    fn string_operators() {
        let ctx = ctx(json!({ "log": "Program log: Instruction: Swap" }));
        assert!(evaluate_condition(
            &condition("log", ConditionOperator::Contains, json!("Swap")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("log", ConditionOperator::StartsWith, json!("Program log")),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("log", ConditionOperator::EndsWith, json!("Swap")),
            &ctx
        ));
        assert!(!evaluate_condition(
            &condition("log", ConditionOperator::EndsWith, json!("Mint")),
            &ctx
        ));
    }

    #[test]
    fn contains_checks_array_membership() {
        let ctx = ctx(json!({ "tags": ["whale", "dex"] }));
        assert!(evaluate_condition(
            &condition("tags", ConditionOperator::Contains, json!("dex")),
            &ctx
        ));
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        let ctx = ctx(json!({ "uiAmount": "12.5" }));
        assert!(evaluate_condition(
            &condition("uiAmount", ConditionOperator::Equals, json!(12.5)),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("uiAmount", ConditionOperator::LessThan, json!(13)),
            &ctx
        ));
    }

    #[test]
    fn missing_field_only_satisfies_not_equals() {
        let ctx = ctx(json!({}));
        assert!(!evaluate_condition(
            &condition("amount", ConditionOperator::Equals, json!(1)),
            &ctx
        ));
        assert!(evaluate_condition(
            &condition("amount", ConditionOperator::NotEquals, json!(1)),
            &ctx
        ));
    }

    #[test]
    fn dollar_prefix_reads_variables() {
        let mut ctx = ctx(json!({}));
        ctx.set_variable("balance", json!({ "delta": 2_000_000_000u64 }));
        assert!(evaluate_condition(
            &condition(
                "$balance.delta",
                ConditionOperator::GreaterThan,
                json!(1_000_000_000u64)
            ),
            &ctx
        ));
    }
}
