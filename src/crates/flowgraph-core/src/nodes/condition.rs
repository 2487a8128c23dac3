//! Boolean routing: condition and switch
//!
//! Both kinds publish a path tag that conditional edges match against:
//! condition publishes `"true"` / `"false"` through `condition_met`, switch
//! publishes its matched case's `output_path`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{check_expression, invalid_field, missing_field, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Evaluates a boolean expression over its input
///
/// Output: `{ value, condition_met, condition, path, true_path, false_path }`.
/// In strict mode (`data.strict == true`) a non-boolean expression result is
/// an error; otherwise it is coerced with truthiness rules.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if node.data_str("condition").is_none() {
            issues.push(missing_field(node, "condition"));
        }
        check_expression(node, "condition", &mut issues);
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let source = require_str(node, "condition")?;
        let strict = node.data_bool("strict").unwrap_or(false);

        let compiled = ctx.expressions.get(source)?;
        let scope = ctx.scope_for(&node.id).await;
        let met = if strict {
            compiled.evaluate_strict_bool(&scope)
        } else {
            compiled.evaluate_bool(&scope)
        }
        .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?;

        let input = ctx.primary_input(&node.id).await;
        Ok(json!({
            "value": input,
            "condition_met": met,
            "condition": source,
            "path": if met { "true" } else { "false" },
            "true_path": met,
            "false_path": !met,
        }))
    }
}

/// Multi-way routing over ordered cases
///
/// Each case matches either by type-sensitive equality (`value` set) or by
/// boolean expression (`when`). First match wins; no match falls through to
/// `default_path` (default `"default"`).
///
/// Output: `{ value, matched, case?, output_path }`.
pub struct SwitchExecutor;

#[async_trait]
impl NodeExecutor for SwitchExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Switch
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match node.data.get("cases") {
            None => issues.push(missing_field(node, "cases")),
            Some(Value::Array(cases)) => {
                for (i, case) in cases.iter().enumerate() {
                    let has_when = case.get("when").map(|w| w.is_string()).unwrap_or(false);
                    let has_value = case.get("value").is_some();
                    if !has_when && !has_value {
                        issues.push(invalid_field(
                            node,
                            "cases",
                            &format!("case {} needs either 'when' or 'value'", i),
                        ));
                    }
                    if let Some(when) = case.get("when").and_then(Value::as_str) {
                        if let Err(error) = crate::expr::compile(when, 64) {
                            issues.push(
                                ValidationIssue::new(
                                    crate::error::IssueKind::Expression,
                                    error.to_string(),
                                )
                                .for_node(&node.id)
                                .for_field(format!("cases[{}].when", i)),
                            );
                        }
                    }
                }
            }
            Some(_) => issues.push(invalid_field(node, "cases", "'cases' must be an array")),
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let cases = node
            .data
            .get("cases")
            .and_then(Value::as_array)
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing 'cases'"))?;
        let default_path = node.data_str("default_path").unwrap_or("default");

        let input = ctx.primary_input(&node.id).await;
        let scope = ctx.scope_with_input(input.clone()).await;

        for (i, case) in cases.iter().enumerate() {
            let matched = if let Some(expected) = case.get("value") {
                strict_case_eq(&input, expected)
            } else if let Some(when) = case.get("when").and_then(Value::as_str) {
                // Eval errors are hard failures here, not "no match":
                // a broken case would otherwise silently reroute traffic.
                let compiled = ctx.expressions.get(when)?;
                compiled
                    .evaluate_bool(&scope)
                    .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?
            } else {
                false
            };

            if matched {
                let output_path = case
                    .get("output_path")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("case_{}", i));
                let label = case
                    .get("when")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| crate::expr::display(expected_of(case)));
                return Ok(json!({
                    "value": input,
                    "matched": true,
                    "case": label,
                    "output_path": output_path,
                }));
            }
        }

        Ok(json!({
            "value": input,
            "matched": false,
            "output_path": default_path,
        }))
    }
}

fn expected_of(case: &Value) -> &Value {
    case.get("value").unwrap_or(&Value::Null)
}

/// Type-sensitive case equality: numbers compare to numbers, strings to
/// strings, booleans to booleans; cross-type never matches.
fn strict_case_eq(input: &Value, expected: &Value) -> bool {
    match (input, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{context_with_input, node};

    #[tokio::test]
    async fn condition_publishes_true_path() {
        let ctx = context_with_input("check", json!(25)).await;
        let out = ConditionExecutor
            .execute(&ctx, &node("check", "condition", json!({"condition": "input >= 18"})))
            .await
            .unwrap();
        assert_eq!(out["condition_met"], json!(true));
        assert_eq!(out["path"], json!("true"));
        assert_eq!(out["true_path"], json!(true));
        assert_eq!(out["false_path"], json!(false));
        assert_eq!(out["value"], json!(25));
    }

    #[tokio::test]
    async fn condition_publishes_false_path() {
        let ctx = context_with_input("check", json!(15)).await;
        let out = ConditionExecutor
            .execute(&ctx, &node("check", "condition", json!({"condition": "input >= 18"})))
            .await
            .unwrap();
        assert_eq!(out["condition_met"], json!(false));
        assert_eq!(out["path"], json!("false"));
    }

    #[tokio::test]
    async fn condition_strict_rejects_non_boolean() {
        let ctx = context_with_input("check", json!(25)).await;
        let relaxed = ConditionExecutor
            .execute(&ctx, &node("check", "condition", json!({"condition": "input + 1"})))
            .await
            .unwrap();
        assert_eq!(relaxed["condition_met"], json!(true)); // coerced

        let strict = ConditionExecutor
            .execute(
                &ctx,
                &node("check", "condition", json!({"condition": "input + 1", "strict": true})),
            )
            .await;
        assert!(strict.is_err());
    }

    #[tokio::test]
    async fn condition_validation_catches_bad_expression() {
        let bad = node("check", "condition", json!({"condition": "input >="}));
        assert!(!ConditionExecutor.validate(&bad).is_empty());
    }

    fn status_cases() -> Value {
        json!({
            "cases": [
                {"when": "input == 200", "value": 200, "output_path": "ok"},
                {"when": "input == 404", "value": 404, "output_path": "nf"},
                {"when": "input >= 500", "output_path": "err"}
            ],
            "default_path": "other"
        })
    }

    #[tokio::test]
    async fn switch_value_match_is_type_sensitive() {
        let ctx = context_with_input("sw", json!(404)).await;
        let out = SwitchExecutor
            .execute(&ctx, &node("sw", "switch", status_cases()))
            .await
            .unwrap();
        assert_eq!(out["matched"], json!(true));
        assert_eq!(out["output_path"], json!("nf"));

        // A string input does not match a numeric case value; it falls to
        // the expression case or the default.
        let ctx = context_with_input("sw", json!("404")).await;
        let out = SwitchExecutor
            .execute(&ctx, &node("sw", "switch", status_cases()))
            .await;
        // "404" >= 500 is a type error inside the expression: hard failure.
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn switch_expression_match() {
        let ctx = context_with_input("sw", json!(503)).await;
        let out = SwitchExecutor
            .execute(&ctx, &node("sw", "switch", status_cases()))
            .await
            .unwrap();
        assert_eq!(out["output_path"], json!("err"));
        assert_eq!(out["case"], json!("input >= 500"));
    }

    #[tokio::test]
    async fn switch_falls_through_to_default() {
        let ctx = context_with_input("sw", json!(302)).await;
        let out = SwitchExecutor
            .execute(&ctx, &node("sw", "switch", status_cases()))
            .await
            .unwrap();
        assert_eq!(out["matched"], json!(false));
        assert_eq!(out["output_path"], json!("other"));
    }

    #[tokio::test]
    async fn switch_first_match_wins() {
        let ctx = context_with_input("sw", json!(200)).await;
        let cases = json!({
            "cases": [
                {"value": 200, "output_path": "first"},
                {"when": "input == 200", "output_path": "second"}
            ]
        });
        let out = SwitchExecutor
            .execute(&ctx, &node("sw", "switch", cases))
            .await
            .unwrap();
        assert_eq!(out["output_path"], json!("first"));
    }

    #[test]
    fn switch_validation() {
        let bad = node("sw", "switch", json!({"cases": [{}]}));
        assert!(!SwitchExecutor.validate(&bad).is_empty());
        let none = node("sw", "switch", json!({}));
        assert!(!SwitchExecutor.validate(&none).is_empty());
    }
}
