//! Bounded iteration: for_each and while_loop
//!
//! Both kinds iterate inline over their input value rather than re-running a
//! child sub-graph; downstream nodes receive the documented metadata shapes.
//! Iteration counts are guarded twice: by the node's own `max_iterations`
//! and by the engine-wide limits.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{check_expression, missing_field, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Default per-node iteration bound for for_each
const FOREACH_DEFAULT_MAX: u64 = 1_000;

/// Default per-node iteration bound for while_loop
const WHILE_DEFAULT_MAX: u64 = 100;

/// Runs an optional expression once per input element
///
/// Errors in one iteration do not stop the loop; they are counted in
/// `failed`. Output is metadata only:
/// `{ input_count, iterations, successful, failed }`.
pub struct ForEachExecutor;

#[async_trait]
impl NodeExecutor for ForEachExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::ForEach
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        check_expression(node, "expression", &mut issues);
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let input = ctx.primary_input(&node.id).await;
        let items = match &input {
            Value::Array(items) => items.clone(),
            other => {
                return Err(WorkflowError::node_failure(
                    &node.id,
                    format!("expected an array input, got {}", crate::expr::type_name(other)),
                ))
            }
        };

        let max_iterations = node
            .data_u64("max_iterations")
            .unwrap_or(FOREACH_DEFAULT_MAX)
            .min(ctx.limits.max_foreach_iterations);
        if items.len() as u64 > max_iterations {
            return Err(WorkflowError::Budget {
                resource: "foreach_iterations".into(),
                limit: max_iterations,
            });
        }

        let compiled = match node.data_str("expression") {
            Some(source) => Some(ctx.expressions.get(source)?),
            None => None,
        };
        let base = ctx.scope_with_input(input.clone()).await;
        let all = Value::Array(items.clone());

        let mut successful = 0usize;
        let mut failed = 0usize;
        for (i, item) in items.iter().enumerate() {
            match &compiled {
                Some(expr) => {
                    let scope = base.iteration(item.clone(), i, all.clone());
                    match expr.evaluate(&scope) {
                        Ok(_) => successful += 1,
                        Err(_) => failed += 1,
                    }
                }
                None => successful += 1,
            }
        }

        Ok(json!({
            "input_count": items.len(),
            "iterations": items.len(),
            "successful": successful,
            "failed": failed,
        }))
    }
}

/// Re-evaluates a condition over an evolving loop value
///
/// The loop value starts as the node's input; each iteration the optional
/// `update` expression produces the next value (bound as `input` and
/// `item`). Exceeding `max_iterations` is a terminal error, not a truncated
/// result.
///
/// Output: `{ final_value, iterations, condition }`.
pub struct WhileLoopExecutor;

#[async_trait]
impl NodeExecutor for WhileLoopExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::WhileLoop
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if node.data_str("condition").is_none() {
            issues.push(missing_field(node, "condition"));
        }
        check_expression(node, "condition", &mut issues);
        check_expression(node, "update", &mut issues);
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let source = require_str(node, "condition")?;
        let condition = ctx.expressions.get(source)?;
        let update = match node.data_str("update") {
            Some(text) => Some(ctx.expressions.get(text)?),
            None => None,
        };

        let max_iterations = node
            .data_u64("max_iterations")
            .unwrap_or(WHILE_DEFAULT_MAX)
            .min(ctx.limits.max_while_iterations);

        let mut value = ctx.primary_input(&node.id).await;
        let mut iterations: u64 = 0;
        loop {
            ctx.check_deadline()?;

            let scope = ctx
                .scope_with_input(value.clone())
                .await
                .bind("item", value.clone())
                .bind("index", json!(iterations));
            let keep_going = condition
                .evaluate_bool(&scope)
                .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?;
            if !keep_going {
                break;
            }

            iterations += 1;
            if iterations > max_iterations {
                return Err(WorkflowError::Budget {
                    resource: "while_iterations".into(),
                    limit: max_iterations,
                });
            }

            if let Some(update) = &update {
                value = update
                    .evaluate(&scope)
                    .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?;
            }
        }

        Ok(json!({
            "final_value": value,
            "iterations": iterations,
            "condition": source,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{context_with_input, node};

    #[tokio::test]
    async fn for_each_counts_iterations() {
        let ctx = context_with_input("fe", json!([1, 2, "x"])).await;
        let out = ForEachExecutor
            .execute(
                &ctx,
                &node("fe", "for_each", json!({"expression": "item * 2"})),
            )
            .await
            .unwrap();
        assert_eq!(out["input_count"], json!(3));
        assert_eq!(out["iterations"], json!(3));
        assert_eq!(out["successful"], json!(2));
        assert_eq!(out["failed"], json!(1));
    }

    #[tokio::test]
    async fn for_each_without_expression_is_a_pass() {
        let ctx = context_with_input("fe", json!([1, 2])).await;
        let out = ForEachExecutor
            .execute(&ctx, &node("fe", "for_each", json!({})))
            .await
            .unwrap();
        assert_eq!(out["successful"], json!(2));
        assert_eq!(out["failed"], json!(0));
    }

    #[tokio::test]
    async fn for_each_bound_is_enforced() {
        let ctx = context_with_input("fe", json!([1, 2, 3, 4])).await;
        let out = ForEachExecutor
            .execute(
                &ctx,
                &node("fe", "for_each", json!({"max_iterations": 3})),
            )
            .await;
        assert!(matches!(out, Err(WorkflowError::Budget { .. })));
    }

    #[tokio::test]
    async fn while_loop_counts_down() {
        let ctx = context_with_input("w", json!(5)).await;
        let out = WhileLoopExecutor
            .execute(
                &ctx,
                &node(
                    "w",
                    "while_loop",
                    json!({"condition": "input > 0", "update": "input - 1"}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(out["final_value"], json!(0.0));
        assert_eq!(out["iterations"], json!(5));
    }

    #[tokio::test]
    async fn while_loop_never_entered() {
        let ctx = context_with_input("w", json!(0)).await;
        let out = WhileLoopExecutor
            .execute(
                &ctx,
                &node("w", "while_loop", json!({"condition": "input > 0"})),
            )
            .await
            .unwrap();
        assert_eq!(out["iterations"], json!(0));
        assert_eq!(out["final_value"], json!(0));
    }

    #[tokio::test]
    async fn while_loop_guard_trips_on_stuck_condition() {
        let ctx = context_with_input("w", json!(5)).await;
        // No update expression: the condition never changes.
        let out = WhileLoopExecutor
            .execute(
                &ctx,
                &node(
                    "w",
                    "while_loop",
                    json!({"condition": "input > 0", "max_iterations": 10}),
                ),
            )
            .await;
        assert!(matches!(out, Err(WorkflowError::Budget { .. })));
    }
}
