//! Failure handling: retry and try_catch

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{check_expression, invalid_field};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;
use crate::retry::RetryPolicy;

/// Retry marker for its direct successors
///
/// The engine wraps the execution of every direct successor of this node in
/// a retry loop built from this node's data: `max_attempts`, `backoff_ms`,
/// `multiplier`, `jitter_factor`. Only transient failures are retried; an
/// SSRF block or validation failure is never re-attempted.
///
/// The node itself passes its input through:
/// `{ value, max_attempts, backoff_ms, multiplier, jitter_factor }`.
pub struct RetryExecutor;

impl RetryExecutor {
    /// Build the policy the engine applies to this node's successors
    pub fn policy_from(node: &Node) -> RetryPolicy {
        let max_attempts = node.data_u64("max_attempts").unwrap_or(3) as usize;
        let mut policy = RetryPolicy::new(max_attempts);
        if let Some(ms) = node.data_u64("backoff_ms") {
            policy = policy.with_base(std::time::Duration::from_millis(ms));
        }
        if let Some(multiplier) = node.data_f64("multiplier") {
            policy = policy.with_multiplier(multiplier);
        }
        if let Some(jitter) = node.data_f64("jitter_factor") {
            policy = policy.with_jitter_factor(jitter);
        }
        policy
    }
}

#[async_trait]
impl NodeExecutor for RetryExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Retry
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("max_attempts") {
            Some(v) if v.as_u64().map(|n| n == 0).unwrap_or(true) => vec![invalid_field(
                node,
                "max_attempts",
                "'max_attempts' must be a positive integer",
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let policy = Self::policy_from(node);
        let input = ctx.primary_input(&node.id).await;
        Ok(json!({
            "value": input,
            "max_attempts": policy.max_attempts,
            "backoff_ms": policy.base.as_millis() as u64,
            "multiplier": policy.multiplier,
            "jitter_factor": policy.jitter_factor,
        }))
    }
}

/// Guarded evaluation with an error path
///
/// Evaluates `data.expression` over its input. Success publishes the result
/// on the `try` path; failure publishes the error object on the `catch`
/// path instead of failing the node:
///
/// ```text
/// ok:  { value: <result>, caught: false, path: "try" }
/// err: { value: <input>, caught: true, path: "catch",
///        error: { kind, message } }
/// ```
///
/// Without an expression the input passes through on `try`.
pub struct TryCatchExecutor;

#[async_trait]
impl NodeExecutor for TryCatchExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::TryCatch
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        check_expression(node, "expression", &mut issues);
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let input = ctx.primary_input(&node.id).await;

        let source = match node.data_str("expression") {
            Some(source) => source,
            None => {
                return Ok(json!({ "value": input, "caught": false, "path": "try" }));
            }
        };

        let compiled = ctx.expressions.get(source)?;
        let scope = ctx.scope_with_input(input.clone()).await;
        match compiled.evaluate(&scope) {
            Ok(value) => Ok(json!({ "value": value, "caught": false, "path": "try" })),
            Err(error) => Ok(json!({
                "value": input,
                "caught": true,
                "path": "catch",
                "error": {
                    "kind": error.kind(),
                    "message": error.to_string(),
                },
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{context_with_input, node};

    #[tokio::test]
    async fn retry_node_passes_through_with_policy() {
        let ctx = context_with_input("r", json!(3)).await;
        let out = RetryExecutor
            .execute(
                &ctx,
                &node("r", "retry", json!({"max_attempts": 5, "backoff_ms": 200})),
            )
            .await
            .unwrap();
        assert_eq!(out["value"], json!(3));
        assert_eq!(out["max_attempts"], json!(5));
        assert_eq!(out["backoff_ms"], json!(200));
    }

    #[test]
    fn retry_policy_from_data() {
        let n = node(
            "r",
            "retry",
            json!({"max_attempts": 4, "backoff_ms": 50, "multiplier": 3.0}),
        );
        let policy = RetryExecutor::policy_from(&n);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base, std::time::Duration::from_millis(50));
        assert_eq!(policy.multiplier, 3.0);
    }

    #[tokio::test]
    async fn try_catch_success_routes_try() {
        let ctx = context_with_input("t", json!(10)).await;
        let out = TryCatchExecutor
            .execute(&ctx, &node("t", "try_catch", json!({"expression": "input * 2"})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!(20.0));
        assert_eq!(out["caught"], json!(false));
        assert_eq!(out["path"], json!("try"));
    }

    #[tokio::test]
    async fn try_catch_failure_routes_catch_with_error_object() {
        let ctx = context_with_input("t", json!(10)).await;
        let out = TryCatchExecutor
            .execute(&ctx, &node("t", "try_catch", json!({"expression": "input / 0"})))
            .await
            .unwrap();
        assert_eq!(out["caught"], json!(true));
        assert_eq!(out["path"], json!("catch"));
        assert_eq!(out["value"], json!(10));
        assert_eq!(out["error"]["kind"], json!("EvalError"));
        assert!(out["error"]["message"]
            .as_str()
            .unwrap()
            .contains("division by zero"));
    }
}
