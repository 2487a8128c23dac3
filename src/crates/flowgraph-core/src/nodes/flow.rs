//! Fan-out and fan-in: parallel, join, split
//!
//! `parallel` marks a fan-out point: the engine runs its ready direct
//! successors concurrently (bounded by `max_concurrency`). `join` is the
//! matching fan-in, aggregating its incoming branch results under a
//! strategy. `split` duplicates one input onto named output paths, so
//! editors can fan identical values out over conditional edges.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::invalid_field;
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Default fan-out width
pub const DEFAULT_MAX_CONCURRENCY: u64 = 4;

/// Fan-out marker; passes its input through
///
/// Output: `{ value, max_concurrency, branches }`.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Parallel
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("max_concurrency") {
            Some(v) if v.as_u64().map(|n| n == 0).unwrap_or(true) => vec![invalid_field(
                node,
                "max_concurrency",
                "'max_concurrency' must be a positive integer",
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let input = ctx.primary_input(&node.id).await;
        let branches = ctx.graph().outgoing_edges(&node.id).len();
        let max_concurrency = node
            .data_u64("max_concurrency")
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        Ok(json!({
            "value": input,
            "max_concurrency": max_concurrency,
            "branches": branches,
        }))
    }
}

const STRATEGIES: &[&str] = &["all", "any", "majority"];

/// Fan-in over all incoming edges
///
/// Strategies: `all` (default; fails unless every incoming branch produced
/// a result), `any` (at least one), `majority` (more than half). Output:
/// `{ results, strategy, count, expected }` — `results` in edge order, so
/// branch-declaration order is preserved.
pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Join
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("strategy") {
            Some(s) if !STRATEGIES.contains(&s) => vec![invalid_field(
                node,
                "strategy",
                &format!("unknown strategy '{}', expected one of {:?}", s, STRATEGIES),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let strategy = node.data_str("strategy").unwrap_or("all");
        let expected = ctx.graph().incoming_edges(&node.id).len();
        let results = ctx.incoming_values(&node.id).await;
        let count = results.len();

        let satisfied = match strategy {
            "all" => count == expected,
            "any" => count >= 1,
            "majority" => count * 2 > expected,
            _ => false,
        };
        if !satisfied {
            return Err(WorkflowError::node_failure(
                &node.id,
                format!(
                    "join strategy '{}' unsatisfied: {} of {} branches arrived",
                    strategy, count, expected
                ),
            ));
        }

        let first = results.first().cloned().unwrap_or(Value::Null);
        Ok(json!({
            "results": results,
            "first": first,
            "strategy": strategy,
            "count": count,
            "expected": expected,
        }))
    }
}

/// Duplicates one input onto named output paths
///
/// Output: `{ value, paths }`. Every conditional edge whose handle names one
/// of the declared paths is taken.
pub struct SplitExecutor;

#[async_trait]
impl NodeExecutor for SplitExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Split
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("paths") {
            None => Vec::new(), // paths default to the outgoing handles
            Some(Value::Array(paths)) if paths.iter().all(Value::is_string) => Vec::new(),
            Some(_) => vec![invalid_field(node, "paths", "'paths' must be an array of strings")],
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let input = ctx.primary_input(&node.id).await;
        let paths: Vec<String> = match node.data.get("paths").and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect(),
            None => {
                // Without an explicit list, publish every outgoing handle.
                let mut handles: Vec<String> = ctx
                    .graph()
                    .outgoing_edges(&node.id)
                    .iter()
                    .filter_map(|e| e.handle.clone())
                    .collect();
                handles.dedup();
                handles
            }
        };
        Ok(json!({ "value": input, "paths": paths }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::nodes::testkit::{context_for, context_with_input, node};
    use crate::payload::{Edge, Payload};

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            condition: None,
        }
    }

    fn join_payload() -> Payload {
        Payload {
            nodes: vec![
                node("a", "number", json!({"value": 1})),
                node("b", "number", json!({"value": 2})),
                node("c", "number", json!({"value": 3})),
                node("j", "join", json!({})),
            ],
            edges: vec![
                edge("e1", "a", "j"),
                edge("e2", "b", "j"),
                edge("e3", "c", "j"),
            ],
        }
    }

    #[tokio::test]
    async fn join_all_requires_every_branch() {
        let ctx = context_for(join_payload(), Limits::default());
        ctx.record_result("a", json!({"value": 1})).await.unwrap();
        ctx.record_result("b", json!({"value": 2})).await.unwrap();

        // c missing: all fails
        let all = JoinExecutor
            .execute(&ctx, &node("j", "join", json!({"strategy": "all"})))
            .await;
        assert!(all.is_err());

        ctx.record_result("c", json!({"value": 3})).await.unwrap();
        let out = JoinExecutor
            .execute(&ctx, &node("j", "join", json!({"strategy": "all"})))
            .await
            .unwrap();
        assert_eq!(out["results"], json!([1, 2, 3]));
        assert_eq!(out["count"], json!(3));
    }

    #[tokio::test]
    async fn join_any_and_majority() {
        let ctx = context_for(join_payload(), Limits::default());
        ctx.record_result("a", json!({"value": 1})).await.unwrap();

        let any = JoinExecutor
            .execute(&ctx, &node("j", "join", json!({"strategy": "any"})))
            .await
            .unwrap();
        assert_eq!(any["count"], json!(1));
        assert_eq!(any["first"], json!(1));

        // 1 of 3 is not a majority
        let majority = JoinExecutor
            .execute(&ctx, &node("j", "join", json!({"strategy": "majority"})))
            .await;
        assert!(majority.is_err());

        ctx.record_result("b", json!({"value": 2})).await.unwrap();
        let majority = JoinExecutor
            .execute(&ctx, &node("j", "join", json!({"strategy": "majority"})))
            .await
            .unwrap();
        assert_eq!(majority["count"], json!(2));
    }

    #[tokio::test]
    async fn split_declares_paths() {
        let ctx = context_with_input("s", json!(7)).await;
        let out = SplitExecutor
            .execute(&ctx, &node("s", "split", json!({"paths": ["a", "b"]})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!(7));
        assert_eq!(out["paths"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn parallel_passthrough_with_metadata() {
        let ctx = context_with_input("p", json!([1, 2])).await;
        let out = ParallelExecutor
            .execute(&ctx, &node("p", "parallel", json!({"max_concurrency": 2})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!([1, 2]));
        assert_eq!(out["max_concurrency"], json!(2));
    }

    #[test]
    fn validation_rejects_bad_settings() {
        assert!(!ParallelExecutor
            .validate(&node("p", "parallel", json!({"max_concurrency": 0})))
            .is_empty());
        assert!(!JoinExecutor
            .validate(&node("j", "join", json!({"strategy": "quorum"})))
            .is_empty());
        assert!(!SplitExecutor
            .validate(&node("s", "split", json!({"paths": "a"})))
            .is_empty());
    }
}
