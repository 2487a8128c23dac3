//! Cache node: get/set against the run-scoped TTL cache

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{invalid_field, missing_field, parse_duration, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Reads or writes the state manager's TTL cache
///
/// `op: "get"` → `{ hit, value }` (a miss carries `value: null`);
/// `op: "set"` → `{ value, cached, ttl_ms }`, storing the node's input (or
/// `data.value` when present).
pub struct CacheExecutor;

#[async_trait]
impl NodeExecutor for CacheExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Cache
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match node.data_str("op") {
            None => issues.push(missing_field(node, "op")),
            Some("get") | Some("set") => {}
            Some(op) => issues.push(invalid_field(
                node,
                "op",
                &format!("unknown cache op '{}', expected 'get' or 'set'", op),
            )),
        }
        if node.data_str("key").is_none() {
            issues.push(missing_field(node, "key"));
        }
        if let Some(ttl) = node.data.get("ttl") {
            if parse_duration(ttl).is_none() {
                issues.push(invalid_field(node, "ttl", "'ttl' must be a duration"));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let op = require_str(node, "op")?;
        let key = require_str(node, "key")?;

        match op {
            "get" => match ctx.state.cache_get(key).await {
                Some(value) => Ok(json!({ "hit": true, "value": value, "key": key })),
                None => Ok(json!({ "hit": false, "value": Value::Null, "key": key })),
            },
            "set" => {
                let ttl = node
                    .data
                    .get("ttl")
                    .and_then(parse_duration)
                    .unwrap_or(DEFAULT_TTL);
                let value = match node.data.get("value") {
                    Some(v) => v.clone(),
                    None => ctx.primary_input(&node.id).await,
                };
                ctx.state.cache_set(key, value.clone(), ttl).await?;
                Ok(json!({
                    "value": value,
                    "cached": true,
                    "key": key,
                    "ttl_ms": ttl.as_millis() as u64,
                }))
            }
            other => Err(WorkflowError::node_failure(
                &node.id,
                format!("unknown cache op '{}'", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{bare_context, node};

    #[tokio::test(start_paused = true)]
    async fn set_then_get_then_expire() {
        let ctx = bare_context();
        let set = CacheExecutor
            .execute(
                &ctx,
                &node("c", "cache", json!({"op": "set", "key": "k", "value": 42, "ttl": "5s"})),
            )
            .await
            .unwrap();
        assert_eq!(set["cached"], json!(true));

        let hit = CacheExecutor
            .execute(&ctx, &node("c", "cache", json!({"op": "get", "key": "k"})))
            .await
            .unwrap();
        assert_eq!(hit["hit"], json!(true));
        assert_eq!(hit["value"], json!(42));

        tokio::time::advance(std::time::Duration::from_secs(6)).await;
        let miss = CacheExecutor
            .execute(&ctx, &node("c", "cache", json!({"op": "get", "key": "k"})))
            .await
            .unwrap();
        assert_eq!(miss["hit"], json!(false));
        assert_eq!(miss["value"], json!(null));
    }

    #[test]
    fn validation() {
        assert!(!CacheExecutor
            .validate(&node("c", "cache", json!({"op": "drop", "key": "k"})))
            .is_empty());
        assert!(!CacheExecutor
            .validate(&node("c", "cache", json!({"op": "get"})))
            .is_empty());
    }
}
