//! Time-shaping nodes: delay, timeout, throttle, rate_limiter
//!
//! All suspensions here observe the run deadline: a sleep that would cross
//! it fails the run instead of finishing late.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::events::EventKind;
use crate::nodes::{invalid_field, missing_field, parse_duration};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Suspends for `duration`, then passes the input through
///
/// Output: `{ value, delayed_ms }`.
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Delay
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("duration") {
            None => vec![missing_field(node, "duration")],
            Some(v) if parse_duration(v).is_none() => vec![invalid_field(
                node,
                "duration",
                "'duration' must be a duration like \"250ms\", \"2s\" or a millisecond count",
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let duration = node
            .data
            .get("duration")
            .and_then(parse_duration)
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing or invalid 'duration'"))?;
        ctx.sleep(duration).await?;
        let input = ctx.primary_input(&node.id).await;
        Ok(json!({
            "value": input,
            "delayed_ms": duration.as_millis() as u64,
        }))
    }
}

/// Deadline marker for its direct successors
///
/// The engine bounds the execution of every direct successor of this node
/// by `duration`; on expiry that sub-execution is cancelled and fails.
/// The node itself just passes its input through.
///
/// Output: `{ value, timeout_ms }`.
pub struct TimeoutExecutor;

#[async_trait]
impl NodeExecutor for TimeoutExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Timeout
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("duration") {
            None => vec![missing_field(node, "duration")],
            Some(v) if parse_duration(v).is_none() => vec![invalid_field(
                node,
                "duration",
                "'duration' must be a duration like \"250ms\", \"2s\" or a millisecond count",
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let duration = node
            .data
            .get("duration")
            .and_then(parse_duration)
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing or invalid 'duration'"))?;
        let input = ctx.primary_input(&node.id).await;
        Ok(json!({
            "value": input,
            "timeout_ms": duration.as_millis() as u64,
        }))
    }
}

/// Enforces a minimum inter-call gap of `1000 / rps` milliseconds
///
/// Output: `{ value, rps, waited_ms }`.
pub struct ThrottleExecutor;

#[async_trait]
impl NodeExecutor for ThrottleExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Throttle
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_f64("rps") {
            None => vec![missing_field(node, "rps")],
            Some(rps) if rps <= 0.0 => {
                vec![invalid_field(node, "rps", "'rps' must be positive")]
            }
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let rps = node
            .data_f64("rps")
            .filter(|rps| *rps > 0.0)
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing or invalid 'rps'"))?;
        let gap = Duration::from_secs_f64(1.0 / rps);
        let wait = ctx.throttle_reserve(&node.id, gap);
        if !wait.is_zero() {
            ctx.sleep(wait).await?;
        }
        let input = ctx.primary_input(&node.id).await;
        Ok(json!({
            "value": input,
            "rps": rps,
            "waited_ms": wait.as_millis() as u64,
        }))
    }
}

/// Fixed-window rate limiter, per node instance
///
/// Counts requests in a window of `per_duration`; once `max_requests` is
/// reached the caller sleeps until the window rolls over (bounded by the
/// run deadline). Each saturation emits a `RateLimitHit` event.
///
/// Output: `{ value, max_requests, per_duration_ms, waited_ms }`.
pub struct RateLimiterExecutor;

#[async_trait]
impl NodeExecutor for RateLimiterExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::RateLimiter
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match node.data_u64("max_requests") {
            None => issues.push(missing_field(node, "max_requests")),
            Some(0) => issues.push(invalid_field(
                node,
                "max_requests",
                "'max_requests' must be positive",
            )),
            _ => {}
        }
        if let Some(v) = node.data.get("per_duration") {
            if parse_duration(v).is_none() {
                issues.push(invalid_field(
                    node,
                    "per_duration",
                    "'per_duration' must be a duration like \"1s\"",
                ));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let max_requests = node
            .data_u64("max_requests")
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                WorkflowError::node_failure(&node.id, "missing or invalid 'max_requests'")
            })?;
        let window = node
            .data
            .get("per_duration")
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(1));

        let wait = ctx.rate_limit_reserve(&node.id, max_requests, window);
        if !wait.is_zero() {
            ctx.emit(EventKind::RateLimitHit {
                node_id: node.id.clone(),
                wait_ms: wait.as_millis() as u64,
            });
            ctx.sleep(wait).await?;
        }

        let input = ctx.primary_input(&node.id).await;
        Ok(json!({
            "value": input,
            "max_requests": max_requests,
            "per_duration_ms": window.as_millis() as u64,
            "waited_ms": wait.as_millis() as u64,
        }))
    }
}
