//! Built-in node executors
//!
//! One executor per node kind, all implementing the
//! [`NodeExecutor`](crate::registry::NodeExecutor) contract. Modules group
//! the kinds by family:
//!
//! | Module | Kinds |
//! |---|---|
//! | [`scalar`] | number, text_input, operation, text_operation, range |
//! | [`condition`] | condition, switch |
//! | [`collection`] | filter, map, reduce |
//! | [`loops`] | for_each, while_loop |
//! | [`flow`] | parallel, join, split |
//! | [`timing`] | delay, timeout, throttle, rate_limiter |
//! | [`cache`] | cache |
//! | [`resilience`] | retry, try_catch |
//! | [`schema`] | schema_validator |
//! | [`http`] | http |
//! | [`codec`] | parse, format |
//! | [`state_nodes`] | variable, extract, transform, accumulator, counter |
//! | [`viz`] | visualization, bar_chart |
//!
//! Every executor returns a structured result object; the keys each family
//! uses are fixed (see the per-module docs) so downstream executors and
//! expressions can rely on them.

pub mod cache;
pub mod codec;
pub mod collection;
pub mod condition;
pub mod flow;
pub mod http;
pub mod loops;
pub mod resilience;
pub mod scalar;
pub mod schema;
pub mod state_nodes;
pub mod timing;
pub mod viz;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{IssueKind, Result, ValidationIssue, WorkflowError};
use crate::payload::Node;
use crate::registry::Registry;

/// Register every built-in executor
pub fn install_builtins(registry: &mut Registry) -> Result<()> {
    registry.register(Arc::new(scalar::NumberExecutor))?;
    registry.register(Arc::new(scalar::TextInputExecutor))?;
    registry.register(Arc::new(scalar::OperationExecutor))?;
    registry.register(Arc::new(scalar::TextOperationExecutor))?;
    registry.register(Arc::new(scalar::RangeExecutor))?;
    registry.register(Arc::new(condition::ConditionExecutor))?;
    registry.register(Arc::new(condition::SwitchExecutor))?;
    registry.register(Arc::new(collection::FilterExecutor))?;
    registry.register(Arc::new(collection::MapExecutor))?;
    registry.register(Arc::new(collection::ReduceExecutor))?;
    registry.register(Arc::new(loops::ForEachExecutor))?;
    registry.register(Arc::new(loops::WhileLoopExecutor))?;
    registry.register(Arc::new(flow::ParallelExecutor))?;
    registry.register(Arc::new(flow::JoinExecutor))?;
    registry.register(Arc::new(flow::SplitExecutor))?;
    registry.register(Arc::new(timing::DelayExecutor))?;
    registry.register(Arc::new(timing::TimeoutExecutor))?;
    registry.register(Arc::new(timing::ThrottleExecutor))?;
    registry.register(Arc::new(timing::RateLimiterExecutor))?;
    registry.register(Arc::new(cache::CacheExecutor))?;
    registry.register(Arc::new(resilience::RetryExecutor))?;
    registry.register(Arc::new(resilience::TryCatchExecutor))?;
    registry.register(Arc::new(schema::SchemaValidatorExecutor::new()))?;
    registry.register(Arc::new(http::HttpExecutor))?;
    registry.register(Arc::new(codec::ParseExecutor))?;
    registry.register(Arc::new(codec::FormatExecutor))?;
    registry.register(Arc::new(state_nodes::VariableExecutor))?;
    registry.register(Arc::new(state_nodes::ExtractExecutor))?;
    registry.register(Arc::new(state_nodes::TransformExecutor))?;
    registry.register(Arc::new(state_nodes::AccumulatorExecutor))?;
    registry.register(Arc::new(state_nodes::CounterExecutor))?;
    registry.register(Arc::new(viz::VisualizationExecutor))?;
    registry.register(Arc::new(viz::BarChartExecutor))?;
    Ok(())
}

// ---- shared helpers ----

/// Issue for a missing required data field
pub(crate) fn missing_field(node: &Node, field: &str) -> ValidationIssue {
    ValidationIssue::new(IssueKind::MissingField, format!("missing required field '{}'", field))
        .for_node(&node.id)
        .for_field(field)
}

/// Issue for a present-but-malformed data field
pub(crate) fn invalid_field(node: &Node, field: &str, why: &str) -> ValidationIssue {
    ValidationIssue::new(IssueKind::InvalidField, why.to_string())
        .for_node(&node.id)
        .for_field(field)
}

/// Validate that an expression field compiles, reporting the parse error
pub(crate) fn check_expression(node: &Node, field: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(source) = node.data_str(field) {
        if let Err(error) = crate::expr::compile(source, 64) {
            issues.push(
                ValidationIssue::new(IssueKind::Expression, error.to_string())
                    .for_node(&node.id)
                    .for_field(field),
            );
        }
    }
}

/// Required string field at execution time
pub(crate) fn require_str<'a>(node: &'a Node, field: &str) -> Result<&'a str> {
    node.data_str(field).ok_or_else(|| {
        WorkflowError::node_failure(&node.id, format!("missing required field '{}'", field))
    })
}

/// Wrap a finite f64 for a result object
pub(crate) fn num(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Parse a human duration: `"250ms"`, `"2s"`, `"3m"`, `"1h"`, or a bare
/// number of milliseconds.
pub(crate) fn parse_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_f64().filter(|ms| *ms >= 0.0).map(|ms| Duration::from_millis(ms as u64)),
        Value::String(text) => {
            let text = text.trim();
            let (digits, unit) = match text.find(|c: char| c.is_ascii_alphabetic()) {
                Some(split) => text.split_at(split),
                None => (text, "ms"),
            };
            let quantity: f64 = digits.trim().parse().ok()?;
            if quantity < 0.0 {
                return None;
            }
            let millis = match unit.trim() {
                "ms" => quantity,
                "s" => quantity * 1_000.0,
                "m" => quantity * 60_000.0,
                "h" => quantity * 3_600_000.0,
                _ => return None,
            };
            Some(Duration::from_millis(millis as u64))
        }
        _ => None,
    }
}
