//! State-touching leaves: variable, extract, transform, accumulator, counter

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{invalid_field, missing_field, num, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Reads or writes a workflow variable
///
/// `var_op: "set"` (default) stores `data.value` or the node's input;
/// `var_op: "get"` reads. Output: `{ value, var_name, op }`.
pub struct VariableExecutor;

#[async_trait]
impl NodeExecutor for VariableExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Variable
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if node.data_str("var_name").is_none() {
            issues.push(missing_field(node, "var_name"));
        }
        if let Some(op) = node.data_str("var_op") {
            if op != "get" && op != "set" {
                issues.push(invalid_field(
                    node,
                    "var_op",
                    &format!("unknown var op '{}', expected 'get' or 'set'", op),
                ));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let name = require_str(node, "var_name")?;
        let op = node.data_str("var_op").unwrap_or("set");

        match op {
            "set" => {
                let value = match node.data.get("value") {
                    Some(v) => v.clone(),
                    None => ctx.primary_input(&node.id).await,
                };
                ctx.state.set_variable(name, value.clone()).await?;
                Ok(json!({ "value": value, "var_name": name, "op": "set" }))
            }
            "get" => {
                let value = ctx.state.get_variable(name).await.unwrap_or(Value::Null);
                Ok(json!({ "value": value, "var_name": name, "op": "get" }))
            }
            other => Err(WorkflowError::node_failure(
                &node.id,
                format!("unknown var op '{}'", other),
            )),
        }
    }
}

/// Pulls a nested field out of the input by path
///
/// `data.path` uses expression syntax (`user.address[0].city`). Output:
/// `{ value, path, found }`, with `value: null` / `found: false` when the
/// path dead-ends.
pub struct ExtractExecutor;

#[async_trait]
impl NodeExecutor for ExtractExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Extract
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match node.data_str("path") {
            None => issues.push(missing_field(node, "path")),
            Some(path) => {
                if crate::expr::compile(&path_expression(path), 64).is_err() {
                    issues.push(invalid_field(node, "path", "'path' is not a valid access path"));
                }
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let path = require_str(node, "path")?;
        let compiled = ctx.expressions.get(&path_expression(path))?;
        let scope = ctx.scope_for(&node.id).await;
        let value = compiled
            .evaluate(&scope)
            .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?;
        let found = !value.is_null();
        Ok(json!({ "value": value, "path": path, "found": found }))
    }
}

fn path_expression(path: &str) -> String {
    if path.starts_with('[') {
        format!("input{}", path)
    } else {
        format!("input.{}", path)
    }
}

const TRANSFORMS: &[&str] = &[
    "keys", "values", "entries", "flatten", "unique", "reverse", "sort", "count", "first", "last",
    "stringify",
];

/// Structural transform of the input value
///
/// Output: `{ value, transform_type }`.
pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Transform
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("transform_type") {
            None => vec![missing_field(node, "transform_type")],
            Some(t) if !TRANSFORMS.contains(&t) => vec![invalid_field(
                node,
                "transform_type",
                &format!("unknown transform '{}', expected one of {:?}", t, TRANSFORMS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let transform = require_str(node, "transform_type")?;
        let input = ctx.primary_input(&node.id).await;

        let value = match transform {
            "keys" => match &input {
                Value::Object(map) => {
                    Value::Array(map.keys().map(|k| Value::String(k.clone())).collect())
                }
                other => return type_error(&node.id, transform, other),
            },
            "values" => match &input {
                Value::Object(map) => Value::Array(map.values().cloned().collect()),
                other => return type_error(&node.id, transform, other),
            },
            "entries" => match &input {
                Value::Object(map) => Value::Array(
                    map.iter()
                        .map(|(k, v)| json!({"key": k, "value": v}))
                        .collect(),
                ),
                other => return type_error(&node.id, transform, other),
            },
            "flatten" => match &input {
                Value::Array(items) => {
                    let mut out = Vec::new();
                    for item in items {
                        match item {
                            Value::Array(inner) => out.extend(inner.iter().cloned()),
                            other => out.push(other.clone()),
                        }
                    }
                    Value::Array(out)
                }
                other => return type_error(&node.id, transform, other),
            },
            "unique" => match &input {
                Value::Array(items) => {
                    let mut seen = std::collections::HashSet::new();
                    let mut out = Vec::new();
                    for item in items {
                        let key = serde_json::to_string(item).unwrap_or_default();
                        if seen.insert(key) {
                            out.push(item.clone());
                        }
                    }
                    Value::Array(out)
                }
                other => return type_error(&node.id, transform, other),
            },
            "reverse" => match &input {
                Value::Array(items) => Value::Array(items.iter().rev().cloned().collect()),
                Value::String(s) => Value::String(s.chars().rev().collect()),
                other => return type_error(&node.id, transform, other),
            },
            "sort" => match &input {
                Value::Array(items) => {
                    let mut out = items.clone();
                    if out.iter().all(Value::is_number) {
                        out.sort_by(|a, b| {
                            a.as_f64()
                                .partial_cmp(&b.as_f64())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                    } else {
                        out.sort_by_key(|v| crate::expr::display(v));
                    }
                    Value::Array(out)
                }
                other => return type_error(&node.id, transform, other),
            },
            "count" => match &input {
                Value::Array(items) => num(items.len() as f64),
                Value::Object(map) => num(map.len() as f64),
                Value::String(s) => num(s.chars().count() as f64),
                other => return type_error(&node.id, transform, other),
            },
            "first" => match &input {
                Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
                other => return type_error(&node.id, transform, other),
            },
            "last" => match &input {
                Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
                other => return type_error(&node.id, transform, other),
            },
            "stringify" => Value::String(serde_json::to_string(&input)?),
            _ => unreachable!("validated transform"),
        };

        Ok(json!({ "value": value, "transform_type": transform }))
    }
}

fn type_error(node_id: &str, transform: &str, value: &Value) -> Result<Value> {
    Err(WorkflowError::node_failure(
        node_id,
        format!(
            "transform '{}' cannot apply to {}",
            transform,
            crate::expr::type_name(value)
        ),
    ))
}

const ACCUM_OPS: &[&str] = &["add", "append", "reset", "get"];

/// Single polymorphic accumulator cell
///
/// `add` sums numerically, `append` grows an array, `reset` reinstalls
/// `data.value` (or null), `get` reads. Output: `{ value, op }`.
pub struct AccumulatorExecutor;

#[async_trait]
impl NodeExecutor for AccumulatorExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Accumulator
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("accum_op") {
            Some(op) if !ACCUM_OPS.contains(&op) => vec![invalid_field(
                node,
                "accum_op",
                &format!("unknown accumulator op '{}', expected one of {:?}", op, ACCUM_OPS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let op = node.data_str("accum_op").unwrap_or("add");
        let current = ctx.state.accumulator().await;

        let next = match op {
            "add" => {
                let input = ctx.primary_input(&node.id).await;
                let base = if current.is_null() { 0.0 } else { as_number(&current, &node.id)? };
                let delta = as_number(&input, &node.id)?;
                num(base + delta)
            }
            "append" => {
                let input = ctx.primary_input(&node.id).await;
                let mut items = match current {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => vec![other],
                };
                items.push(input);
                Value::Array(items)
            }
            "reset" => node.data.get("value").cloned().unwrap_or(Value::Null),
            "get" => current.clone(),
            other => {
                return Err(WorkflowError::node_failure(
                    &node.id,
                    format!("unknown accumulator op '{}'", other),
                ))
            }
        };

        if op != "get" {
            ctx.state.set_accumulator(next.clone()).await?;
        }
        Ok(json!({ "value": next, "op": op }))
    }
}

fn as_number(value: &Value, node_id: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        WorkflowError::node_failure(
            node_id,
            format!("expected a number, got {}", crate::expr::type_name(value)),
        )
    })
}

const COUNTER_OPS: &[&str] = &["increment", "decrement", "reset", "get"];

/// Numeric counter cell
///
/// `amount` (default 1) scales increment/decrement. Output: `{ value, op }`.
pub struct CounterExecutor;

#[async_trait]
impl NodeExecutor for CounterExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Counter
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("counter_op") {
            Some(op) if !COUNTER_OPS.contains(&op) => vec![invalid_field(
                node,
                "counter_op",
                &format!("unknown counter op '{}', expected one of {:?}", op, COUNTER_OPS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let op = node.data_str("counter_op").unwrap_or("increment");
        let amount = node.data_f64("amount").unwrap_or(1.0);

        let value = match op {
            "increment" => ctx.state.add_counter(amount).await,
            "decrement" => ctx.state.add_counter(-amount).await,
            "reset" => {
                ctx.state.reset_counter().await;
                0.0
            }
            "get" => ctx.state.counter().await,
            other => {
                return Err(WorkflowError::node_failure(
                    &node.id,
                    format!("unknown counter op '{}'", other),
                ))
            }
        };

        Ok(json!({ "value": num(value), "op": op }))
    }
}
