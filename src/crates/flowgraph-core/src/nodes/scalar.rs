//! Scalar and arithmetic leaves: number, text_input, operation,
//! text_operation, range

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{invalid_field, missing_field, num, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Emits a constant numeric value
pub struct NumberExecutor;

#[async_trait]
impl NodeExecutor for NumberExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Number
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("value") {
            None => vec![missing_field(node, "value")],
            Some(v) if !v.is_number() => {
                vec![invalid_field(node, "value", "'value' must be a number")]
            }
            _ => Vec::new(),
        }
    }

    async fn execute(&self, _ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let value = node
            .data_f64("value")
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing numeric 'value'"))?;
        Ok(json!({ "value": num(value) }))
    }
}

/// Emits a constant text value
pub struct TextInputExecutor;

#[async_trait]
impl NodeExecutor for TextInputExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::TextInput
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("text") {
            None => vec![missing_field(node, "text")],
            Some(v) if !v.is_string() => {
                vec![invalid_field(node, "text", "'text' must be a string")]
            }
            _ => Vec::new(),
        }
    }

    async fn execute(&self, _ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let text = require_str(node, "text")?;
        Ok(json!({ "value": text }))
    }
}

const OPERATIONS: &[&str] = &["add", "subtract", "multiply", "divide", "modulo", "power", "min", "max"];

/// Folds its incoming numeric values with an arithmetic operation
pub struct OperationExecutor;

#[async_trait]
impl NodeExecutor for OperationExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Operation
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("op") {
            None => vec![missing_field(node, "op")],
            Some(op) if !OPERATIONS.contains(&op) => vec![invalid_field(
                node,
                "op",
                &format!("unknown operation '{}', expected one of {:?}", op, OPERATIONS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let op = require_str(node, "op")?;
        let inputs = ctx.incoming_values(&node.id).await;
        let mut operands = Vec::with_capacity(inputs.len());
        for value in &inputs {
            match value.as_f64() {
                Some(n) => operands.push(n),
                None => {
                    return Err(WorkflowError::node_failure(
                        &node.id,
                        format!("operation '{}' expects numeric inputs", op),
                    ))
                }
            }
        }
        if operands.is_empty() {
            return Err(WorkflowError::node_failure(
                &node.id,
                "operation node has no incoming values",
            ));
        }

        let mut acc = operands[0];
        for &operand in &operands[1..] {
            acc = match op {
                "add" => acc + operand,
                "subtract" => acc - operand,
                "multiply" => acc * operand,
                "divide" => {
                    if operand == 0.0 {
                        return Err(WorkflowError::node_failure(&node.id, "division by zero"));
                    }
                    acc / operand
                }
                "modulo" => {
                    if operand == 0.0 {
                        return Err(WorkflowError::node_failure(&node.id, "modulo by zero"));
                    }
                    acc % operand
                }
                "power" => acc.powf(operand),
                "min" => acc.min(operand),
                "max" => acc.max(operand),
                _ => unreachable!("validated operation"),
            };
        }
        if !acc.is_finite() {
            return Err(WorkflowError::node_failure(&node.id, "operation overflowed"));
        }

        Ok(json!({
            "value": num(acc),
            "op": op,
            "operand_count": operands.len(),
        }))
    }
}

const TEXT_OPERATIONS: &[&str] = &[
    "concat", "upper", "lower", "trim", "replace", "split", "join", "length", "slice",
];

/// String manipulation over the incoming value(s)
pub struct TextOperationExecutor;

#[async_trait]
impl NodeExecutor for TextOperationExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::TextOperation
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("op") {
            None => vec![missing_field(node, "op")],
            Some(op) if !TEXT_OPERATIONS.contains(&op) => vec![invalid_field(
                node,
                "op",
                &format!("unknown text operation '{}', expected one of {:?}", op, TEXT_OPERATIONS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let op = require_str(node, "op")?;
        let inputs = ctx.incoming_values(&node.id).await;
        let first = inputs.first().cloned().unwrap_or(Value::Null);

        let value = match op {
            "concat" => {
                let separator = node.data_str("separator").unwrap_or("");
                let joined = inputs
                    .iter()
                    .map(crate::expr::display)
                    .collect::<Vec<_>>()
                    .join(separator);
                Value::String(joined)
            }
            "upper" => Value::String(text_of(&first, &node.id)?.to_uppercase()),
            "lower" => Value::String(text_of(&first, &node.id)?.to_lowercase()),
            "trim" => Value::String(text_of(&first, &node.id)?.trim().to_string()),
            "replace" => {
                let search = require_str(node, "search")?;
                let replacement = node.data_str("replacement").unwrap_or("");
                Value::String(text_of(&first, &node.id)?.replace(search, replacement))
            }
            "split" => {
                let separator = require_str(node, "separator")?;
                Value::Array(
                    text_of(&first, &node.id)?
                        .split(separator)
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                )
            }
            "join" => {
                let separator = node.data_str("separator").unwrap_or(",");
                match &first {
                    Value::Array(items) => Value::String(
                        items
                            .iter()
                            .map(crate::expr::display)
                            .collect::<Vec<_>>()
                            .join(separator),
                    ),
                    other => {
                        return Err(WorkflowError::node_failure(
                            &node.id,
                            format!("join expects an array, got {}", crate::expr::type_name(other)),
                        ))
                    }
                }
            }
            "length" => num(text_of(&first, &node.id)?.chars().count() as f64),
            "slice" => {
                let text = text_of(&first, &node.id)?;
                let chars: Vec<char> = text.chars().collect();
                let start = node.data_f64("start").unwrap_or(0.0).max(0.0) as usize;
                let end = node
                    .data_f64("end")
                    .map(|e| e.max(0.0) as usize)
                    .unwrap_or(chars.len())
                    .min(chars.len());
                let start = start.min(end);
                Value::String(chars[start..end].iter().collect())
            }
            _ => unreachable!("validated operation"),
        };

        Ok(json!({ "value": value, "op": op }))
    }
}

fn text_of<'a>(value: &'a Value, node_id: &str) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        WorkflowError::node_failure(
            node_id,
            format!("expected a string input, got {}", crate::expr::type_name(value)),
        )
    })
}

/// Produces a numeric sequence `[start, start+step, ...)` excluding `end`
pub struct RangeExecutor;

#[async_trait]
impl NodeExecutor for RangeExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Range
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if node.data_f64("end").is_none() {
            issues.push(missing_field(node, "end"));
        }
        if let Some(step) = node.data_f64("step") {
            if step == 0.0 {
                issues.push(invalid_field(node, "step", "'step' must be non-zero"));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let start = node.data_f64("start").unwrap_or(0.0);
        let end = node
            .data_f64("end")
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing 'end'"))?;
        let step = node.data_f64("step").unwrap_or(if end >= start { 1.0 } else { -1.0 });
        if step == 0.0 {
            return Err(WorkflowError::node_failure(&node.id, "'step' must be non-zero"));
        }

        let cap = ctx.limits.max_array_size;
        let mut values = Vec::new();
        let mut cursor = start;
        while (step > 0.0 && cursor < end) || (step < 0.0 && cursor > end) {
            if values.len() >= cap {
                return Err(WorkflowError::Budget {
                    resource: "array_size".into(),
                    limit: cap as u64,
                });
            }
            values.push(num(cursor));
            cursor += step;
        }

        Ok(json!({ "value": values, "count": values.len() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{bare_context, context_for, node};
    use crate::payload::{Edge, Payload};
    use crate::config::Limits;

    #[tokio::test]
    async fn number_emits_value() {
        let ctx = bare_context();
        let n = node("n", "number", json!({"value": 25}));
        let out = NumberExecutor.execute(&ctx, &n).await.unwrap();
        assert_eq!(out["value"], json!(25.0));
    }

    #[tokio::test]
    async fn number_validates_shape() {
        let bad = node("n", "number", json!({"value": "x"}));
        assert_eq!(NumberExecutor.validate(&bad).len(), 1);
        let missing = node("n", "number", json!({}));
        assert_eq!(NumberExecutor.validate(&missing).len(), 1);
    }

    #[tokio::test]
    async fn text_input_emits_text() {
        let ctx = bare_context();
        let n = node("n", "text_input", json!({"text": "ok"}));
        let out = TextInputExecutor.execute(&ctx, &n).await.unwrap();
        assert_eq!(out["value"], json!("ok"));
    }

    async fn operation_fixture(op: &str, values: &[f64]) -> Result<Value> {
        let mut nodes = vec![node("target", "operation", json!({"op": op}))];
        let mut edges = Vec::new();
        for (i, _) in values.iter().enumerate() {
            let id = format!("in{}", i);
            nodes.push(node(&id, "number", json!({"value": 0})));
            edges.push(Edge {
                id: format!("e{}", i),
                source: id,
                target: "target".into(),
                source_handle: None,
                target_handle: None,
                condition: None,
            });
        }
        let ctx = context_for(Payload { nodes, edges }, Limits::default());
        for (i, v) in values.iter().enumerate() {
            ctx.record_result(&format!("in{}", i), json!({"value": v}))
                .await
                .unwrap();
        }
        OperationExecutor
            .execute(&ctx, &node("target", "operation", json!({"op": op})))
            .await
    }

    #[tokio::test]
    async fn operation_folds_incoming() {
        assert_eq!(
            operation_fixture("add", &[1.0, 2.0, 3.0]).await.unwrap()["value"],
            json!(6.0)
        );
        assert_eq!(
            operation_fixture("multiply", &[2.0, 4.0]).await.unwrap()["value"],
            json!(8.0)
        );
        assert_eq!(
            operation_fixture("subtract", &[10.0, 4.0]).await.unwrap()["value"],
            json!(6.0)
        );
    }

    #[tokio::test]
    async fn operation_divide_by_zero_fails() {
        assert!(operation_fixture("divide", &[1.0, 0.0]).await.is_err());
    }

    #[tokio::test]
    async fn text_operation_upper_and_split() {
        let ctx = crate::nodes::testkit::context_with_input("t", json!("a,b")).await;
        let out = TextOperationExecutor
            .execute(&ctx, &node("t", "text_operation", json!({"op": "upper"})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!("A,B"));

        let out = TextOperationExecutor
            .execute(
                &ctx,
                &node("t", "text_operation", json!({"op": "split", "separator": ","})),
            )
            .await
            .unwrap();
        assert_eq!(out["value"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn range_produces_sequence() {
        let ctx = bare_context();
        let out = RangeExecutor
            .execute(&ctx, &node("r", "range", json!({"start": 1, "end": 4})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!([1.0, 2.0, 3.0]));
        assert_eq!(out["count"], json!(3));
    }

    #[tokio::test]
    async fn range_respects_array_cap() {
        let limits = Limits {
            max_array_size: 10,
            ..Limits::default()
        };
        let ctx = context_for(Payload::default(), limits);
        let result = RangeExecutor
            .execute(&ctx, &node("r", "range", json!({"start": 0, "end": 100})))
            .await;
        assert!(result.is_err());
    }
}
