//! Array transforms: filter, map, reduce
//!
//! Per-element expression failures follow the engine-wide policy: the
//! element is skipped and counted, the node keeps going. Setting
//! `data.strict` turns any element failure into a node failure.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::{check_expression, invalid_field, missing_field, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Keeps the elements for which `condition` holds
///
/// Output: `{ filtered, input_count, output_count, skipped_count,
/// error_count, condition, is_array }`. A non-array input passes through
/// unchanged with `is_array: false` and a warning flag.
pub struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Filter
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
        let input = ctx.primary_input(&node.id).await;

        let items = match &input {
            Value::Array(items) => items.clone(),
            other => {
                return Ok(json!({
                    "filtered": other,
                    "input_count": 1,
                    "output_count": 1,
                    "skipped_count": 0,
                    "error_count": 0,
                    "condition": source,
                    "is_array": false,
                    "warning": "input is not an array; passed through",
                }))
            }
        };

        let compiled = ctx.expressions.get(source)?;
        let base = ctx.scope_with_input(input.clone()).await;
        let all = Value::Array(items.clone());

        let mut filtered = Vec::new();
        let mut skipped = 0usize;
        let mut errors = 0usize;
        for (i, item) in items.iter().enumerate() {
            let scope = base.iteration(item.clone(), i, all.clone());
            match compiled.evaluate_bool(&scope) {
                Ok(true) => filtered.push(item.clone()),
                Ok(false) => skipped += 1,
                Err(_) => errors += 1,
            }
        }

        Ok(json!({
            "filtered": filtered,
            "input_count": items.len(),
            "output_count": filtered.len(),
            "skipped_count": skipped,
            "error_count": errors,
            "condition": source,
            "is_array": true,
        }))
    }
}

/// Projects each element, by field extraction or by expression
///
/// The two modes are mutually exclusive: `data.field` pulls a named field
/// from each element (missing fields yield `null` and count as failed);
/// `data.expression` evaluates with `item`, `index`, `items` bound.
///
/// Output: `{ results, input_count, output_count, successful, failed }`.
pub struct MapExecutor;

#[async_trait]
impl NodeExecutor for MapExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Map
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let has_field = node.data_str("field").is_some();
        let has_expression = node.data_str("expression").is_some();
        match (has_field, has_expression) {
            (false, false) => issues.push(missing_field(node, "expression")),
            (true, true) => issues.push(invalid_field(
                node,
                "expression",
                "'field' and 'expression' are mutually exclusive",
            )),
            _ => {}
        }
        check_expression(node, "expression", &mut issues);
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let strict = node.data_bool("strict").unwrap_or(false);
        let input = ctx.primary_input(&node.id).await;
        let items = array_input(&input, &node.id)?;

        let mut results = Vec::with_capacity(items.len());
        let mut successful = 0usize;
        let mut failed = 0usize;

        if let Some(field) = node.data_str("field") {
            for item in &items {
                match item.get(field) {
                    Some(value) => {
                        results.push(value.clone());
                        successful += 1;
                    }
                    None => {
                        if strict {
                            return Err(WorkflowError::node_failure(
                                &node.id,
                                format!("element is missing field '{}'", field),
                            ));
                        }
                        results.push(Value::Null);
                        failed += 1;
                    }
                }
            }
        } else {
            let source = require_str(node, "expression")?;
            let compiled = ctx.expressions.get(source)?;
            let base = ctx.scope_with_input(input.clone()).await;
            let all = Value::Array(items.clone());
            for (i, item) in items.iter().enumerate() {
                let scope = base.iteration(item.clone(), i, all.clone());
                match compiled.evaluate(&scope) {
                    Ok(value) => {
                        results.push(value);
                        successful += 1;
                    }
                    Err(error) => {
                        if strict {
                            return Err(WorkflowError::node_failure(&node.id, error.to_string()));
                        }
                        failed += 1;
                    }
                }
            }
        }

        Ok(json!({
            "results": results,
            "input_count": items.len(),
            "output_count": results.len(),
            "successful": successful,
            "failed": failed,
        }))
    }
}

/// Left fold with `accumulator`, `item`, `index` bound
///
/// Output: `{ result, initial_value, final_value, input_count, iterations,
/// successful, failed }`. Element failures keep the previous accumulator.
pub struct ReduceExecutor;

#[async_trait]
impl NodeExecutor for ReduceExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Reduce
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if node.data_str("expression").is_none() {
            issues.push(missing_field(node, "expression"));
        }
        check_expression(node, "expression", &mut issues);
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let source = require_str(node, "expression")?;
        let strict = node.data_bool("strict").unwrap_or(false);
        let initial = node.data.get("initial_value").cloned().unwrap_or(json!(0));

        let input = ctx.primary_input(&node.id).await;
        let items = array_input(&input, &node.id)?;

        let compiled = ctx.expressions.get(source)?;
        let base = ctx.scope_with_input(input.clone()).await;
        let all = Value::Array(items.clone());

        let mut acc = initial.clone();
        let mut successful = 0usize;
        let mut failed = 0usize;
        for (i, item) in items.iter().enumerate() {
            let scope = base
                .iteration(item.clone(), i, all.clone())
                .with_accumulator(acc.clone());
            match compiled.evaluate(&scope) {
                Ok(next) => {
                    acc = next;
                    successful += 1;
                }
                Err(error) => {
                    if strict {
                        return Err(WorkflowError::node_failure(&node.id, error.to_string()));
                    }
                    failed += 1;
                }
            }
        }

        Ok(json!({
            "result": acc,
            "initial_value": initial,
            "final_value": acc,
            "input_count": items.len(),
            "iterations": items.len(),
            "successful": successful,
            "failed": failed,
        }))
    }
}

fn array_input(input: &Value, node_id: &str) -> Result<Vec<Value>> {
    match input {
        Value::Array(items) => Ok(items.clone()),
        other => Err(WorkflowError::node_failure(
            node_id,
            format!("expected an array input, got {}", crate::expr::type_name(other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{context_with_input, node};

    #[tokio::test]
    async fn filter_by_age() {
        let ctx = context_with_input(
            "f",
            json!([{"age": 25}, {"age": 15}, {"age": 30}]),
        )
        .await;
        let out = FilterExecutor
            .execute(&ctx, &node("f", "filter", json!({"condition": "item.age >= 18"})))
            .await
            .unwrap();
        assert_eq!(out["filtered"], json!([{"age": 25}, {"age": 30}]));
        assert_eq!(out["input_count"], json!(3));
        assert_eq!(out["output_count"], json!(2));
        assert_eq!(out["skipped_count"], json!(1));
        assert_eq!(out["error_count"], json!(0));
        assert_eq!(out["is_array"], json!(true));
    }

    #[tokio::test]
    async fn filter_counts_element_errors() {
        // Comparing a missing field (null) to a number is an element error.
        let ctx = context_with_input("f", json!([{"age": 25}, {"name": "x"}])).await;
        let out = FilterExecutor
            .execute(&ctx, &node("f", "filter", json!({"condition": "item.age >= 18"})))
            .await
            .unwrap();
        assert_eq!(out["output_count"], json!(1));
        assert_eq!(out["error_count"], json!(1));
    }

    #[tokio::test]
    async fn filter_passes_non_arrays_through() {
        let ctx = context_with_input("f", json!(42)).await;
        let out = FilterExecutor
            .execute(&ctx, &node("f", "filter", json!({"condition": "item > 0"})))
            .await
            .unwrap();
        assert_eq!(out["is_array"], json!(false));
        assert_eq!(out["filtered"], json!(42));
    }

    #[tokio::test]
    async fn map_field_mode() {
        let ctx = context_with_input("m", json!([{"name": "a"}, {"other": 1}, {"name": "c"}])).await;
        let out = MapExecutor
            .execute(&ctx, &node("m", "map", json!({"field": "name"})))
            .await
            .unwrap();
        assert_eq!(out["results"], json!(["a", null, "c"]));
        assert_eq!(out["successful"], json!(2));
        assert_eq!(out["failed"], json!(1));
    }

    #[tokio::test]
    async fn map_expression_mode() {
        let ctx = context_with_input("m", json!([1, 2, 3])).await;
        let out = MapExecutor
            .execute(&ctx, &node("m", "map", json!({"expression": "item * 2"})))
            .await
            .unwrap();
        assert_eq!(out["results"], json!([2.0, 4.0, 6.0]));
        assert_eq!(out["input_count"], json!(3));
        assert_eq!(out["output_count"], json!(3));
    }

    #[tokio::test]
    async fn map_expression_errors_skip_elements() {
        let ctx = context_with_input("m", json!([1, "x", 3])).await;
        let out = MapExecutor
            .execute(&ctx, &node("m", "map", json!({"expression": "item * 2"})))
            .await
            .unwrap();
        assert_eq!(out["results"], json!([2.0, 6.0]));
        assert_eq!(out["failed"], json!(1));

        let strict = MapExecutor
            .execute(
                &ctx,
                &node("m", "map", json!({"expression": "item * 2", "strict": true})),
            )
            .await;
        assert!(strict.is_err());
    }

    #[test]
    fn map_modes_are_exclusive() {
        let both = node("m", "map", json!({"field": "a", "expression": "item"}));
        assert!(!MapExecutor.validate(&both).is_empty());
        let neither = node("m", "map", json!({}));
        assert!(!MapExecutor.validate(&neither).is_empty());
    }

    #[tokio::test]
    async fn reduce_sums() {
        let ctx = context_with_input("r", json!([1, 2, 3, 4, 5])).await;
        let out = ReduceExecutor
            .execute(
                &ctx,
                &node(
                    "r",
                    "reduce",
                    json!({"expression": "accumulator + item", "initial_value": 0}),
                ),
            )
            .await
            .unwrap();
        assert_eq!(out["result"], json!(15.0));
        assert_eq!(out["iterations"], json!(5));
        assert_eq!(out["successful"], json!(5));
        assert_eq!(out["failed"], json!(0));
        assert_eq!(out["initial_value"], json!(0));
    }

    #[tokio::test]
    async fn reduce_skips_bad_elements() {
        let ctx = context_with_input("r", json!([1, "x", 3])).await;
        let out = ReduceExecutor
            .execute(
                &ctx,
                &node("r", "reduce", json!({"expression": "accumulator + item"})),
            )
            .await
            .unwrap();
        assert_eq!(out["result"], json!(4.0));
        assert_eq!(out["failed"], json!(1));
        assert_eq!(out["successful"], json!(2));
    }

    #[tokio::test]
    async fn reduce_rejects_non_array() {
        let ctx = context_with_input("r", json!(5)).await;
        let out = ReduceExecutor
            .execute(
                &ctx,
                &node("r", "reduce", json!({"expression": "accumulator + item"})),
            )
            .await;
        assert!(out.is_err());
    }
}
