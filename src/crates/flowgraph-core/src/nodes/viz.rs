//! Output leaves: visualization and bar_chart
//!
//! The last visualization node's result object becomes the run's final
//! output.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue};
use crate::nodes::{invalid_field, num};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Wraps the input as a renderable result object
///
/// Output: `{ kind: "visualization", viz_type, title, data }`.
pub struct VisualizationExecutor;

#[async_trait]
impl NodeExecutor for VisualizationExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Visualization
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let input = ctx.primary_input(&node.id).await;
        let viz_type = node.data_str("viz_type").unwrap_or("table");
        let title = node
            .data_str("title")
            .or(node.label.as_deref())
            .unwrap_or(&node.id);
        Ok(json!({
            "kind": "visualization",
            "viz_type": viz_type,
            "title": title,
            "data": input,
        }))
    }
}

/// Normalizes the input into labeled bars
///
/// Accepted inputs: an array of `{label|name, value}` objects, a plain
/// object (entries become bars), or an array of numbers (indexed labels).
///
/// Output: `{ kind: "bar_chart", title, data: [{label, value}...] }`.
pub struct BarChartExecutor;

#[async_trait]
impl NodeExecutor for BarChartExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::BarChart
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data.get("title") {
            Some(t) if !t.is_string() => {
                vec![invalid_field(node, "title", "'title' must be a string")]
            }
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let input = ctx.primary_input(&node.id).await;
        let title = node
            .data_str("title")
            .or(node.label.as_deref())
            .unwrap_or(&node.id);

        let bars: Vec<Value> = match &input {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(map) => {
                        let label = map
                            .get("label")
                            .or_else(|| map.get("name"))
                            .and_then(Value::as_str)
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| i.to_string());
                        let value = map.get("value").cloned().unwrap_or(Value::Null);
                        json!({"label": label, "value": value})
                    }
                    Value::Number(n) => {
                        json!({"label": i.to_string(), "value": num(n.as_f64().unwrap_or(0.0))})
                    }
                    other => json!({"label": i.to_string(), "value": other}),
                })
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| json!({"label": k, "value": v}))
                .collect(),
            other => vec![json!({"label": "value", "value": other})],
        };

        Ok(json!({
            "kind": "bar_chart",
            "title": title,
            "data": bars,
        }))
    }
}
