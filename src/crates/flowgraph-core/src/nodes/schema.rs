//! JSON-Schema (draft-07) validation node

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jsonschema::{Draft, JSONSchema};
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::missing_field;
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

/// Validates its input against a draft-07 schema
///
/// Two modes: `strict: true` fails the node on any violation (a
/// `SchemaError` carrying the violation list); the default report mode
/// passes the input through as `{ valid, validation_errors, data }`.
///
/// Compiled schemas are cached by the serialized schema document, so a
/// schema shared by many nodes compiles once per engine.
pub struct SchemaValidatorExecutor {
    compiled: Mutex<HashMap<String, Arc<JSONSchema>>>,
}

impl SchemaValidatorExecutor {
    pub fn new() -> Self {
        Self {
            compiled: Mutex::new(HashMap::new()),
        }
    }

    fn compile(&self, schema: &Value, node_id: &str) -> Result<Arc<JSONSchema>> {
        let key = serde_json::to_string(schema)?;
        if let Ok(cache) = self.compiled.lock() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| {
                WorkflowError::node_failure(node_id, format!("invalid schema: {}", e))
            })?;
        let compiled = Arc::new(compiled);

        if let Ok(mut cache) = self.compiled.lock() {
            cache.entry(key).or_insert_with(|| compiled.clone());
        }
        Ok(compiled)
    }
}

impl Default for SchemaValidatorExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for SchemaValidatorExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::SchemaValidator
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        match node.data.get("schema") {
            None => issues.push(missing_field(node, "schema")),
            Some(schema) => {
                if JSONSchema::options()
                    .with_draft(Draft::Draft7)
                    .compile(schema)
                    .is_err()
                {
                    issues.push(
                        ValidationIssue::new(
                            crate::error::IssueKind::InvalidField,
                            "'schema' is not a valid draft-07 schema",
                        )
                        .for_node(&node.id)
                        .for_field("schema"),
                    );
                }
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let schema = node
            .data
            .get("schema")
            .ok_or_else(|| WorkflowError::node_failure(&node.id, "missing 'schema'"))?;
        let strict = node.data_bool("strict").unwrap_or(false);

        let compiled = self.compile(schema, &node.id)?;
        let input = ctx.primary_input(&node.id).await;

        // Collect messages while the error iterator still borrows `input`.
        let violations: Vec<String> = match compiled.validate(&input) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect(),
        };

        if violations.is_empty() {
            return Ok(json!({
                "valid": true,
                "validation_errors": [],
                "data": input.clone(),
                "value": input,
            }));
        }

        if strict {
            return Err(WorkflowError::Schema(violations));
        }
        Ok(json!({
            "valid": false,
            "validation_errors": violations,
            "data": input.clone(),
            "value": input,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{context_with_input, node};

    fn person_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "age": {"type": "integer", "minimum": 0, "maximum": 150}
            },
            "required": ["name", "age"],
            "additionalProperties": false
        })
    }

    #[tokio::test]
    async fn report_mode_passes_through_with_verdict() {
        let ctx = context_with_input("sv", json!({"name": "ada", "age": 36})).await;
        let out = SchemaValidatorExecutor::new()
            .execute(&ctx, &node("sv", "schema_validator", json!({"schema": person_schema()})))
            .await
            .unwrap();
        assert_eq!(out["valid"], json!(true));
        assert_eq!(out["data"], json!({"name": "ada", "age": 36}));
    }

    #[tokio::test]
    async fn report_mode_lists_violations() {
        let ctx = context_with_input("sv", json!({"name": "", "age": 200})).await;
        let out = SchemaValidatorExecutor::new()
            .execute(&ctx, &node("sv", "schema_validator", json!({"schema": person_schema()})))
            .await
            .unwrap();
        assert_eq!(out["valid"], json!(false));
        assert!(out["validation_errors"].as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn strict_mode_fails_the_node() {
        let ctx = context_with_input("sv", json!({"name": "x"})).await;
        let result = SchemaValidatorExecutor::new()
            .execute(
                &ctx,
                &node(
                    "sv",
                    "schema_validator",
                    json!({"schema": person_schema(), "strict": true}),
                ),
            )
            .await;
        match result {
            Err(WorkflowError::Schema(violations)) => assert!(!violations.is_empty()),
            other => panic!("expected schema error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn composition_keywords() {
        let schema = json!({
            "anyOf": [
                {"type": "number", "minimum": 10},
                {"type": "string", "pattern": "^ok"}
            ]
        });
        let ctx = context_with_input("sv", json!("ok-go")).await;
        let out = SchemaValidatorExecutor::new()
            .execute(&ctx, &node("sv", "schema_validator", json!({"schema": schema})))
            .await
            .unwrap();
        assert_eq!(out["valid"], json!(true));
    }

    #[test]
    fn invalid_schema_rejected_at_validation() {
        let bad = node(
            "sv",
            "schema_validator",
            json!({"schema": {"type": "not_a_type"}}),
        );
        assert!(!SchemaValidatorExecutor::new().validate(&bad).is_empty());
    }
}
