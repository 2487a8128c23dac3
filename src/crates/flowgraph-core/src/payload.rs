//! Wire-level payload model: nodes, edges, and type inference
//!
//! A [`Payload`] is the JSON (or YAML) document a caller submits:
//!
//! ```text
//! Payload := { "nodes": [Node...], "edges": [Edge...] }
//! Node    := { "id", "type"?, "label"?, "data" }
//! Edge    := { "id", "source", "target", "sourceHandle"?, "targetHandle"?, "condition"? }
//! ```
//!
//! The `type` tag is an open string on the wire so that malformed payloads
//! reach the validator (which reports an aggregated issue list) instead of
//! failing deserialization. [`NodeType`] is the closed set of executable
//! tags; [`infer_type`] fills in missing tags from data fingerprints before
//! validation, never overriding an explicit tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of executable node type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Number,
    TextInput,
    Operation,
    TextOperation,
    Http,
    Condition,
    Switch,
    Filter,
    Map,
    Reduce,
    ForEach,
    WhileLoop,
    Parallel,
    Join,
    Split,
    Delay,
    Cache,
    Retry,
    TryCatch,
    Timeout,
    Throttle,
    RateLimiter,
    SchemaValidator,
    Parse,
    Format,
    Variable,
    Extract,
    Transform,
    Accumulator,
    Counter,
    Visualization,
    Range,
    BarChart,
}

impl NodeType {
    /// All known tags, in registration order
    pub const ALL: [NodeType; 33] = [
        NodeType::Number,
        NodeType::TextInput,
        NodeType::Operation,
        NodeType::TextOperation,
        NodeType::Http,
        NodeType::Condition,
        NodeType::Switch,
        NodeType::Filter,
        NodeType::Map,
        NodeType::Reduce,
        NodeType::ForEach,
        NodeType::WhileLoop,
        NodeType::Parallel,
        NodeType::Join,
        NodeType::Split,
        NodeType::Delay,
        NodeType::Cache,
        NodeType::Retry,
        NodeType::TryCatch,
        NodeType::Timeout,
        NodeType::Throttle,
        NodeType::RateLimiter,
        NodeType::SchemaValidator,
        NodeType::Parse,
        NodeType::Format,
        NodeType::Variable,
        NodeType::Extract,
        NodeType::Transform,
        NodeType::Accumulator,
        NodeType::Counter,
        NodeType::Visualization,
        NodeType::Range,
        NodeType::BarChart,
    ];

    /// The snake_case wire tag
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Number => "number",
            NodeType::TextInput => "text_input",
            NodeType::Operation => "operation",
            NodeType::TextOperation => "text_operation",
            NodeType::Http => "http",
            NodeType::Condition => "condition",
            NodeType::Switch => "switch",
            NodeType::Filter => "filter",
            NodeType::Map => "map",
            NodeType::Reduce => "reduce",
            NodeType::ForEach => "for_each",
            NodeType::WhileLoop => "while_loop",
            NodeType::Parallel => "parallel",
            NodeType::Join => "join",
            NodeType::Split => "split",
            NodeType::Delay => "delay",
            NodeType::Cache => "cache",
            NodeType::Retry => "retry",
            NodeType::TryCatch => "try_catch",
            NodeType::Timeout => "timeout",
            NodeType::Throttle => "throttle",
            NodeType::RateLimiter => "rate_limiter",
            NodeType::SchemaValidator => "schema_validator",
            NodeType::Parse => "parse",
            NodeType::Format => "format",
            NodeType::Variable => "variable",
            NodeType::Extract => "extract",
            NodeType::Transform => "transform",
            NodeType::Accumulator => "accumulator",
            NodeType::Counter => "counter",
            NodeType::Visualization => "visualization",
            NodeType::Range => "range",
            NodeType::BarChart => "bar_chart",
        }
    }

    /// Parse a wire tag; `None` for anything outside the closed set
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == tag)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An addressable unit of computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the payload
    pub id: String,

    /// Wire type tag; `None` triggers inference
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Opaque per-type record
    #[serde(default)]
    pub data: Value,
}

impl Node {
    /// The parsed tag, if the wire string is in the closed set
    pub fn kind(&self) -> Option<NodeType> {
        self.node_type.as_deref().and_then(NodeType::parse)
    }

    /// String field from `data`
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    /// Numeric field from `data`
    pub fn data_f64(&self, field: &str) -> Option<f64> {
        self.data.get(field).and_then(Value::as_f64)
    }

    /// Unsigned integer field from `data`
    pub fn data_u64(&self, field: &str) -> Option<u64> {
        self.data.get(field).and_then(Value::as_u64)
    }

    /// Boolean field from `data`
    pub fn data_bool(&self, field: &str) -> Option<bool> {
        self.data.get(field).and_then(Value::as_bool)
    }
}

/// A directed connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,

    /// Source node id
    pub source: String,

    /// Target node id
    pub target: String,

    /// Named output port; present makes the edge conditional
    #[serde(
        rename = "sourceHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,

    /// Reserved for future use
    #[serde(
        rename = "targetHandle",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_handle: Option<String>,

    /// Legacy spelling of `sourceHandle`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    /// Effective conditional handle: `sourceHandle`, falling back to the
    /// legacy `condition` field. `None` means unconditional.
    pub fn handle(&self) -> Option<&str> {
        self.source_handle
            .as_deref()
            .or(self.condition.as_deref())
            .filter(|h| !h.is_empty())
    }
}

/// The full workflow document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Payload {
    /// Parse a JSON document
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse a YAML document (same schema as JSON)
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Fill in missing type tags from data fingerprints.
    ///
    /// Explicit tags are never overridden; nodes whose data matches zero or
    /// more than one fingerprint are left untagged for validation to reject.
    pub fn infer_types(&mut self) {
        for node in &mut self.nodes {
            if node.node_type.is_none() {
                if let Some(inferred) = infer_type(&node.data) {
                    node.node_type = Some(inferred.as_str().to_string());
                }
            }
        }
    }
}

/// Infer a node type from its data record
///
/// | Fingerprint | Inferred |
/// |---|---|
/// | numeric `value` | number |
/// | `url` | http |
/// | `condition` | condition |
/// | `cases` | switch |
/// | `var_name` | variable |
/// | `counter_op` | counter |
/// | `accum_op` | accumulator |
/// | `text` | text_input |
/// | `op` | operation |
///
/// Returns `None` when no fingerprint or more than one matches.
pub fn infer_type(data: &Value) -> Option<NodeType> {
    let obj = data.as_object()?;
    let mut matches = Vec::new();

    if obj.get("value").map(Value::is_number).unwrap_or(false) {
        matches.push(NodeType::Number);
    }
    if obj.contains_key("url") {
        matches.push(NodeType::Http);
    }
    if obj.contains_key("condition") {
        matches.push(NodeType::Condition);
    }
    if obj.contains_key("cases") {
        matches.push(NodeType::Switch);
    }
    if obj.contains_key("var_name") {
        matches.push(NodeType::Variable);
    }
    if obj.contains_key("counter_op") {
        matches.push(NodeType::Counter);
    }
    if obj.contains_key("accum_op") {
        matches.push(NodeType::Accumulator);
    }
    if obj.contains_key("text") {
        matches.push(NodeType::TextInput);
    }
    if obj.contains_key("op") {
        matches.push(NodeType::Operation);
    }

    match matches.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_round_trip() {
        for tag in NodeType::ALL {
            assert_eq!(NodeType::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(NodeType::parse("no_such_node"), None);
    }

    #[test]
    fn payload_wire_names() {
        let payload = Payload::from_json(
            r#"{
                "nodes": [{"id": "a", "type": "number", "data": {"value": 3}}],
                "edges": [{"id": "e1", "source": "a", "target": "b", "sourceHandle": "true"}]
            }"#,
        )
        .unwrap();
        assert_eq!(payload.nodes[0].kind(), Some(NodeType::Number));
        assert_eq!(payload.edges[0].handle(), Some("true"));
    }

    #[test]
    fn legacy_condition_field_acts_as_handle() {
        let edge: Edge = serde_json::from_value(json!({
            "id": "e", "source": "a", "target": "b", "condition": "false"
        }))
        .unwrap();
        assert_eq!(edge.handle(), Some("false"));
    }

    #[test]
    fn source_handle_wins_over_legacy() {
        let edge: Edge = serde_json::from_value(json!({
            "id": "e", "source": "a", "target": "b",
            "sourceHandle": "true", "condition": "false"
        }))
        .unwrap();
        assert_eq!(edge.handle(), Some("true"));
    }

    #[test]
    fn inference_single_fingerprint() {
        assert_eq!(infer_type(&json!({"value": 42})), Some(NodeType::Number));
        assert_eq!(
            infer_type(&json!({"url": "https://api.example.com"})),
            Some(NodeType::Http)
        );
        assert_eq!(
            infer_type(&json!({"condition": "input > 3"})),
            Some(NodeType::Condition)
        );
        assert_eq!(infer_type(&json!({"cases": []})), Some(NodeType::Switch));
        assert_eq!(
            infer_type(&json!({"var_name": "total"})),
            Some(NodeType::Variable)
        );
        assert_eq!(
            infer_type(&json!({"counter_op": "increment"})),
            Some(NodeType::Counter)
        );
        assert_eq!(
            infer_type(&json!({"accum_op": "add"})),
            Some(NodeType::Accumulator)
        );
        assert_eq!(infer_type(&json!({"text": "hi"})), Some(NodeType::TextInput));
        assert_eq!(infer_type(&json!({"op": "add"})), Some(NodeType::Operation));
    }

    #[test]
    fn inference_rejects_ambiguity() {
        // Both `url` and `condition` present: ambiguous, left untyped.
        assert_eq!(
            infer_type(&json!({"url": "https://x", "condition": "input"})),
            None
        );
        // Non-numeric `value` is not the number fingerprint.
        assert_eq!(infer_type(&json!({"value": "nan"})), None);
    }

    #[test]
    fn inference_never_overrides_explicit_type() {
        let mut payload = Payload {
            nodes: vec![Node {
                id: "n".into(),
                node_type: Some("text_input".into()),
                label: None,
                data: json!({"value": 1}),
            }],
            edges: vec![],
        };
        payload.infer_types();
        assert_eq!(payload.nodes[0].node_type.as_deref(), Some("text_input"));
    }
}
