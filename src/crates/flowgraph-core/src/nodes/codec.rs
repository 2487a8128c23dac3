//! Parse and format nodes: multi-format codecs
//!
//! `parse` turns text into structured data (JSON, CSV, TSV, YAML, XML, or
//! auto-detected); `format` renders structured data back out (JSON, CSV,
//! TSV). CSV/TSV parsing treats the first row as the header and infers cell
//! types (number, boolean, null, string); formatting emits headers in
//! lexicographic order so output is reproducible.
//!
//! `parse(format(x, "json"), "json")` round-trips losslessly; CSV/TSV
//! round-trips hold for arrays of flat objects whose values are scalars
//! (types collapse per the inference table).

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::nodes::invalid_field;
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

const PARSE_FORMATS: &[&str] = &["json", "csv", "tsv", "yaml", "xml", "auto"];
const FORMAT_FORMATS: &[&str] = &["json", "csv", "tsv"];

/// Text → structured data
///
/// Output: `{ value, format }` with `format` the actually-used codec.
pub struct ParseExecutor;

#[async_trait]
impl NodeExecutor for ParseExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Parse
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("format") {
            Some(format) if !PARSE_FORMATS.contains(&format) => vec![invalid_field(
                node,
                "format",
                &format!("unknown format '{}', expected one of {:?}", format, PARSE_FORMATS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let requested = node.data_str("format").unwrap_or("auto");
        let input = ctx.primary_input(&node.id).await;

        let text = match &input {
            Value::String(text) => text.clone(),
            other if requested == "auto" => {
                // Already structured: nothing to parse.
                return Ok(json!({ "value": other, "format": "none" }));
            }
            other => {
                return Err(WorkflowError::node_failure(
                    &node.id,
                    format!("parse expects text input, got {}", crate::expr::type_name(other)),
                ))
            }
        };

        let format = if requested == "auto" {
            detect_format(&text)
        } else {
            requested.to_string()
        };

        let value = match format.as_str() {
            "json" => serde_json::from_str::<Value>(&text)
                .map_err(|e| WorkflowError::node_failure(&node.id, format!("invalid JSON: {}", e)))?,
            "yaml" => serde_yaml::from_str::<Value>(&text)
                .map_err(|e| WorkflowError::node_failure(&node.id, format!("invalid YAML: {}", e)))?,
            "csv" => parse_delimited(&text, b',')
                .map_err(|e| WorkflowError::node_failure(&node.id, e))?,
            "tsv" => parse_delimited(&text, b'\t')
                .map_err(|e| WorkflowError::node_failure(&node.id, e))?,
            "xml" => parse_xml(&text).map_err(|e| WorkflowError::node_failure(&node.id, e))?,
            other => {
                return Err(WorkflowError::node_failure(
                    &node.id,
                    format!("unknown format '{}'", other),
                ))
            }
        };

        Ok(json!({ "value": value, "format": format }))
    }
}

/// Structured data → text
///
/// Output: `{ value, format }` with `value` the rendered text.
pub struct FormatExecutor;

#[async_trait]
impl NodeExecutor for FormatExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Format
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.data_str("format") {
            Some(format) if !FORMAT_FORMATS.contains(&format) => vec![invalid_field(
                node,
                "format",
                &format!("unknown format '{}', expected one of {:?}", format, FORMAT_FORMATS),
            )],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let format = node.data_str("format").unwrap_or("json");
        let input = ctx.primary_input(&node.id).await;

        let text = match format {
            "json" => {
                if node.data_bool("pretty").unwrap_or(false) {
                    serde_json::to_string_pretty(&input)?
                } else {
                    serde_json::to_string(&input)?
                }
            }
            "csv" => write_delimited(&input, b',', node.data_bool("headers").unwrap_or(true))
                .map_err(|e| WorkflowError::node_failure(&node.id, e))?,
            "tsv" => write_delimited(&input, b'\t', node.data_bool("headers").unwrap_or(true))
                .map_err(|e| WorkflowError::node_failure(&node.id, e))?,
            other => {
                return Err(WorkflowError::node_failure(
                    &node.id,
                    format!("unknown format '{}'", other),
                ))
            }
        };

        Ok(json!({ "value": text, "format": format }))
    }
}

/// Auto-detection rules, checked in order:
/// `{`/`[` → JSON; `<` → XML; a `:` on the first line → YAML;
/// tab-delimited → TSV; otherwise CSV.
pub fn detect_format(text: &str) -> String {
    let trimmed = text.trim_start();
    match trimmed.chars().next() {
        Some('{') | Some('[') => return "json".into(),
        Some('<') => return "xml".into(),
        _ => {}
    }
    let first_line = trimmed.lines().next().unwrap_or("");
    if first_line.contains(':') {
        "yaml".into()
    } else if first_line.contains('\t') {
        "tsv".into()
    } else {
        "csv".into()
    }
}

/// Header-row delimited text to an array of typed objects
fn parse_delimited(text: &str, delimiter: u8) -> std::result::Result<Value, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("invalid header row: {}", e))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid row: {}", e))?;
        let mut row = Map::new();
        for (i, header) in headers.iter().enumerate() {
            let cell = record.get(i).unwrap_or("");
            row.insert(header.clone(), infer_cell(cell));
        }
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

/// Cell type inference: number, boolean, null, otherwise string
fn infer_cell(cell: &str) -> Value {
    match cell {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = cell.parse::<f64>() {
        if n.is_finite() && !cell.is_empty() {
            return serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(cell.to_string()));
        }
    }
    Value::String(cell.to_string())
}

/// Array of objects to delimited text with lexicographic header order
fn write_delimited(
    input: &Value,
    delimiter: u8,
    include_headers: bool,
) -> std::result::Result<String, String> {
    let rows = input
        .as_array()
        .ok_or_else(|| "format csv/tsv expects an array of objects".to_string())?;

    let mut headers: Vec<String> = Vec::new();
    for row in rows {
        let object = row
            .as_object()
            .ok_or_else(|| "format csv/tsv expects every element to be an object".to_string())?;
        for key in object.keys() {
            if !headers.contains(key) {
                headers.push(key.clone());
            }
        }
    }
    headers.sort();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    if include_headers {
        writer
            .write_record(&headers)
            .map_err(|e| format!("write failed: {}", e))?;
    }
    for row in rows {
        let object = row.as_object().ok_or_else(|| "non-object row".to_string())?;
        let record: Vec<String> = headers
            .iter()
            .map(|h| match object.get(h) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| format!("write failed: {}", e))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| format!("write failed: {}", e))?;
    String::from_utf8(bytes).map_err(|_| "output is not utf-8".to_string())
}

/// Minimal XML to JSON conversion: elements become objects, attributes get
/// an `@` prefix, text-only elements collapse to strings, repeated siblings
/// become arrays. Mixed content keeps its text under `#text`.
fn parse_xml(text: &str) -> std::result::Result<Value, String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(text);
    reader.trim_text(true);

    // (element name, attributes/children, accumulated text)
    let mut stack: Vec<(String, Map<String, Value>, String)> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut children = Map::new();
                for attribute in start.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
                    let value = attribute
                        .unescape_value()
                        .map_err(|e| format!("bad attribute: {}", e))?
                        .into_owned();
                    children.insert(key, Value::String(value));
                }
                stack.push((name, children, String::new()));
            }
            Ok(Event::Empty(start)) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let mut children = Map::new();
                for attribute in start.attributes().flatten() {
                    let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
                    let value = attribute
                        .unescape_value()
                        .map_err(|e| format!("bad attribute: {}", e))?
                        .into_owned();
                    children.insert(key, Value::String(value));
                }
                let value = if children.is_empty() {
                    Value::Null
                } else {
                    Value::Object(children)
                };
                attach(&mut stack, &mut root, name, value)?;
            }
            Ok(Event::Text(content)) => {
                let piece = content
                    .unescape()
                    .map_err(|e| format!("bad text: {}", e))?;
                if let Some((_, _, text)) = stack.last_mut() {
                    text.push_str(&piece);
                }
            }
            Ok(Event::End(_)) => {
                let (name, children, text) = stack
                    .pop()
                    .ok_or_else(|| "unbalanced closing tag".to_string())?;
                let value = if children.is_empty() {
                    if text.is_empty() {
                        Value::Null
                    } else {
                        Value::String(text)
                    }
                } else {
                    let mut object = children;
                    if !text.is_empty() {
                        object.insert("#text".into(), Value::String(text));
                    }
                    Value::Object(object)
                };
                attach(&mut stack, &mut root, name, value)?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {} // declarations, comments, processing instructions
            Err(e) => return Err(format!("invalid XML: {}", e)),
        }
    }

    if !stack.is_empty() {
        return Err("unclosed element".to_string());
    }
    match root {
        Some((name, value)) => {
            let mut out = Map::new();
            out.insert(name, value);
            Ok(Value::Object(out))
        }
        None => Err("empty document".to_string()),
    }
}

fn attach(
    stack: &mut [(String, Map<String, Value>, String)],
    root: &mut Option<(String, Value)>,
    name: String,
    value: Value,
) -> std::result::Result<(), String> {
    match stack.last_mut() {
        Some((_, children, _)) => {
            match children.get_mut(&name) {
                Some(Value::Array(existing)) => existing.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None => {
                    children.insert(name, value);
                }
            }
            Ok(())
        }
        None => {
            if root.is_some() {
                return Err("multiple root elements".to_string());
            }
            *root = Some((name, value));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::testkit::{context_with_input, node};

    #[test]
    fn detection_rules() {
        assert_eq!(detect_format(r#"{"a": 1}"#), "json");
        assert_eq!(detect_format("[1, 2]"), "json");
        assert_eq!(detect_format("<root/>"), "xml");
        assert_eq!(detect_format("key: value"), "yaml");
        assert_eq!(detect_format("a\tb\n1\t2"), "tsv");
        assert_eq!(detect_format("a,b\n1,2"), "csv");
    }

    #[tokio::test]
    async fn parse_auto_json() {
        let ctx = context_with_input("p", json!("{\"n\": 3}")).await;
        let out = ParseExecutor
            .execute(&ctx, &node("p", "parse", json!({})))
            .await
            .unwrap();
        assert_eq!(out["format"], json!("json"));
        assert_eq!(out["value"], json!({"n": 3}));
    }

    #[tokio::test]
    async fn parse_csv_with_type_inference() {
        let ctx = context_with_input("p", json!("name,age,active\nada,36,true\ngrace,47,false")).await;
        let out = ParseExecutor
            .execute(&ctx, &node("p", "parse", json!({"format": "csv"})))
            .await
            .unwrap();
        assert_eq!(
            out["value"],
            json!([
                {"name": "ada", "age": 36.0, "active": true},
                {"name": "grace", "age": 47.0, "active": false}
            ])
        );
    }

    #[tokio::test]
    async fn parse_tsv() {
        let ctx = context_with_input("p", json!("a\tb\n1\tnull")).await;
        let out = ParseExecutor
            .execute(&ctx, &node("p", "parse", json!({"format": "tsv"})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!([{"a": 1.0, "b": null}]));
    }

    #[tokio::test]
    async fn parse_yaml() {
        let ctx = context_with_input("p", json!("name: ada\ncount: 2")).await;
        let out = ParseExecutor
            .execute(&ctx, &node("p", "parse", json!({"format": "yaml"})))
            .await
            .unwrap();
        assert_eq!(out["value"], json!({"name": "ada", "count": 2}));
    }

    #[tokio::test]
    async fn parse_xml_elements_attributes_repeats() {
        let xml = r#"<list kind="short"><item>a</item><item>b</item></list>"#;
        let ctx = context_with_input("p", json!(xml)).await;
        let out = ParseExecutor
            .execute(&ctx, &node("p", "parse", json!({"format": "xml"})))
            .await
            .unwrap();
        assert_eq!(
            out["value"],
            json!({"list": {"@kind": "short", "item": ["a", "b"]}})
        );
    }

    #[tokio::test]
    async fn format_json_pretty() {
        let ctx = context_with_input("f", json!({"b": 1, "a": 2})).await;
        let out = FormatExecutor
            .execute(&ctx, &node("f", "format", json!({"format": "json", "pretty": true})))
            .await
            .unwrap();
        let text = out["value"].as_str().unwrap();
        assert!(text.contains('\n'));
        assert_eq!(
            serde_json::from_str::<Value>(text).unwrap(),
            json!({"a": 2, "b": 1})
        );
    }

    #[tokio::test]
    async fn format_csv_deterministic_header_order() {
        let ctx = context_with_input(
            "f",
            json!([{"b": 1, "a": "x"}, {"a": "y", "b": 2}]),
        )
        .await;
        let out = FormatExecutor
            .execute(&ctx, &node("f", "format", json!({"format": "csv"})))
            .await
            .unwrap();
        let text = out["value"].as_str().unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("a,b"));
        assert_eq!(lines.next(), Some("x,1"));
        assert_eq!(lines.next(), Some("y,2"));
    }

    #[tokio::test]
    async fn csv_round_trip_for_scalar_objects() {
        let original = json!([
            {"active": true, "age": 36.0, "name": "ada"},
            {"active": false, "age": 47.0, "name": "grace"}
        ]);
        let rendered = write_delimited(&original, b',', true).unwrap();
        let parsed = parse_delimited(&rendered, b',').unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn json_round_trip() {
        let original = json!({"a": [1, {"b": null}], "c": "x"});
        let text = serde_json::to_string(&original).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), original);
    }

    #[tokio::test]
    async fn structured_input_passes_through_on_auto() {
        let ctx = context_with_input("p", json!([1, 2])).await;
        let out = ParseExecutor
            .execute(&ctx, &node("p", "parse", json!({})))
            .await
            .unwrap();
        assert_eq!(out["format"], json!("none"));
        assert_eq!(out["value"], json!([1, 2]));
    }
}
