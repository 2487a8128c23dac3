//! HTTP request node
//!
//! Wraps the shared [`HttpConnector`](crate::http::HttpConnector): SSRF
//! guard, manual redirect re-validation, capped body read. The node's `url`,
//! string `body`, and header values support `{{…}}` interpolation over the
//! expression language with the node's input bound to `input`.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::events::EventKind;
use crate::expr::Scope;
use crate::nodes::{invalid_field, missing_field, require_str};
use crate::payload::{Node, NodeType};
use crate::registry::NodeExecutor;

const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("static pattern"))
}

/// Interpolate `{{expr}}` placeholders against a scope
fn render_template(ctx: &ExecutionContext, text: &str, scope: &Scope) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for capture in template_pattern().captures_iter(text) {
        let whole = match capture.get(0) {
            Some(m) => m,
            None => continue,
        };
        let source = capture.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        out.push_str(&text[last..whole.start()]);
        let compiled = ctx.expressions.get(source)?;
        let value = compiled.evaluate(scope)?;
        out.push_str(&crate::expr::display(&value));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Performs one guarded HTTP request
///
/// Output: `{ status, headers, body, duration_ms, size }`. 4xx responses
/// are ordinary results; 5xx and transport failures surface as transient
/// errors so the retry middleware can re-attempt them.
pub struct HttpExecutor;

#[async_trait]
impl NodeExecutor for HttpExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Http
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if node.data_str("url").is_none() {
            issues.push(missing_field(node, "url"));
        }
        if let Some(method) = node.data_str("method") {
            if !METHODS.contains(&method.to_uppercase().as_str()) {
                issues.push(invalid_field(
                    node,
                    "method",
                    &format!("unknown method '{}', expected one of {:?}", method, METHODS),
                ));
            }
        }
        if let Some(headers) = node.data.get("headers") {
            if !headers.is_object() {
                issues.push(invalid_field(node, "headers", "'headers' must be an object"));
            }
        }
        issues
    }

    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value> {
        let raw_url = require_str(node, "url")?;
        let method = node.data_str("method").unwrap_or("GET").to_uppercase();
        let timeout = node
            .data_u64("timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(ctx.limits.http_timeout);

        let input = ctx.primary_input(&node.id).await;
        let scope = ctx.scope_with_input(input).await;

        let url = render_template(ctx, raw_url, &scope)
            .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?;

        let mut headers = Map::new();
        if let Some(Value::Object(raw)) = node.data.get("headers") {
            for (name, value) in raw {
                let rendered = match value.as_str() {
                    Some(text) => Value::String(
                        render_template(ctx, text, &scope)
                            .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?,
                    ),
                    None => value.clone(),
                };
                headers.insert(name.clone(), rendered);
            }
        }

        let body = match node.data.get("body") {
            Some(Value::String(text)) => Some(Value::String(
                render_template(ctx, text, &scope)
                    .map_err(|e| WorkflowError::node_failure(&node.id, e.to_string()))?,
            )),
            Some(other) => Some(other.clone()),
            None => None,
        };

        ctx.count_http_call()?;
        let host = reqwest::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "<invalid>".into());
        ctx.emit(EventKind::HttpRequestStart {
            host: host.clone(),
            method: method.clone(),
        });

        let outcome = ctx
            .http
            .execute(
                &ctx.limits,
                ctx.deadline(),
                &method,
                &url,
                &headers,
                body.as_ref(),
                timeout,
            )
            .await;

        match outcome {
            Ok(response) => {
                ctx.emit(EventKind::HttpRequestEnd {
                    host: response.host.clone(),
                    status: response.status,
                    duration_ms: response.duration_ms,
                    size: response.size,
                });
                Ok(json!({
                    "status": response.status,
                    "headers": response.headers,
                    "body": response.body,
                    "duration_ms": response.duration_ms,
                    "size": response.size,
                }))
            }
            Err(error) => {
                ctx.emit(EventKind::HttpRequestEnd {
                    host,
                    status: 0,
                    duration_ms: 0,
                    size: 0,
                });
                Err(error)
            }
        }
    }
}
