//! Engine-level payload validation and implicit-edge extraction
//!
//! Validation is aggregated: the caller gets every issue in one pass.
//! Checks, in order: structural (non-empty node list, unique ids, edge
//! endpoints, self-loops), per-type static checks delegated to each
//! executor's `validate`, and cycle detection over the explicit edges plus
//! the implicit edges derived from expression dependencies.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{IssueKind, ValidationIssue};
use crate::graph::WorkflowGraph;
use crate::payload::{Node, NodeType, Payload};
use crate::registry::Registry;

/// Run every validation pass over an already type-inferred payload
pub fn validate_payload(payload: &Payload, registry: &Registry) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if payload.nodes.is_empty() {
        issues.push(ValidationIssue::new(
            IssueKind::Structure,
            "payload has no nodes",
        ));
        return issues;
    }

    // Unique ids.
    let mut seen = HashSet::new();
    for node in &payload.nodes {
        if node.id.is_empty() {
            issues.push(ValidationIssue::new(IssueKind::Structure, "node id is empty"));
        }
        if !seen.insert(node.id.as_str()) {
            issues.push(
                ValidationIssue::new(IssueKind::Structure, "duplicate node id").for_node(&node.id),
            );
        }
    }

    // Edge endpoints.
    for edge in &payload.edges {
        if edge.id.is_empty() {
            issues.push(ValidationIssue::new(IssueKind::Edge, "edge id is empty"));
        }
        if edge.source == edge.target {
            issues.push(ValidationIssue::new(
                IssueKind::Edge,
                format!("edge '{}' is a self-loop on '{}'", edge.id, edge.source),
            ));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                issues.push(ValidationIssue::new(
                    IssueKind::Edge,
                    format!("edge '{}' references unknown node '{}'", edge.id, endpoint),
                ));
            }
        }
    }

    // Per-node type resolution and executor checks.
    for node in &payload.nodes {
        match node.node_type.as_deref() {
            None => issues.push(
                ValidationIssue::new(
                    IssueKind::UnknownType,
                    "node has no type and none could be inferred",
                )
                .for_node(&node.id),
            ),
            Some(tag) => match NodeType::parse(tag) {
                None => issues.push(
                    ValidationIssue::new(
                        IssueKind::UnknownType,
                        format!("unknown node type '{}'", tag),
                    )
                    .for_node(&node.id),
                ),
                Some(kind) => match registry.get(kind) {
                    None => issues.push(
                        ValidationIssue::new(
                            IssueKind::UnknownType,
                            format!("no executor registered for '{}'", tag),
                        )
                        .for_node(&node.id),
                    ),
                    Some(executor) => issues.extend(executor.validate(node)),
                },
            },
        }
    }

    // Cycles, over explicit plus implicit edges.
    let implicit = implicit_edges(payload);
    let graph = WorkflowGraph::build(payload, &implicit);
    if let Some(path) = graph.detect_cycle() {
        issues.push(ValidationIssue::new(
            IssueKind::Cycle,
            format!("cycle detected: {}", path.join(" -> ")),
        ));
    }

    issues
}

/// Derive implicit `(source, target)` edges from expression dependencies.
///
/// Every `node.<X>...` reference inside any expression-bearing field of a
/// node creates an edge `X -> host`, so referenced nodes are scheduled (and
/// cycle-checked) ahead of their readers. Uncompilable expressions
/// contribute nothing here; executor validation reports them.
pub fn implicit_edges(payload: &Payload) -> Vec<(String, String)> {
    let ids: HashSet<&str> = payload.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut edges = Vec::new();

    for node in &payload.nodes {
        for source in expression_sources(node) {
            if let Ok(compiled) = crate::expr::compile(&source, 64) {
                for dependency in compiled.dependencies() {
                    if ids.contains(dependency.as_str()) && dependency != &node.id {
                        edges.push((dependency.clone(), node.id.clone()));
                    }
                }
            }
        }
    }
    edges
}

/// Every expression string a node's data can carry: the well-known fields,
/// switch case predicates, and `{{…}}` templates in url/body/headers.
fn expression_sources(node: &Node) -> Vec<String> {
    let mut sources = Vec::new();
    for field in ["condition", "expression", "update", "when"] {
        if let Some(text) = node.data_str(field) {
            sources.push(text.to_string());
        }
    }
    if let Some(cases) = node.data.get("cases").and_then(Value::as_array) {
        for case in cases {
            if let Some(when) = case.get("when").and_then(Value::as_str) {
                sources.push(when.to_string());
            }
        }
    }
    for field in ["url", "body"] {
        if let Some(text) = node.data_str(field) {
            sources.extend(template_expressions(text));
        }
    }
    if let Some(headers) = node.data.get("headers").and_then(Value::as_object) {
        for value in headers.values() {
            if let Some(text) = value.as_str() {
                sources.extend(template_expressions(text));
            }
        }
    }
    sources
}

/// Extract the expression bodies of `{{…}}` placeholders
fn template_expressions(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                out.push(after[..close].trim().to_string());
                rest = &after[close + 2..];
            }
            None => break,
        }
    }
    out
}
