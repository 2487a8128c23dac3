//! Graph structure: adjacency, cycle detection, topological order
//!
//! This is the pure structural component between the wire payload and the
//! engine. It owns no executors and performs no I/O.
//!
//! ```text
//! Payload ──┐
//!           ├──► WorkflowGraph ──► detect_cycle ──► topological_order
//! implicit ─┘      incoming[]
//!  edges           outgoing[]
//! ```
//!
//! Implicit edges come from expression dependencies (`node.<id>` references)
//! and are structurally indistinguishable from explicit unconditional edges
//! here; the engine re-runs cycle detection after adding them.
//!
//! The topological sort is stable: ties are broken by the order nodes
//! appeared in the payload, so identical payloads always execute in the same
//! order.

use std::collections::HashMap;

use crate::error::WorkflowError;
use crate::payload::Payload;

/// A directed connection inside the built graph
///
/// Explicit payload edges keep their conditional handle; implicit edges are
/// always unconditional.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    /// Conditional handle, `None` for unconditional (and all implicit) edges
    pub handle: Option<String>,
    /// Whether this edge was derived from an expression dependency
    pub implicit: bool,
}

/// Adjacency-indexed view of a payload
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    /// Node ids in payload order (the tie-break order for scheduling)
    order: Vec<String>,
    /// Node id -> position in `order`
    index: HashMap<String, usize>,
    /// All edges, explicit first, then implicit
    edges: Vec<GraphEdge>,
    /// Node index -> indexes into `edges` arriving at it
    incoming: Vec<Vec<usize>>,
    /// Node index -> indexes into `edges` leaving it
    outgoing: Vec<Vec<usize>>,
}

impl WorkflowGraph {
    /// Build adjacency from a payload plus implicit `(source, target)` pairs.
    ///
    /// Edges whose endpoints are unknown are skipped here; the validator has
    /// already reported them.
    pub fn build(payload: &Payload, implicit: &[(String, String)]) -> Self {
        let order: Vec<String> = payload.nodes.iter().map(|n| n.id.clone()).collect();
        let index: HashMap<String, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = Vec::with_capacity(payload.edges.len() + implicit.len());
        for e in &payload.edges {
            edges.push(GraphEdge {
                source: e.source.clone(),
                target: e.target.clone(),
                handle: e.handle().map(|h| h.to_string()),
                implicit: false,
            });
        }
        for (source, target) in implicit {
            // An explicit edge already covers the dependency.
            let duplicate = edges
                .iter()
                .any(|e| &e.source == source && &e.target == target);
            if !duplicate && source != target {
                edges.push(GraphEdge {
                    source: source.clone(),
                    target: target.clone(),
                    handle: None,
                    implicit: true,
                });
            }
        }

        let mut incoming = vec![Vec::new(); order.len()];
        let mut outgoing = vec![Vec::new(); order.len()];
        for (ei, edge) in edges.iter().enumerate() {
            if let (Some(&s), Some(&t)) = (index.get(&edge.source), index.get(&edge.target)) {
                outgoing[s].push(ei);
                incoming[t].push(ei);
            }
        }

        Self {
            order,
            index,
            edges,
            incoming,
            outgoing,
        }
    }

    /// Node ids in payload order
    pub fn node_ids(&self) -> &[String] {
        &self.order
    }

    /// Edges arriving at `id`, in payload order
    pub fn incoming_edges(&self, id: &str) -> Vec<&GraphEdge> {
        match self.index.get(id) {
            Some(&i) => self.incoming[i].iter().map(|&ei| &self.edges[ei]).collect(),
            None => Vec::new(),
        }
    }

    /// Edges leaving `id`, in payload order
    pub fn outgoing_edges(&self, id: &str) -> Vec<&GraphEdge> {
        match self.index.get(id) {
            Some(&i) => self.outgoing[i].iter().map(|&ei| &self.edges[ei]).collect(),
            None => Vec::new(),
        }
    }

    /// Ids of direct predecessors of `id`
    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.incoming_edges(id)
            .into_iter()
            .map(|e| e.source.as_str())
            .collect()
    }

    /// Detect a cycle with three-color DFS.
    ///
    /// Returns the node ids along one offending cycle, in edge order,
    /// starting and ending at the same id.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }

        let n = self.order.len();
        let mut color = vec![Color::White; n];
        let mut stack: Vec<usize> = Vec::new();

        // Iterative DFS; `visit` frames carry (node, next outgoing slot).
        for root in 0..n {
            if color[root] != Color::White {
                continue;
            }
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            color[root] = Color::Grey;
            stack.push(root);

            while let Some(&(node, slot)) = frames.last() {
                if slot >= self.outgoing[node].len() {
                    color[node] = Color::Black;
                    stack.pop();
                    frames.pop();
                    continue;
                }
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }

                let ei = self.outgoing[node][slot];
                let target = match self.index.get(&self.edges[ei].target) {
                    Some(&t) => t,
                    None => continue,
                };
                match color[target] {
                    Color::White => {
                        color[target] = Color::Grey;
                        stack.push(target);
                        frames.push((target, 0));
                    }
                    Color::Grey => {
                        // Back edge: the cycle is the stack suffix from
                        // `target` plus the closing repeat.
                        let start = stack.iter().position(|&x| x == target).unwrap_or(0);
                        let mut path: Vec<String> = stack[start..]
                            .iter()
                            .map(|&i| self.order[i].clone())
                            .collect();
                        path.push(self.order[target].clone());
                        return Some(path);
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }

    /// Topologically sort node ids.
    ///
    /// Kahn's algorithm with the ready set ordered by payload position, so
    /// equal-rank nodes always come out in submission order. Returns
    /// [`WorkflowError::Cycle`] when no complete order exists.
    pub fn topological_order(&self) -> Result<Vec<String>, WorkflowError> {
        let n = self.order.len();
        let mut indegree: Vec<usize> = (0..n).map(|i| self.incoming[i].len()).collect();

        let mut ready: std::collections::BTreeSet<usize> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .collect();
        let mut out = Vec::with_capacity(n);

        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            out.push(self.order[next].clone());
            for &ei in &self.outgoing[next] {
                if let Some(&t) = self.index.get(&self.edges[ei].target) {
                    indegree[t] -= 1;
                    if indegree[t] == 0 {
                        ready.insert(t);
                    }
                }
            }
        }

        if out.len() != n {
            let path = self.detect_cycle().unwrap_or_default();
            return Err(WorkflowError::Cycle { path });
        }
        Ok(out)
    }
}

/// Render a payload as a Mermaid flowchart for docs and the CLI
pub fn mermaid(payload: &Payload) -> String {
    let mut out = String::from("flowchart TD\n");
    for node in &payload.nodes {
        let label = node.label.as_deref().unwrap_or(&node.id);
        let tag = node.node_type.as_deref().unwrap_or("?");
        out.push_str(&format!("    {}[\"{} ({})\"]\n", node.id, label, tag));
    }
    for edge in &payload.edges {
        match edge.handle() {
            Some(h) => out.push_str(&format!(
                "    {} -->|{}| {}\n",
                edge.source, h, edge.target
            )),
            None => out.push_str(&format!("    {} --> {}\n", edge.source, edge.target)),
        }
    }
    out
}

/// Render a payload in Graphviz dot syntax
pub fn dot(payload: &Payload) -> String {
    let mut out = String::from("digraph workflow {\n    rankdir=TB;\n");
    for node in &payload.nodes {
        let label = node.label.as_deref().unwrap_or(&node.id);
        let tag = node.node_type.as_deref().unwrap_or("?");
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\\n({})\"];\n",
            node.id, label, tag
        ));
    }
    for edge in &payload.edges {
        match edge.handle() {
            Some(h) => out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.source, edge.target, h
            )),
            None => out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                edge.source, edge.target
            )),
        }
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Edge, Node};
    use serde_json::json;

    fn node(id: &str) -> Node {
        Node {
            id: id.into(),
            node_type: Some("number".into()),
            label: None,
            data: json!({"value": 1}),
        }
    }

    fn edge(id: &str, source: &str, target: &str) -> Edge {
        Edge {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            condition: None,
        }
    }

    fn diamond() -> Payload {
        Payload {
            nodes: vec![node("a"), node("b"), node("c"), node("d")],
            edges: vec![
                edge("e1", "a", "b"),
                edge("e2", "a", "c"),
                edge("e3", "b", "d"),
                edge("e4", "c", "d"),
            ],
        }
    }

    #[test]
    fn topo_order_respects_edges() {
        let graph = WorkflowGraph::build(&diamond(), &[]);
        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn topo_order_is_stable_on_ties() {
        // b and c are both ready after a; payload order decides.
        let graph = WorkflowGraph::build(&diamond(), &[]);
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn cycle_is_detected_with_path() {
        let mut payload = diamond();
        payload.edges.push(edge("e5", "d", "a"));
        let graph = WorkflowGraph::build(&payload, &[]);

        let path = graph.detect_cycle().expect("cycle expected");
        assert!(path.len() >= 2);
        assert_eq!(path.first(), path.last());

        match graph.topological_order() {
            Err(WorkflowError::Cycle { path }) => assert!(!path.is_empty()),
            other => panic!("expected cycle error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn implicit_edges_participate_in_cycles() {
        // a -> b explicit, b -> a implicit: cycle.
        let payload = Payload {
            nodes: vec![node("a"), node("b")],
            edges: vec![edge("e1", "a", "b")],
        };
        let graph = WorkflowGraph::build(&payload, &[("b".into(), "a".into())]);
        assert!(graph.detect_cycle().is_some());
    }

    #[test]
    fn duplicate_implicit_edges_are_dropped() {
        let payload = Payload {
            nodes: vec![node("a"), node("b")],
            edges: vec![edge("e1", "a", "b")],
        };
        let graph = WorkflowGraph::build(&payload, &[("a".into(), "b".into())]);
        assert_eq!(graph.incoming_edges("b").len(), 1);
    }

    #[test]
    fn adjacency_lookups() {
        let graph = WorkflowGraph::build(&diamond(), &[]);
        assert_eq!(graph.parents("d"), vec!["b", "c"]);
        assert_eq!(graph.outgoing_edges("a").len(), 2);
        assert!(graph.incoming_edges("a").is_empty());
    }

    #[test]
    fn mermaid_includes_handles() {
        let mut payload = diamond();
        payload.edges[0].source_handle = Some("true".into());
        let rendered = mermaid(&payload);
        assert!(rendered.contains("a -->|true| b"));
        assert!(rendered.contains("flowchart TD"));
    }
}
