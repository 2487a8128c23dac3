//! Engine orchestrator: validation, scheduling, conditional execution
//!
//! The engine turns a payload into a per-node result map and a final
//! output:
//!
//! ```text
//! Payload ─► infer types ─► cycle check (explicit + implicit edges)
//!         ─► validate (structural + per-executor)
//!         ─► topological order (stable: payload order breaks ties)
//!         ─► for each node in order:
//!               should_execute? ──no──► NodeSkipped (skip is transitive)
//!                    │yes
//!               middleware chain ─► executor ─► record result
//!         ─► final output + ExecutionReport
//! ```
//!
//! Successors of a `parallel` node are executed concurrently (bounded by
//! its `max_concurrency`); `retry` and `timeout` nodes wrap the execution
//! of their direct successors. Everything observes one run deadline.
//!
//! # Examples
//!
//! ```rust,no_run
//! use flowgraph_core::{Engine, Limits, Payload};
//!
//! # async fn run() -> Result<(), flowgraph_core::WorkflowError> {
//! let engine = Engine::new(Limits::default())?;
//! let payload = Payload::from_json(r#"{
//!     "nodes": [
//!         {"id": "age", "data": {"value": 25}},
//!         {"id": "check", "data": {"condition": "input >= 18"}}
//!     ],
//!     "edges": [{"id": "e1", "source": "age", "target": "check"}]
//! }"#)?;
//! let report = engine.execute(&payload).await?;
//! assert_eq!(report.status, "ok");
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::config::Limits;
use crate::context::{effective_value, path_tags, ExecutionContext};
use crate::error::{ErrorEntry, Result, ValidationIssue, WorkflowError};
use crate::events::{EventKind, ObserverBus, TracingObserver, WorkflowObserver};
use crate::expr::ExpressionCache;
use crate::graph::WorkflowGraph;
use crate::http::HttpConnector;
use crate::middleware::MiddlewarePipeline;
use crate::nodes::flow::DEFAULT_MAX_CONCURRENCY;
use crate::nodes::resilience::RetryExecutor;
use crate::payload::{Node, NodeType, Payload};
use crate::registry::Registry;
use crate::retry::RetryPolicy;
use crate::validate::{implicit_edges, validate_payload};

/// Monotonic per-run counters, as reported
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Counters {
    pub node_exec: u64,
    pub http_calls: u64,
}

/// The structured outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,

    /// `ok`, `failed`, `timeout`, or `cancelled`
    pub status: String,

    pub duration_ms: u64,

    /// Result object per executed node; skipped nodes are absent
    pub node_results: Map<String, Value>,

    /// The last visualization node's result, or the last executed leaf
    #[serde(rename = "final")]
    pub final_output: Value,

    pub counters: Counters,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ErrorEntry>>,
}

/// The workflow engine
///
/// Construction wires the executor registry, the middleware chain, the
/// pooled HTTP connector and the expression compile cache; each `execute`
/// call gets a fresh [`ExecutionContext`].
pub struct Engine {
    limits: Limits,
    registry: Arc<Registry>,
    pipeline: Arc<MiddlewarePipeline>,
    bus: ObserverBus,
    http: Arc<HttpConnector>,
    expressions: Arc<ExpressionCache>,
}

impl Engine {
    /// Engine with the built-in executor set and a tracing observer
    pub fn new(limits: Limits) -> Result<Self> {
        Ok(Self::with_registry(limits, Registry::with_builtins()?))
    }

    /// Engine over a caller-assembled registry
    pub fn with_registry(limits: Limits, registry: Registry) -> Self {
        let mut bus = ObserverBus::new();
        bus.register(Arc::new(TracingObserver));
        Self {
            pipeline: Arc::new(MiddlewarePipeline::standard(&limits)),
            http: Arc::new(HttpConnector::new(&limits)),
            expressions: Arc::new(ExpressionCache::new(
                limits.expression_cache_size,
                limits.max_recursion_depth,
            )),
            registry: Arc::new(registry),
            bus,
            limits,
        }
    }

    /// Add an observer for workflow events
    pub fn register_observer(&mut self, observer: Arc<dyn WorkflowObserver>) {
        self.bus.register(observer);
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Static checks only; returns every issue found, never executes
    pub fn validate(&self, payload: &Payload) -> Vec<ValidationIssue> {
        let mut payload = payload.clone();
        payload.infer_types();
        validate_payload(&payload, &self.registry)
    }

    /// Run a payload to completion (or failure) under the configured limits
    ///
    /// Pre-run problems surface as typed errors ([`WorkflowError::Cycle`],
    /// [`WorkflowError::Validation`]); runtime failures are reported inside
    /// the returned [`ExecutionReport`] with `status` `failed` / `timeout`.
    pub async fn execute(&self, payload: &Payload) -> Result<ExecutionReport> {
        let mut payload = payload.clone();
        payload.infer_types();

        // Cycles take precedence over other validation problems: a cyclic
        // payload must never reach an executor.
        let implicit = implicit_edges(&payload);
        let graph = Arc::new(WorkflowGraph::build(&payload, &implicit));
        if let Some(path) = graph.detect_cycle() {
            return Err(WorkflowError::Cycle { path });
        }

        let issues = validate_payload(&payload, &self.registry);
        if !issues.is_empty() {
            return Err(WorkflowError::Validation(issues));
        }

        let order = graph.topological_order()?;
        let ctx = ExecutionContext::new(
            self.limits.clone(),
            graph.clone(),
            self.bus.clone(),
            self.http.clone(),
            self.expressions.clone(),
        );

        ctx.emit(EventKind::WorkflowStart {
            node_count: payload.nodes.len(),
        });

        let abort = self.run_in_order(&ctx, &payload, &graph, &order).await;

        let node_results = ctx.results_snapshot().await;
        let final_output = select_final(&payload, &graph, &order, &node_results);
        let status = match &abort {
            None => "ok",
            Some((_, WorkflowError::Timeout { .. })) => "timeout",
            Some((_, WorkflowError::Cancelled(_))) => "cancelled",
            Some(_) => "failed",
        }
        .to_string();
        let errors = abort.as_ref().map(|(node_id, error)| {
            vec![ErrorEntry::from_error(error, node_id.as_deref())]
        });

        let duration_ms = ctx.elapsed_ms();
        ctx.emit(EventKind::WorkflowEnd {
            status: status.clone(),
            duration_ms,
        });

        Ok(ExecutionReport {
            execution_id: ctx.run_id.clone(),
            status,
            duration_ms,
            node_results,
            final_output,
            counters: Counters {
                node_exec: ctx.node_executions(),
                http_calls: ctx.http_calls(),
            },
            errors,
        })
    }

    /// Walk the topological order, batching parallel successors.
    ///
    /// Concurrent work only exists inside a parallel batch, so cancellation
    /// is scoped there: the first failing member aborts the run, in-flight
    /// siblings get the configured drain window to finish, and whatever is
    /// still pending after that is dropped (cancelled). The sequential path
    /// has nothing in flight to drain.
    ///
    /// Returns the aborting `(node id, error)` if the run failed.
    async fn run_in_order(
        &self,
        ctx: &ExecutionContext,
        payload: &Payload,
        graph: &WorkflowGraph,
        order: &[String],
    ) -> Option<(Option<String>, WorkflowError)> {
        use futures::stream::{FuturesUnordered, StreamExt};

        let mut processed: HashSet<String> = HashSet::new();
        let mut position = 0;

        while position < order.len() {
            let id = &order[position];
            if processed.contains(id) {
                position += 1;
                continue;
            }

            let (batch, width) = self
                .parallel_batch(ctx, payload, graph, order, position, &processed)
                .await;

            if batch.len() > 1 {
                let semaphore = Arc::new(Semaphore::new(width.max(1) as usize));
                let mut pending: FuturesUnordered<_> = batch
                    .iter()
                    .map(|node_id| {
                        let semaphore = semaphore.clone();
                        async move {
                            let _permit = semaphore.acquire().await;
                            let outcome = self.run_node(ctx, payload, graph, node_id).await;
                            (node_id.clone(), outcome)
                        }
                    })
                    .collect();

                let mut failure: Option<(Option<String>, WorkflowError)> = None;
                while let Some((node_id, outcome)) = pending.next().await {
                    processed.insert(node_id.clone());
                    if let Err(error) = outcome {
                        failure = Some((Some(node_id), error));
                        break;
                    }
                }

                if failure.is_some() {
                    if !pending.is_empty() {
                        // Bounded drain: siblings already running may finish
                        // inside the window; the first error still wins.
                        let _ = tokio::time::timeout(ctx.limits.drain_window, async {
                            while let Some((node_id, _)) = pending.next().await {
                                processed.insert(node_id);
                            }
                        })
                        .await;
                        drop(pending); // cancels anything that outlived the window
                    }
                    return failure;
                }
            } else {
                let outcome = self.run_node(ctx, payload, graph, id).await;
                processed.insert(id.clone());
                if let Err(error) = outcome {
                    return Some((Some(id.clone()), error));
                }
            }
        }
        None
    }

    /// The set of ready nodes sharing an executed `parallel` parent with
    /// the node at `position`, plus that parent's concurrency bound.
    ///
    /// Falls back to a singleton batch for ordinary nodes.
    async fn parallel_batch(
        &self,
        ctx: &ExecutionContext,
        payload: &Payload,
        graph: &WorkflowGraph,
        order: &[String],
        position: usize,
        processed: &HashSet<String>,
    ) -> (Vec<String>, u64) {
        let id = &order[position];
        let parallel_parent = graph.incoming_edges(id).into_iter().find_map(|edge| {
            payload
                .node(&edge.source)
                .filter(|parent| parent.kind() == Some(NodeType::Parallel))
                .map(|parent| parent.id.clone())
        });

        let parent_id = match parallel_parent {
            Some(parent_id) if ctx.has_result(&parent_id).await => parent_id,
            _ => return (vec![id.clone()], 1),
        };

        let mut batch = vec![id.clone()];
        for candidate in &order[position + 1..] {
            if processed.contains(candidate) {
                continue;
            }
            let edges = graph.incoming_edges(candidate);
            let shares_parent = edges.iter().any(|e| e.source == parent_id);
            let ready = edges.iter().all(|e| processed.contains(&e.source));
            if shares_parent && ready {
                batch.push(candidate.clone());
            }
        }

        let width = payload
            .node(&parent_id)
            .and_then(|parent| parent.data_u64("max_concurrency"))
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);
        (batch, width)
    }

    /// Gate, wrap, and execute a single node
    async fn run_node(
        &self,
        ctx: &ExecutionContext,
        payload: &Payload,
        graph: &WorkflowGraph,
        node_id: &str,
    ) -> Result<()> {
        let node = payload
            .node(node_id)
            .ok_or_else(|| WorkflowError::node_failure(node_id, "node disappeared"))?;

        if !should_execute(ctx, graph, node_id).await {
            ctx.emit(EventKind::NodeSkipped {
                node_id: node_id.to_string(),
            });
            return Ok(());
        }

        let kind = node
            .kind()
            .ok_or_else(|| WorkflowError::node_failure(node_id, "unknown node type"))?;
        let executor = self.registry.get(kind).ok_or_else(|| {
            WorkflowError::node_failure(node_id, format!("no executor for '{}'", kind))
        })?;

        // Wrappers contributed by executed parent nodes.
        let mut timeout_cap: Option<Duration> = None;
        let mut retry_policy: Option<RetryPolicy> = None;
        for edge in graph.incoming_edges(node_id) {
            let parent = match payload.node(&edge.source) {
                Some(parent) => parent,
                None => continue,
            };
            if !ctx.has_result(&parent.id).await {
                continue;
            }
            match parent.kind() {
                Some(NodeType::Timeout) => {
                    if let Some(duration) = parent
                        .data
                        .get("duration")
                        .and_then(crate::nodes::parse_duration)
                    {
                        timeout_cap =
                            Some(timeout_cap.map_or(duration, |cap: Duration| cap.min(duration)));
                    }
                }
                Some(NodeType::Retry) => {
                    retry_policy = Some(RetryExecutor::policy_from(parent));
                }
                _ => {}
            }
        }

        let mut attempts = 0;
        let value = loop {
            let run = self.pipeline.run(ctx, node, executor.as_ref());
            let outcome = match timeout_cap {
                Some(cap) => match tokio::time::timeout(cap, run).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(WorkflowError::node_failure(
                        node_id,
                        format!("timed out after {}ms", cap.as_millis()),
                    )),
                },
                None => run.await,
            };

            match outcome {
                Ok(value) => break value,
                Err(error) => {
                    attempts += 1;
                    let retryable = retry_policy
                        .as_ref()
                        .map(|policy| error.is_transient() && policy.should_retry(attempts))
                        .unwrap_or(false);
                    if !retryable {
                        return Err(error);
                    }
                    let delay = retry_policy
                        .as_ref()
                        .map(|policy| policy.delay(attempts - 1))
                        .unwrap_or_default();
                    ctx.sleep(delay).await?;
                }
            }
        };

        ctx.record_result(node_id, value).await
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("executors", &self.registry.len())
            .field("middleware", &self.pipeline.stages())
            .finish()
    }
}

/// Conditional path termination.
///
/// - No incoming edges: execute.
/// - No incoming edge's source executed: skip (transitive termination).
/// - Any unconditional edge from an executed source: execute.
/// - Otherwise: execute iff some conditional edge's handle matches a tag
///   the source's result publishes.
async fn should_execute(ctx: &ExecutionContext, graph: &WorkflowGraph, node_id: &str) -> bool {
    let incoming = graph.incoming_edges(node_id);
    if incoming.is_empty() {
        return true;
    }

    let mut any_source_executed = false;
    let mut unconditional_hit = false;
    let mut conditional_hit = false;

    for edge in incoming {
        let result = match ctx.result(&edge.source).await {
            Some(result) => result,
            None => continue, // skipped sources are treated as absent
        };
        any_source_executed = true;
        match edge.handle.as_deref() {
            None => unconditional_hit = true,
            Some(handle) => {
                if path_tags(&result).iter().any(|tag| tag == handle) {
                    conditional_hit = true;
                }
            }
        }
    }

    if !any_source_executed {
        return false;
    }
    unconditional_hit || conditional_hit
}

/// The run's final output: the last visualization result in topological
/// order, else the unwrapped value of the last executed leaf.
fn select_final(
    payload: &Payload,
    graph: &WorkflowGraph,
    order: &[String],
    results: &Map<String, Value>,
) -> Value {
    for id in order.iter().rev() {
        if let Some(result) = results.get(id) {
            let kind = payload.node(id).and_then(Node::kind);
            if matches!(kind, Some(NodeType::Visualization) | Some(NodeType::BarChart)) {
                return result.clone();
            }
        }
    }
    for id in order.iter().rev() {
        if let Some(result) = results.get(id) {
            if graph.outgoing_edges(id).is_empty() {
                return effective_value(result).clone();
            }
        }
    }
    for id in order.iter().rev() {
        if let Some(result) = results.get(id) {
            return effective_value(result).clone();
        }
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(text: &str) -> Payload {
        Payload::from_json(text).unwrap()
    }

    #[tokio::test]
    async fn linear_flow_executes_in_order() {
        let engine = Engine::new(Limits::default()).unwrap();
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "a", "data": {"value": 10}},
                    {"id": "double", "type": "map", "data": {"expression": "item * 2"}},
                    {"id": "seq", "type": "range", "data": {"start": 0, "end": 3}}
                ],
                "edges": [{"id": "e1", "source": "seq", "target": "double"}]
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.status, "ok");
        assert_eq!(report.node_results["double"]["results"], json!([0.0, 2.0, 4.0]));
        assert_eq!(report.counters.node_exec, 3);
    }

    #[tokio::test]
    async fn cycle_returns_cycle_error_without_executing() {
        let engine = Engine::new(Limits::default()).unwrap();
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "a", "data": {"value": 1}},
                    {"id": "b", "type": "condition", "data": {"condition": "input > 0"}}
                ],
                "edges": [
                    {"id": "e1", "source": "a", "target": "b"},
                    {"id": "e2", "source": "b", "target": "a"}
                ]
            }"#,
        );
        match engine.execute(&payload).await {
            Err(WorkflowError::Cycle { path }) => assert!(!path.is_empty()),
            other => panic!("expected cycle error, got {:?}", other.map(|r| r.status)),
        }
    }

    #[tokio::test]
    async fn implicit_dependency_orders_execution() {
        let engine = Engine::new(Limits::default()).unwrap();
        // `check` references node.seed.value but has no explicit edge.
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "check", "type": "condition", "data": {"condition": "node.seed.value > 5"}},
                    {"id": "seed", "data": {"value": 10}}
                ],
                "edges": []
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.status, "ok");
        assert_eq!(report.node_results["check"]["condition_met"], json!(true));
    }

    #[tokio::test]
    async fn validation_error_lists_all_issues() {
        let engine = Engine::new(Limits::default()).unwrap();
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "a", "type": "condition", "data": {}},
                    {"id": "b", "type": "number", "data": {"value": "x"}}
                ],
                "edges": []
            }"#,
        );
        match engine.execute(&payload).await {
            Err(WorkflowError::Validation(issues)) => assert!(issues.len() >= 2),
            other => panic!("expected validation error, got {:?}", other.map(|r| r.status)),
        }
    }

    #[tokio::test]
    async fn runtime_failure_produces_failed_report() {
        let engine = Engine::new(Limits::default()).unwrap();
        // Filter over a non-array is fine; reduce over a number is not.
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "n", "data": {"value": 5}},
                    {"id": "r", "type": "reduce", "data": {"expression": "accumulator + item"}}
                ],
                "edges": [{"id": "e1", "source": "n", "target": "r"}]
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.status, "failed");
        let errors = report.errors.unwrap();
        assert_eq!(errors[0].node_id.as_deref(), Some("r"));
        assert!(!report.node_results.contains_key("r"));
    }

    #[tokio::test]
    async fn final_output_prefers_visualization() {
        let engine = Engine::new(Limits::default()).unwrap();
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "seq", "type": "range", "data": {"start": 1, "end": 4}},
                    {"id": "viz", "type": "visualization", "data": {"title": "t"}}
                ],
                "edges": [{"id": "e1", "source": "seq", "target": "viz"}]
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.final_output["kind"], json!("visualization"));
        assert_eq!(report.final_output["data"], json!([1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn parallel_successors_run_and_join() {
        let engine = Engine::new(Limits::default()).unwrap();
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "seq", "type": "range", "data": {"start": 1, "end": 4}},
                    {"id": "fan", "type": "parallel", "data": {"max_concurrency": 2}},
                    {"id": "sum", "type": "reduce", "data": {"expression": "accumulator + item"}},
                    {"id": "count", "type": "map", "data": {"expression": "item * 0 + 1"}},
                    {"id": "gather", "type": "join", "data": {"strategy": "all"}}
                ],
                "edges": [
                    {"id": "e1", "source": "seq", "target": "fan"},
                    {"id": "e2", "source": "fan", "target": "sum"},
                    {"id": "e3", "source": "fan", "target": "count"},
                    {"id": "e4", "source": "sum", "target": "gather"},
                    {"id": "e5", "source": "count", "target": "gather"}
                ]
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.status, "ok");
        assert_eq!(report.node_results["sum"]["result"], json!(6.0));
        assert_eq!(report.node_results["gather"]["count"], json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failure_drains_within_the_window_then_cancels() {
        let engine = Engine::new(Limits::default()).unwrap();
        // fan's successors run as one batch: `bad` fails immediately,
        // `slow` sleeps far past the 2s drain window and must be cancelled.
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "seed", "data": {"value": 5}},
                    {"id": "fan", "type": "parallel", "data": {}},
                    {"id": "bad", "type": "reduce", "data": {"expression": "accumulator + item"}},
                    {"id": "slow", "type": "delay", "data": {"duration": "10s"}}
                ],
                "edges": [
                    {"id": "e1", "source": "seed", "target": "fan"},
                    {"id": "e2", "source": "fan", "target": "bad"},
                    {"id": "e3", "source": "fan", "target": "slow"}
                ]
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.status, "failed");
        assert_eq!(report.errors.unwrap()[0].node_id.as_deref(), Some("bad"));
        assert!(!report.node_results.contains_key("slow"));
        // The run waited out the drain window, not the full 10s delay.
        assert!(report.duration_ms >= 2_000);
        assert!(report.duration_ms < 10_000);
    }

    #[tokio::test]
    async fn budget_overrun_fails_the_run() {
        let limits = Limits {
            max_node_executions: 1,
            ..Limits::default()
        };
        let engine = Engine::new(limits).unwrap();
        let payload = payload(
            r#"{
                "nodes": [
                    {"id": "a", "data": {"value": 1}},
                    {"id": "b", "data": {"value": 2}}
                ],
                "edges": []
            }"#,
        );
        let report = engine.execute(&payload).await.unwrap();
        assert_eq!(report.status, "failed");
        assert_eq!(report.errors.unwrap()[0].kind, "BudgetError");
        assert!(report.counters.node_exec <= 2);
    }
}
