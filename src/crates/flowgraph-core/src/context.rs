//! Per-run execution context shared with every executor
//!
//! One [`ExecutionContext`] is created at run start and dropped at run end.
//! It owns:
//!
//! - the write-once node result store (concurrent reads, keyed writes)
//! - the [`StateManager`] (variables, context, accumulator, counter, cache)
//! - the monotonic `node_exec` / `http_calls` counters and their caps
//! - the absolute run deadline every suspension point observes
//! - the observer bus and shared HTTP connector
//! - per-node throttle and fixed-window rate-limiter cells
//!
//! Executors receive the context by `Arc` and must not hold locks across
//! await points; every method here takes and releases its lock internally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::Limits;
use crate::error::{Result, WorkflowError};
use crate::events::{EventKind, ObserverBus, WorkflowEvent};
use crate::expr::{ExpressionCache, RegexCache, Scope};
use crate::graph::WorkflowGraph;
use crate::http::HttpConnector;
use crate::state::StateManager;

/// Mutable per-run state shared with executors
pub struct ExecutionContext {
    /// Unique id for this run
    pub run_id: String,

    /// Active limits profile
    pub limits: Limits,

    /// Run state: variables, context, accumulator, counter, cache
    pub state: StateManager,

    /// Shared HTTP connector (pooled client + SSRF guard)
    pub http: Arc<HttpConnector>,

    /// Compiled-expression cache shared across the run
    pub expressions: Arc<ExpressionCache>,

    /// Compiled `matches` patterns, shared by every scope this run builds
    regexes: Arc<RegexCache>,

    graph: Arc<WorkflowGraph>,
    bus: ObserverBus,
    started: Instant,
    deadline: Instant,
    results: RwLock<Map<String, Value>>,
    node_exec: AtomicU64,
    http_calls: AtomicU64,
    /// node id -> earliest instant the next call may start
    throttle: Mutex<HashMap<String, Instant>>,
    /// node id -> (window start, requests in window)
    rate_windows: Mutex<HashMap<String, (Instant, u64)>>,
}

impl ExecutionContext {
    pub fn new(
        limits: Limits,
        graph: Arc<WorkflowGraph>,
        bus: ObserverBus,
        http: Arc<HttpConnector>,
        expressions: Arc<ExpressionCache>,
    ) -> Self {
        let started = Instant::now();
        let deadline = started + limits.max_execution_time;
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            state: StateManager::new(&limits),
            limits,
            http,
            expressions,
            regexes: Arc::new(RegexCache::new()),
            graph,
            bus,
            started,
            deadline,
            results: RwLock::new(Map::new()),
            node_exec: AtomicU64::new(0),
            http_calls: AtomicU64::new(0),
            throttle: Mutex::new(HashMap::new()),
            rate_windows: Mutex::new(HashMap::new()),
        }
    }

    // ---- deadline ----

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the run deadline, zero when past it
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Error out when the run deadline has passed
    pub fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            Err(WorkflowError::Timeout {
                operation: "workflow".into(),
                duration_ms: self.limits.max_execution_time.as_millis() as u64,
            })
        } else {
            Ok(())
        }
    }

    /// Sleep for `wanted`, truncated by the run deadline.
    ///
    /// Returns an error if the deadline fires first.
    pub async fn sleep(&self, wanted: Duration) -> Result<()> {
        let remaining = self.remaining();
        if wanted <= remaining {
            tokio::time::sleep(wanted).await;
            Ok(())
        } else {
            tokio::time::sleep(remaining).await;
            Err(WorkflowError::Timeout {
                operation: "sleep".into(),
                duration_ms: self.limits.max_execution_time.as_millis() as u64,
            })
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    // ---- results ----

    /// Record a node result; writing twice is an internal error
    pub async fn record_result(&self, node_id: &str, value: Value) -> Result<()> {
        let mut results = self.results.write().await;
        if results.contains_key(node_id) {
            return Err(WorkflowError::Custom(format!(
                "result for node '{}' written twice",
                node_id
            )));
        }
        results.insert(node_id.to_string(), value);
        Ok(())
    }

    pub async fn result(&self, node_id: &str) -> Option<Value> {
        self.results.read().await.get(node_id).cloned()
    }

    pub async fn has_result(&self, node_id: &str) -> bool {
        self.results.read().await.contains_key(node_id)
    }

    pub async fn results_snapshot(&self) -> Map<String, Value> {
        self.results.read().await.clone()
    }

    // ---- counters ----

    /// Count one node invocation, enforcing the budget
    pub fn count_node_execution(&self) -> Result<u64> {
        let next = self.node_exec.fetch_add(1, Ordering::SeqCst) + 1;
        if next > self.limits.max_node_executions {
            return Err(WorkflowError::Budget {
                resource: "node_executions".into(),
                limit: self.limits.max_node_executions,
            });
        }
        Ok(next)
    }

    /// Count one outbound HTTP call, enforcing the budget
    pub fn count_http_call(&self) -> Result<u64> {
        let next = self.http_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if next > self.limits.max_http_calls {
            return Err(WorkflowError::Budget {
                resource: "http_calls".into(),
                limit: self.limits.max_http_calls,
            });
        }
        Ok(next)
    }

    pub fn node_executions(&self) -> u64 {
        self.node_exec.load(Ordering::SeqCst)
    }

    pub fn http_calls(&self) -> u64 {
        self.http_calls.load(Ordering::SeqCst)
    }

    // ---- graph access ----

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Effective values of executed sources over *taken* incoming edges,
    /// in edge order
    pub async fn incoming_values(&self, node_id: &str) -> Vec<Value> {
        let results = self.results.read().await;
        let mut out = Vec::new();
        for edge in self.graph.incoming_edges(node_id) {
            if let Some(result) = results.get(&edge.source) {
                let taken = match edge.handle.as_deref() {
                    None => true,
                    Some(handle) => path_tags(result).iter().any(|t| t == handle),
                };
                if taken {
                    out.push(effective_value(result).clone());
                }
            }
        }
        out
    }

    /// The single upstream value bound to `input` in expressions; `Null`
    /// when the node has no executed upstream
    pub async fn primary_input(&self, node_id: &str) -> Value {
        self.incoming_values(node_id)
            .await
            .into_iter()
            .next()
            .unwrap_or(Value::Null)
    }

    /// Build an expression scope snapshot with `input` bound
    pub async fn scope_with_input(&self, input: Value) -> Scope {
        let scope = match self.limits.sample_seed {
            Some(seed) => Scope::with_seed(seed),
            None => Scope::new(),
        };
        scope
            .with_input(input)
            .with_variables(self.state.variables_snapshot().await)
            .with_context(self.state.context_snapshot().await)
            .with_nodes(self.results_snapshot().await)
            .with_regex_budget(self.limits.regex_time_budget)
            .with_regex_cache(self.regexes.clone())
    }

    /// Scope for a node, with its primary input pre-bound
    pub async fn scope_for(&self, node_id: &str) -> Scope {
        let input = self.primary_input(node_id).await;
        self.scope_with_input(input).await
    }

    // ---- events ----

    pub fn emit(&self, kind: EventKind) {
        self.bus.emit(&WorkflowEvent {
            run_id: self.run_id.clone(),
            at: chrono::Utc::now(),
            elapsed_ms: self.elapsed_ms(),
            kind,
        });
    }

    // ---- throttle / rate limiter cells ----

    /// Minimum-gap throttle: returns how long the caller must sleep before
    /// its call slot starts. The slot is reserved immediately.
    pub fn throttle_reserve(&self, node_id: &str, gap: Duration) -> Duration {
        let now = Instant::now();
        let mut slots = match self.throttle.lock() {
            Ok(slots) => slots,
            Err(_) => return Duration::ZERO,
        };
        let next_free = slots.get(node_id).copied().unwrap_or(now);
        let start = next_free.max(now);
        slots.insert(node_id.to_string(), start + gap);
        start.saturating_duration_since(now)
    }

    /// Fixed-window rate limiter: returns how long the caller must sleep
    /// before its request may proceed. The request is counted immediately
    /// (against the rolled-over window when a wait is required).
    pub fn rate_limit_reserve(
        &self,
        node_id: &str,
        max_requests: u64,
        window: Duration,
    ) -> Duration {
        let now = Instant::now();
        let mut windows = match self.rate_windows.lock() {
            Ok(windows) => windows,
            Err(_) => return Duration::ZERO,
        };
        let entry = windows.entry(node_id.to_string()).or_insert((now, 0));
        let (start, count) = *entry;

        if now >= start + window {
            // Window rolled over naturally.
            *entry = (now, 1);
            Duration::ZERO
        } else if count < max_requests.max(1) {
            *entry = (start, count + 1);
            Duration::ZERO
        } else {
            // Saturated: the request lands in the next window.
            let next_start = start + window;
            *entry = (next_start, 1);
            next_start.saturating_duration_since(now)
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("node_exec", &self.node_executions())
            .field("http_calls", &self.http_calls())
            .finish()
    }
}

/// Unwrap the payload a downstream consumer should see from a result object.
///
/// Executors return structured result objects; the carried datum lives under
/// a well-known key depending on the node family.
pub fn effective_value(result: &Value) -> &Value {
    if let Value::Object(map) = result {
        for key in ["value", "filtered", "results", "result", "final_value"] {
            if let Some(v) = map.get(key) {
                return v;
            }
        }
    }
    result
}

/// Path tags a result publishes for conditional edge matching.
///
/// - condition: `"true"` or `"false"` from `condition_met`
/// - switch: its `output_path`
/// - split: every declared path in `paths`
/// - try_catch: its `path` (`"try"` or `"catch"`)
pub fn path_tags(result: &Value) -> Vec<String> {
    let map = match result {
        Value::Object(map) => map,
        _ => return Vec::new(),
    };
    if let Some(met) = map.get("condition_met").and_then(Value::as_bool) {
        return vec![if met { "true" } else { "false" }.to_string()];
    }
    if let Some(path) = map.get("output_path").and_then(Value::as_str) {
        return vec![path.to_string()];
    }
    if let Some(paths) = map.get("paths").and_then(Value::as_array) {
        return paths
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.to_string())
            .collect();
    }
    if let Some(path) = map.get("path").and_then(Value::as_str) {
        return vec![path.to_string()];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context(limits: Limits) -> ExecutionContext {
        let graph = Arc::new(WorkflowGraph::build(&Default::default(), &[]));
        let http = Arc::new(HttpConnector::new(&limits));
        let expressions = Arc::new(ExpressionCache::new(64, 64));
        ExecutionContext::new(limits, graph, ObserverBus::new(), http, expressions)
    }

    #[tokio::test]
    async fn results_are_write_once() {
        let ctx = test_context(Limits::default());
        ctx.record_result("a", json!(1)).await.unwrap();
        assert!(ctx.record_result("a", json!(2)).await.is_err());
        assert_eq!(ctx.result("a").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn node_budget_trips() {
        let limits = Limits {
            max_node_executions: 2,
            ..Limits::default()
        };
        let ctx = test_context(limits);
        ctx.count_node_execution().unwrap();
        ctx.count_node_execution().unwrap();
        assert!(matches!(
            ctx.count_node_execution(),
            Err(WorkflowError::Budget { .. })
        ));
    }

    #[tokio::test]
    async fn http_budget_trips() {
        let limits = Limits {
            max_http_calls: 1,
            ..Limits::default()
        };
        let ctx = test_context(limits);
        ctx.count_http_call().unwrap();
        assert!(ctx.count_http_call().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_window_rolls_over() {
        let ctx = test_context(Limits::default());
        let window = Duration::from_secs(1);

        assert_eq!(ctx.rate_limit_reserve("n", 2, window), Duration::ZERO);
        assert_eq!(ctx.rate_limit_reserve("n", 2, window), Duration::ZERO);
        // Third request saturates the window and must wait for rollover.
        let wait = ctx.rate_limit_reserve("n", 2, window);
        assert!(wait > Duration::ZERO && wait <= window);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ctx.rate_limit_reserve("n", 2, window), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_enforces_minimum_gap() {
        let ctx = test_context(Limits::default());
        let gap = Duration::from_millis(100);

        assert_eq!(ctx.throttle_reserve("n", gap), Duration::ZERO);
        let wait = ctx.throttle_reserve("n", gap);
        assert_eq!(wait, gap);
        let wait2 = ctx.throttle_reserve("n", gap);
        assert_eq!(wait2, gap * 2);
    }

    #[test]
    fn effective_value_unwraps_known_keys() {
        assert_eq!(effective_value(&json!({"value": 7})), &json!(7));
        assert_eq!(effective_value(&json!({"filtered": [1]})), &json!([1]));
        assert_eq!(effective_value(&json!({"result": 15})), &json!(15));
        assert_eq!(effective_value(&json!(3)), &json!(3));
    }

    #[test]
    fn path_tags_by_result_shape() {
        assert_eq!(
            path_tags(&json!({"condition_met": true, "value": 1})),
            vec!["true"]
        );
        assert_eq!(
            path_tags(&json!({"condition_met": false})),
            vec!["false"]
        );
        assert_eq!(
            path_tags(&json!({"output_path": "nf", "matched": true})),
            vec!["nf"]
        );
        assert_eq!(
            path_tags(&json!({"paths": ["a", "b"], "value": 1})),
            vec!["a", "b"]
        );
        assert_eq!(path_tags(&json!({"path": "catch"})), vec!["catch"]);
        assert!(path_tags(&json!(42)).is_empty());
    }
}
