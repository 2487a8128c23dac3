//! Workflow and node lifecycle events
//!
//! The engine emits an event at every lifecycle transition; the
//! [`ObserverBus`] fans each one out to zero or more registered
//! [`WorkflowObserver`]s. Wiring events to a concrete telemetry stack is the
//! embedder's business; the built-in [`TracingObserver`] forwards everything
//! to `tracing` and is installed by default.
//!
//! Events never carry full URLs or header values, only hostnames.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Envelope common to all events
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEvent {
    /// Execution id of the run
    pub run_id: String,
    /// Wall-clock timestamp
    pub at: DateTime<Utc>,
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
    /// What happened
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Lifecycle transitions
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStart {
        node_count: usize,
    },
    WorkflowEnd {
        status: String,
        duration_ms: u64,
    },
    NodeStart {
        node_id: String,
        node_type: String,
    },
    NodeSkipped {
        node_id: String,
    },
    NodeSuccess {
        node_id: String,
        duration_ms: u64,
    },
    NodeFailure {
        node_id: String,
        kind: String,
        message: String,
    },
    HttpRequestStart {
        host: String,
        method: String,
    },
    HttpRequestEnd {
        host: String,
        status: u16,
        duration_ms: u64,
        size: usize,
    },
    RateLimitHit {
        node_id: String,
        wait_ms: u64,
    },
    CircuitBreakerStateChange {
        scope: String,
        from: String,
        to: String,
    },
}

/// A listener for workflow events
///
/// Implementations must be cheap and non-blocking; the engine calls them
/// inline on the execution path.
pub trait WorkflowObserver: Send + Sync {
    fn on_event(&self, event: &WorkflowEvent);
}

/// Fan-out of events to registered observers
#[derive(Clone, Default)]
pub struct ObserverBus {
    observers: Vec<Arc<dyn WorkflowObserver>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn WorkflowObserver>) {
        self.observers.push(observer);
    }

    pub fn emit(&self, event: &WorkflowEvent) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl std::fmt::Debug for ObserverBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBus")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Forwards every event to `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl WorkflowObserver for TracingObserver {
    fn on_event(&self, event: &WorkflowEvent) {
        match &event.kind {
            EventKind::WorkflowStart { node_count } => {
                tracing::info!(run_id = %event.run_id, node_count, "workflow started");
            }
            EventKind::WorkflowEnd { status, duration_ms } => {
                tracing::info!(run_id = %event.run_id, status = %status, duration_ms, "workflow finished");
            }
            EventKind::NodeStart { node_id, node_type } => {
                tracing::debug!(run_id = %event.run_id, node = %node_id, node_type = %node_type, "node started");
            }
            EventKind::NodeSkipped { node_id } => {
                tracing::debug!(run_id = %event.run_id, node = %node_id, "node skipped");
            }
            EventKind::NodeSuccess { node_id, duration_ms } => {
                tracing::debug!(run_id = %event.run_id, node = %node_id, duration_ms, "node succeeded");
            }
            EventKind::NodeFailure { node_id, kind, message } => {
                tracing::warn!(run_id = %event.run_id, node = %node_id, kind = %kind, message = %message, "node failed");
            }
            EventKind::HttpRequestStart { host, method } => {
                tracing::debug!(run_id = %event.run_id, host = %host, method = %method, "http request");
            }
            EventKind::HttpRequestEnd { host, status, duration_ms, size } => {
                tracing::debug!(run_id = %event.run_id, host = %host, status, duration_ms, size, "http response");
            }
            EventKind::RateLimitHit { node_id, wait_ms } => {
                tracing::debug!(run_id = %event.run_id, node = %node_id, wait_ms, "rate limit hit");
            }
            EventKind::CircuitBreakerStateChange { scope, from, to } => {
                tracing::warn!(run_id = %event.run_id, scope = %scope, from = %from, to = %to, "circuit breaker state change");
            }
        }
    }
}

/// Records events in memory; test helper
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Count of events matching the given wire tag (`node_start`, ...)
    pub fn count(&self, tag: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| event_tag(&e.kind) == tag)
            .count()
    }
}

impl WorkflowObserver for CollectingObserver {
    fn on_event(&self, event: &WorkflowEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

fn event_tag(kind: &EventKind) -> &'static str {
    match kind {
        EventKind::WorkflowStart { .. } => "workflow_start",
        EventKind::WorkflowEnd { .. } => "workflow_end",
        EventKind::NodeStart { .. } => "node_start",
        EventKind::NodeSkipped { .. } => "node_skipped",
        EventKind::NodeSuccess { .. } => "node_success",
        EventKind::NodeFailure { .. } => "node_failure",
        EventKind::HttpRequestStart { .. } => "http_request_start",
        EventKind::HttpRequestEnd { .. } => "http_request_end",
        EventKind::RateLimitHit { .. } => "rate_limit_hit",
        EventKind::CircuitBreakerStateChange { .. } => "circuit_breaker_state_change",
    }
}
