//! # flowgraph-core
//!
//! A dataflow workflow engine: give it a JSON (or YAML) description of a
//! DAG of typed nodes and it validates the graph, plans a stable execution
//! order, and evaluates each node, passing intermediate results along the
//! edges into a per-node result map and a final output.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │                                                              │
//! │  Payload ─► Validator ─► Graph ─► topological order          │
//! │                                      │                       │
//! │            ┌─────────────────────────▼─────────────────────┐ │
//! │            │ per node: should_execute? ─► middleware chain │ │
//! │            │   validation → logging → budgets → timeout    │ │
//! │            │   → retry → [circuit breaker] → executor      │ │
//! │            └─────────────────────────┬─────────────────────┘ │
//! │                                      │                       │
//! │   State manager ◄── results ◄────────┘                       │
//! │   (variables, context, accumulator, counter, TTL cache)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Highlights
//!
//! - **Conditional routing**: edges carry named source handles; condition,
//!   switch, split and try_catch nodes publish path tags, and paths that
//!   don't match terminate transitively.
//! - **Sandboxed expressions**: a small deterministic language (no host
//!   eval) with a fixed function set, used by every control-flow node, with
//!   compile-time dependency extraction feeding implicit edges.
//! - **Budgets everywhere**: run deadline, node execution and HTTP call
//!   caps, iteration guards, data-shape limits. Exceeding any fails the run.
//! - **Zero-trust HTTP**: the SSRF guard rejects private, loopback,
//!   link-local and cloud-metadata destinations before connecting and
//!   re-validates every redirect hop; bodies are read against a size cap.
//! - **Observability**: lifecycle events fan out to registered observers;
//!   a `tracing` observer ships built-in.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use flowgraph_core::{Engine, Limits, Payload};
//!
//! # async fn demo() -> Result<(), flowgraph_core::WorkflowError> {
//! let payload = Payload::from_json(r#"{
//!     "nodes": [
//!         {"id": "ages", "type": "range", "data": {"start": 10, "end": 40, "step": 10}},
//!         {"id": "adults", "type": "filter", "data": {"condition": "item >= 18"}}
//!     ],
//!     "edges": [{"id": "e1", "source": "ages", "target": "adults"}]
//! }"#)?;
//!
//! let engine = Engine::new(Limits::default())?;
//! let report = engine.execute(&payload).await?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod expr;
pub mod graph;
pub mod http;
pub mod middleware;
pub mod nodes;
pub mod payload;
pub mod registry;
pub mod retry;
pub mod state;
pub mod validate;

pub use config::Limits;
pub use context::ExecutionContext;
pub use engine::{Counters, Engine, ExecutionReport};
pub use error::{ErrorEntry, IssueKind, Result, ValidationIssue, WorkflowError};
pub use events::{EventKind, ObserverBus, TracingObserver, WorkflowEvent, WorkflowObserver};
pub use expr::{compile, CompiledExpression, ExpressionCache, Scope};
pub use graph::WorkflowGraph;
pub use http::HttpConnector;
pub use middleware::{Middleware, MiddlewarePipeline, Next};
pub use payload::{Edge, Node, NodeType, Payload};
pub use registry::{NodeExecutor, Registry};
pub use retry::{RetryPolicy, RetryState};
pub use state::StateManager;
