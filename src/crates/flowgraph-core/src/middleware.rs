//! Middleware pipeline wrapping every executor call
//!
//! Each node invocation flows through an ordered decorator chain, built once
//! per engine:
//!
//! ```text
//! Validation ─► Logging ─► RateLimit ─► Timeout ─► Retry ─► [CircuitBreaker] ─► Executor
//! ```
//!
//! Every middleware implements `process(ctx, node, next)`; a failure in an
//! earlier stage short-circuits the rest (a validation rejection never
//! reaches retry). The chain shape is deterministic: ordering is fixed at
//! construction, and the circuit breaker tail is only present when enabled
//! in the limits profile.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;

use crate::config::Limits;
use crate::context::ExecutionContext;
use crate::error::{Result, WorkflowError};
use crate::events::EventKind;
use crate::payload::Node;
use crate::registry::NodeExecutor;
use crate::retry::RetryPolicy;

/// One stage of the pipeline
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value>;
}

/// Continuation handle: the remaining stages plus the terminal executor
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    executor: &'a dyn NodeExecutor,
}

impl<'a> Next<'a> {
    /// The terminal executor, for stages that need its static hooks
    pub fn executor(&self) -> &'a dyn NodeExecutor {
        self.executor
    }

    /// Run the remaining chain
    pub fn run(self, ctx: &'a ExecutionContext, node: &'a Node) -> BoxFuture<'a, Result<Value>> {
        Box::pin(async move {
            match self.stack.split_first() {
                Some((head, rest)) => {
                    head.process(
                        ctx,
                        node,
                        Next {
                            stack: rest,
                            executor: self.executor,
                        },
                    )
                    .await
                }
                None => self.executor.execute(ctx, node).await,
            }
        })
    }
}

/// The built chain
pub struct MiddlewarePipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    /// Standard chain per the active limits profile
    pub fn standard(limits: &Limits) -> Self {
        let mut chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ValidationMiddleware),
            Arc::new(LoggingMiddleware),
            Arc::new(RateLimitMiddleware),
            Arc::new(TimeoutMiddleware),
            Arc::new(RetryMiddleware {
                policy: RetryPolicy::new(limits.default_max_attempts)
                    .with_base(limits.default_backoff)
                    .with_jitter_factor(limits.jitter_factor),
            }),
        ];
        if limits.circuit_breaker_enabled {
            chain.push(Arc::new(CircuitBreakerMiddleware::new(
                limits.circuit_breaker_threshold,
                limits.circuit_breaker_cooldown,
            )));
        }
        Self { chain }
    }

    /// Custom chain, for tests and embedders
    pub fn from_chain(chain: Vec<Arc<dyn Middleware>>) -> Self {
        Self { chain }
    }

    /// Stage names in order
    pub fn stages(&self) -> Vec<&'static str> {
        self.chain.iter().map(|m| m.name()).collect()
    }

    /// Run a node through the full chain down to `executor`
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        executor: &dyn NodeExecutor,
    ) -> Result<Value> {
        Next {
            stack: &self.chain,
            executor,
        }
        .run(ctx, node)
        .await
    }
}

// ---- stages ----

/// Runs the executor's static checks right before execution
pub struct ValidationMiddleware;

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value> {
        let issues = next.executor().validate(node);
        if !issues.is_empty() {
            return Err(WorkflowError::Validation(issues));
        }
        next.run(ctx, node).await
    }
}

/// Emits node lifecycle events and spans around the rest of the chain
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value> {
        use tracing::Instrument;

        let node_type = node.node_type.clone().unwrap_or_default();
        let span = tracing::debug_span!("node", id = %node.id, node_type = %node_type);

        ctx.emit(EventKind::NodeStart {
            node_id: node.id.clone(),
            node_type,
        });
        let started = Instant::now();
        let outcome = next.run(ctx, node).instrument(span).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => ctx.emit(EventKind::NodeSuccess {
                node_id: node.id.clone(),
                duration_ms,
            }),
            Err(error) => ctx.emit(EventKind::NodeFailure {
                node_id: node.id.clone(),
                kind: error.kind().to_string(),
                message: error.to_string(),
            }),
        }
        outcome
    }
}

/// Enforces the per-run execution budgets and the run deadline.
///
/// This is the backpressure stage of the chain: a run that overruns its
/// node-execution cap or its deadline stops here, before any further work.
pub struct RateLimitMiddleware;

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value> {
        ctx.check_deadline()?;
        ctx.count_node_execution()?;
        next.run(ctx, node).await
    }
}

/// Bounds each node call by the run deadline (and an optional per-node
/// `timeout_ms` override from the node's data)
pub struct TimeoutMiddleware;

#[async_trait]
impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value> {
        let remaining = ctx.remaining();
        let budget = match node.data_u64("timeout_ms") {
            Some(ms) => remaining.min(Duration::from_millis(ms)),
            None => remaining,
        };
        match tokio::time::timeout(budget, next.run(ctx, node)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(WorkflowError::Timeout {
                operation: format!("node '{}'", node.id),
                duration_ms: budget.as_millis() as u64,
            }),
        }
    }
}

/// Retries transient failures with exponential backoff
pub struct RetryMiddleware {
    pub policy: RetryPolicy,
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value> {
        let mut attempts = 0;
        loop {
            match next.run(ctx, node).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    attempts += 1;
                    if !error.is_transient() || !self.policy.should_retry(attempts) {
                        return Err(error);
                    }
                    let delay = self.policy.delay(attempts - 1);
                    if delay >= ctx.remaining() {
                        return Err(error);
                    }
                    tracing::debug!(
                        node = %node.id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

impl BreakerState {
    fn label(&self) -> &'static str {
        match self {
            BreakerState::Closed { .. } => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Optional tail stage: one breaker per node type.
///
/// `threshold` consecutive failures open the breaker; while open, calls are
/// rejected without reaching the executor. After `cooldown` the next call
/// probes in half-open state: success closes the breaker, failure re-opens.
pub struct CircuitBreakerMiddleware {
    threshold: u32,
    cooldown: Duration,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreakerMiddleware {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn transition(
        &self,
        ctx: &ExecutionContext,
        scope: &str,
        from: BreakerState,
        to: BreakerState,
    ) {
        if from.label() != to.label() {
            ctx.emit(EventKind::CircuitBreakerStateChange {
                scope: scope.to_string(),
                from: from.label().to_string(),
                to: to.label().to_string(),
            });
        }
    }
}

#[async_trait]
impl Middleware for CircuitBreakerMiddleware {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    async fn process(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        next: Next<'_>,
    ) -> Result<Value> {
        let scope = node.node_type.clone().unwrap_or_else(|| "unknown".into());

        // Admission check.
        {
            let mut breakers = match self.breakers.lock() {
                Ok(b) => b,
                Err(poisoned) => poisoned.into_inner(),
            };
            let state = breakers
                .entry(scope.clone())
                .or_insert(BreakerState::Closed { failures: 0 });
            match *state {
                BreakerState::Open { since } => {
                    if since.elapsed() < self.cooldown {
                        return Err(WorkflowError::CircuitOpen {
                            scope: scope.clone(),
                        });
                    }
                    let from = *state;
                    *state = BreakerState::HalfOpen;
                    self.transition(ctx, &scope, from, BreakerState::HalfOpen);
                }
                BreakerState::Closed { .. } | BreakerState::HalfOpen => {}
            }
        }

        let outcome = next.run(ctx, node).await;

        let mut breakers = match self.breakers.lock() {
            Ok(b) => b,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = breakers
            .entry(scope.clone())
            .or_insert(BreakerState::Closed { failures: 0 });
        let from = *state;
        match &outcome {
            Ok(_) => {
                *state = BreakerState::Closed { failures: 0 };
                self.transition(ctx, &scope, from, *state);
            }
            Err(_) => {
                let failures = match from {
                    BreakerState::Closed { failures } => failures + 1,
                    _ => self.threshold,
                };
                *state = if failures >= self.threshold {
                    BreakerState::Open {
                        since: Instant::now(),
                    }
                } else {
                    BreakerState::Closed { failures }
                };
                self.transition(ctx, &scope, from, *state);
            }
        }
        outcome
    }
}
