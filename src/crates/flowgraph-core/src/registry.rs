//! Executor contract and registry
//!
//! The registry is the engine's single extension point: every node kind,
//! built-in or embedder-added, implements [`NodeExecutor`] and registers
//! under its type tag. Validation and execution are separate methods so the
//! validator can run executor-specific checks before anything executes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{Result, ValidationIssue, WorkflowError};
use crate::payload::{Node, NodeType};

/// One node kind's behavior
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The tag this executor handles
    fn node_type(&self) -> NodeType;

    /// Static checks over the node's `data`; returns every issue found
    fn validate(&self, _node: &Node) -> Vec<ValidationIssue> {
        Vec::new()
    }

    /// Execute the node and return its result object
    async fn execute(&self, ctx: &ExecutionContext, node: &Node) -> Result<Value>;
}

/// Type tag → executor mapping
#[derive(Default)]
pub struct Registry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl Registry {
    /// An empty registry; use [`Registry::with_builtins`] for the full set
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in executor installed
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        crate::nodes::install_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register an executor; a duplicate tag is a construction-time error
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) -> Result<()> {
        let tag = executor.node_type();
        if self.executors.contains_key(&tag) {
            return Err(WorkflowError::Configuration(format!(
                "executor for '{}' registered twice",
                tag
            )));
        }
        self.executors.insert(tag, executor);
        Ok(())
    }

    /// Look up the executor for a tag
    pub fn get(&self, tag: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&tag).cloned()
    }

    /// Registered tags, sorted
    pub fn types(&self) -> Vec<NodeType> {
        let mut tags: Vec<_> = self.executors.keys().copied().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types())
            .finish()
    }
}
