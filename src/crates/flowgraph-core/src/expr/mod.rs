//! Sandboxed expression mini-language
//!
//! Every control-flow node (condition, switch, filter, map, reduce, loops)
//! and the `{{…}}` template interpolation of the HTTP node share this one
//! language. The pipeline:
//!
//! ```text
//! source ──► lexer ──► parser ──► CompiledExpression ──► evaluate(scope)
//!                                   │
//!                                   └─ dependencies():  node.<id> refs,
//!                                      used by the engine for implicit edges
//! ```
//!
//! Compilation is cached by source string in a bounded LRU shared across the
//! run; evaluation is pure over a [`Scope`] snapshot so replays are
//! deterministic.
//!
//! # Examples
//!
//! ```rust
//! use flowgraph_core::expr::{compile, Scope};
//! use serde_json::json;
//!
//! let expr = compile("input.age >= 18 && input.age < 65", 64).unwrap();
//! let scope = Scope::new().with_input(json!({"age": 30}));
//! assert_eq!(expr.evaluate(&scope).unwrap(), json!(true));
//! ```

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{Result, WorkflowError};
pub use ast::Expr;
pub use eval::{display, loose_eq, truthy, type_name, RegexCache, Scope, BUILTIN_NAMES};

/// A parsed, reusable expression
#[derive(Debug)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
    dependencies: BTreeSet<String>,
}

impl CompiledExpression {
    /// The original source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Node ids referenced via `node.<id>...` paths
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Evaluate against a scope snapshot
    pub fn evaluate(&self, scope: &Scope) -> Result<Value> {
        eval::evaluate(&self.ast, scope)
    }

    /// Evaluate and coerce the result to a boolean with truthiness rules
    pub fn evaluate_bool(&self, scope: &Scope) -> Result<bool> {
        Ok(truthy(&self.evaluate(scope)?))
    }

    /// Evaluate and require a boolean result (strict mode)
    pub fn evaluate_strict_bool(&self, scope: &Scope) -> Result<bool> {
        match self.evaluate(scope)? {
            Value::Bool(b) => Ok(b),
            other => Err(WorkflowError::eval(format!(
                "expected a boolean result, got {}",
                type_name(&other)
            ))),
        }
    }
}

/// Compile a source string without caching
pub fn compile(source: &str, max_depth: usize) -> Result<CompiledExpression> {
    let ast = parser::parse(source, max_depth)?;
    let dependencies = ast.dependencies();
    Ok(CompiledExpression {
        source: source.to_string(),
        ast,
        dependencies,
    })
}

/// Bounded LRU of compiled expressions, keyed by source string
///
/// Shared across a run (and safely across runs); a hit refreshes recency,
/// inserts evict the least recently used entry once `capacity` is reached.
pub struct ExpressionCache {
    capacity: usize,
    max_depth: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    map: HashMap<String, Arc<CompiledExpression>>,
    recency: VecDeque<String>,
}

impl ExpressionCache {
    pub fn new(capacity: usize, max_depth: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            max_depth,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                recency: VecDeque::new(),
            }),
        }
    }

    /// Fetch or compile `source`
    pub fn get(&self, source: &str) -> Result<Arc<CompiledExpression>> {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(hit) = inner.map.get(source).cloned() {
                if let Some(idx) = inner.recency.iter().position(|k| k == source) {
                    inner.recency.remove(idx);
                }
                inner.recency.push_back(source.to_string());
                return Ok(hit);
            }
        }

        let compiled = Arc::new(compile(source, self.max_depth)?);

        if let Ok(mut inner) = self.inner.lock() {
            if !inner.map.contains_key(source) {
                while inner.map.len() >= self.capacity {
                    match inner.recency.pop_front() {
                        Some(evicted) => {
                            inner.map.remove(&evicted);
                        }
                        None => break,
                    }
                }
                inner.map.insert(source.to_string(), compiled.clone());
                inner.recency.push_back(source.to_string());
            }
        }
        Ok(compiled)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compile_extracts_dependencies() {
        let expr = compile("node.a.value + node.b.value > node.a.limit", 64).unwrap();
        let deps: Vec<_> = expr.dependencies().iter().cloned().collect();
        assert_eq!(deps, vec!["a", "b"]);
    }

    #[test]
    fn strict_bool_rejects_non_boolean() {
        let expr = compile("1 + 1", 64).unwrap();
        assert!(expr.evaluate_strict_bool(&Scope::new()).is_err());
        assert!(compile("1 < 2", 64)
            .unwrap()
            .evaluate_strict_bool(&Scope::new())
            .unwrap());
    }

    #[test]
    fn coerced_bool_applies_truthiness() {
        let expr = compile("input", 64).unwrap();
        let scope = Scope::new().with_input(json!("nonempty"));
        assert!(expr.evaluate_bool(&scope).unwrap());
    }

    #[test]
    fn cache_hits_return_shared_instance() {
        let cache = ExpressionCache::new(8, 64);
        let a = cache.get("1 + 1").unwrap();
        let b = cache.get("1 + 1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let cache = ExpressionCache::new(2, 64);
        cache.get("1").unwrap();
        cache.get("2").unwrap();
        cache.get("1").unwrap(); // refresh "1"
        cache.get("3").unwrap(); // evicts "2"
        assert_eq!(cache.len(), 2);
        let before = cache.len();
        cache.get("2").unwrap(); // recompiles
        assert_eq!(cache.len(), before);
    }

    #[test]
    fn compile_errors_propagate() {
        let cache = ExpressionCache::new(2, 64);
        assert!(cache.get("1 +").is_err());
        assert_eq!(cache.len(), 0);
    }
}
