//! Per-run state: variables, context, accumulator, counter, TTL cache
//!
//! One [`StateManager`] lives for exactly one run and is discarded with it.
//! All namespaces sit behind a single `tokio::sync::RwLock`, giving
//! concurrent reads and exclusive writes; the engine serializes node
//! completion, so executors always observe the state left by every
//! previously finished node.
//!
//! Stored values are shape-checked recursively against the active limits
//! (string length, array size, object depth and key count) before they are
//! admitted.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::Limits;
use crate::error::{Result, WorkflowError};

/// Shape guards copied out of [`Limits`] at construction
#[derive(Debug, Clone, Copy)]
struct Caps {
    max_variables: usize,
    max_string_length: usize,
    max_array_size: usize,
    max_object_depth: usize,
    max_object_keys: usize,
}

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct StateInner {
    variables: Map<String, Value>,
    context_vars: Map<String, Value>,
    context_consts: Map<String, Value>,
    accumulator: Value,
    counter: f64,
    cache: HashMap<String, CacheEntry>,
}

/// Thread-safe run state
#[derive(Debug)]
pub struct StateManager {
    caps: Caps,
    inner: RwLock<StateInner>,
}

impl StateManager {
    pub fn new(limits: &Limits) -> Self {
        Self {
            caps: Caps {
                max_variables: limits.max_variables,
                max_string_length: limits.max_string_length,
                max_array_size: limits.max_array_size,
                max_object_depth: limits.max_object_depth,
                max_object_keys: limits.max_object_keys,
            },
            inner: RwLock::new(StateInner {
                accumulator: Value::Null,
                ..StateInner::default()
            }),
        }
    }

    /// Seed immutable context constants; callable once, before execution
    pub async fn init_constants(&self, constants: Map<String, Value>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.context_consts.is_empty() {
            return Err(WorkflowError::Configuration(
                "context constants are already initialized".into(),
            ));
        }
        for value in constants.values() {
            self.check_shape(value)?;
        }
        inner.context_consts = constants;
        Ok(())
    }

    // ---- variables ----

    pub async fn set_variable(&self, name: &str, value: Value) -> Result<()> {
        self.check_shape(&value)?;
        let mut inner = self.inner.write().await;
        if !inner.variables.contains_key(name) && inner.variables.len() >= self.caps.max_variables {
            return Err(WorkflowError::Budget {
                resource: "variables".into(),
                limit: self.caps.max_variables as u64,
            });
        }
        inner.variables.insert(name.to_string(), value);
        Ok(())
    }

    pub async fn get_variable(&self, name: &str) -> Option<Value> {
        self.inner.read().await.variables.get(name).cloned()
    }

    /// Snapshot for expression scopes
    pub async fn variables_snapshot(&self) -> Map<String, Value> {
        self.inner.read().await.variables.clone()
    }

    // ---- context ----

    /// Set a mutable context variable; constants shadow and reject writes
    pub async fn set_context_var(&self, name: &str, value: Value) -> Result<()> {
        self.check_shape(&value)?;
        let mut inner = self.inner.write().await;
        if inner.context_consts.contains_key(name) {
            return Err(WorkflowError::Configuration(format!(
                "context constant '{}' is immutable",
                name
            )));
        }
        inner.context_vars.insert(name.to_string(), value);
        Ok(())
    }

    pub async fn get_context(&self, name: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        inner
            .context_consts
            .get(name)
            .or_else(|| inner.context_vars.get(name))
            .cloned()
    }

    /// Merged snapshot, constants winning over variables
    pub async fn context_snapshot(&self) -> Map<String, Value> {
        let inner = self.inner.read().await;
        let mut merged = inner.context_vars.clone();
        for (k, v) in &inner.context_consts {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    // ---- accumulator ----

    pub async fn accumulator(&self) -> Value {
        self.inner.read().await.accumulator.clone()
    }

    pub async fn set_accumulator(&self, value: Value) -> Result<()> {
        self.check_shape(&value)?;
        self.inner.write().await.accumulator = value;
        Ok(())
    }

    // ---- counter ----

    pub async fn counter(&self) -> f64 {
        self.inner.read().await.counter
    }

    /// Add `delta` (negative to decrement) and return the new value
    pub async fn add_counter(&self, delta: f64) -> f64 {
        let mut inner = self.inner.write().await;
        inner.counter += delta;
        inner.counter
    }

    pub async fn reset_counter(&self) {
        self.inner.write().await.counter = 0.0;
    }

    // ---- cache ----

    /// Read a cache entry; expired entries read as misses and are dropped
    pub async fn cache_get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let inner = self.inner.read().await;
            match inner.cache.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but expired: purge under the write lock.
        let mut inner = self.inner.write().await;
        inner.cache.retain(|_, e| e.expires_at > now);
        None
    }

    pub async fn cache_set(
        &self,
        key: &str,
        value: Value,
        ttl: std::time::Duration,
    ) -> Result<()> {
        self.check_shape(&value)?;
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        inner.cache.retain(|_, e| e.expires_at > now);
        inner.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    /// Drop every expired entry
    pub async fn purge_expired(&self) {
        let now = Instant::now();
        self.inner.write().await.cache.retain(|_, e| e.expires_at > now);
    }

    /// Live (unexpired) cache entry count
    pub async fn cache_len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .read()
            .await
            .cache
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    // ---- shape guards ----

    fn check_shape(&self, value: &Value) -> Result<()> {
        self.check_shape_at(value, 0)
    }

    fn check_shape_at(&self, value: &Value, depth: usize) -> Result<()> {
        if depth > self.caps.max_object_depth {
            return Err(WorkflowError::Budget {
                resource: "object_depth".into(),
                limit: self.caps.max_object_depth as u64,
            });
        }
        match value {
            Value::String(s) => {
                if s.len() > self.caps.max_string_length {
                    return Err(WorkflowError::Budget {
                        resource: "string_length".into(),
                        limit: self.caps.max_string_length as u64,
                    });
                }
            }
            Value::Array(items) => {
                if items.len() > self.caps.max_array_size {
                    return Err(WorkflowError::Budget {
                        resource: "array_size".into(),
                        limit: self.caps.max_array_size as u64,
                    });
                }
                for item in items {
                    self.check_shape_at(item, depth + 1)?;
                }
            }
            Value::Object(map) => {
                if map.len() > self.caps.max_object_keys {
                    return Err(WorkflowError::Budget {
                        resource: "object_keys".into(),
                        limit: self.caps.max_object_keys as u64,
                    });
                }
                for item in map.values() {
                    self.check_shape_at(item, depth + 1)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
