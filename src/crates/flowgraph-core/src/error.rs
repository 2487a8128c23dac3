//! Error types for workflow validation and execution
//!
//! Every failure the engine can produce is a variant of [`WorkflowError`].
//! Variants map one-to-one onto the engine's error taxonomy:
//!
//! ```text
//! WorkflowError
//! ├── Validation        - payload rejected before any node ran
//! ├── Cycle             - explicit or implicit edge cycle
//! ├── Budget            - node/http counter exceeded its cap
//! ├── Timeout           - run deadline or per-node timeout fired
//! ├── Cancelled         - run aborted while draining workers
//! ├── SsrfBlocked       - outbound request denied by the guard
//! ├── ResponseTooLarge  - HTTP body exceeded the configured cap
//! ├── HttpTransient     - connect/reset/5xx, retryable
//! ├── Eval              - expression compile or evaluation failure
//! ├── Schema            - strict schema validation failure
//! ├── NodeFailure       - executor failed with node context
//! ├── CircuitOpen       - circuit breaker rejected the call
//! └── Serialization / Yaml / Io / Configuration / Custom
//! ```
//!
//! Retryability is intrinsic to the variant (see
//! [`WorkflowError::is_transient`]); the retry middleware never inspects
//! message strings. User-facing reports are built from [`ErrorEntry`], which
//! carries the stable `kind` string, optional node id and field path, and an
//! English message with secrets already redacted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result type using [`WorkflowError`]
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// A single problem found while validating a payload
///
/// Issues are aggregated: validation reports everything wrong with a payload
/// in one pass rather than failing on the first defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Node the issue belongs to, when attributable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Offending field inside the node's `data` record, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Stable machine-readable category
    pub kind: IssueKind,

    /// Human-readable description
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            field: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn for_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.node_id, &self.field) {
            (Some(n), Some(fl)) => write!(f, "node '{}' field '{}': {}", n, fl, self.message),
            (Some(n), None) => write!(f, "node '{}': {}", n, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Categories for [`ValidationIssue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Payload-level structural defect (empty node list, duplicate id, ...)
    Structure,
    /// Edge references a missing node or loops onto itself
    Edge,
    /// Node type missing and not inferrable
    UnknownType,
    /// Required `data` field absent
    MissingField,
    /// `data` field present but malformed
    InvalidField,
    /// Expression failed to compile
    Expression,
    /// Explicit or implicit cycle
    Cycle,
}

/// Error type covering every workflow operation
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Payload failed validation; carries the full aggregated issue list
    #[error("payload validation failed: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// The graph (explicit edges plus expression-derived implicit edges)
    /// contains a cycle
    #[error("cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Node ids along the offending cycle, in edge order
        path: Vec<String>,
    },

    /// A per-run counter exceeded its configured cap
    #[error("{resource} budget exceeded (limit {limit})")]
    Budget {
        /// Which counter overflowed (`node_executions`, `http_calls`, ...)
        resource: String,
        /// The configured cap
        limit: u64,
    },

    /// The run deadline or a node-level timeout fired
    #[error("'{operation}' timed out after {duration_ms}ms")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// Timeout that fired, in milliseconds
        duration_ms: u64,
    },

    /// The run was cancelled while in-flight work drained
    #[error("execution cancelled: {0}")]
    Cancelled(String),

    /// Outbound request rejected by the SSRF guard before any connect
    #[error("request to '{host}' blocked: {reason}")]
    SsrfBlocked {
        /// Hostname (never the full URL)
        host: String,
        /// Which rule rejected it
        reason: String,
    },

    /// HTTP response body exceeded the configured size cap
    #[error("response exceeded the {limit} byte cap")]
    ResponseTooLarge {
        /// Configured cap in bytes
        limit: usize,
    },

    /// Transient HTTP failure: connect error, reset, timeout, or 5xx.
    /// The only retryable variant.
    #[error("transient HTTP failure: {0}")]
    HttpTransient(String),

    /// Expression compile or evaluation failure
    #[error("expression error at offset {}: {message}", .position.map(|p| p.to_string()).unwrap_or_else(|| "?".into()))]
    Eval {
        /// Description of the failure
        message: String,
        /// Byte offset into the expression source, when known
        position: Option<usize>,
    },

    /// Strict-mode schema validation failure; carries the violation list
    #[error("schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),

    /// A node executor failed
    #[error("node '{node}' failed: {message}")]
    NodeFailure {
        /// Id of the failing node
        node: String,
        /// Executor-provided description
        message: String,
    },

    /// The circuit breaker for this node type is open
    #[error("circuit open for '{scope}'")]
    CircuitOpen {
        /// Breaker scope, typically the node type tag
        scope: String,
    },

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML payload parse failure
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure (payload files, CLI surface)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine misconfiguration (bad limits, duplicate registration, ...)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Escape hatch for embedders
    #[error("{0}")]
    Custom(String),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WorkflowError {
    /// Create a node failure with context
    pub fn node_failure(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NodeFailure {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create an evaluation error with a source offset
    pub fn eval_at(message: impl Into<String>, position: usize) -> Self {
        Self::Eval {
            message: message.into(),
            position: Some(position),
        }
    }

    /// Create an evaluation error without position information
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
            position: None,
        }
    }

    /// Whether the retry middleware may retry this error
    ///
    /// Only transient HTTP failures qualify. SSRF blocks, oversize
    /// responses, budget overruns and evaluation errors are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HttpTransient(_))
    }

    /// Stable kind string used in [`ErrorEntry`] and observability events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Cycle { .. } => "CycleError",
            Self::Budget { .. } => "BudgetError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Cancelled(_) => "Cancelled",
            Self::SsrfBlocked { .. } => "SSRFBlocked",
            Self::ResponseTooLarge { .. } => "ResponseTooLarge",
            Self::HttpTransient(_) => "HTTPTransient",
            Self::Eval { .. } => "EvalError",
            Self::Schema(_) => "SchemaError",
            Self::NodeFailure { .. } => "NodeFailure",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::Serialization(_) | Self::Yaml(_) => "SerializationError",
            Self::Io(_) => "IoError",
            Self::Configuration(_) => "ConfigurationError",
            Self::Custom(_) => "Error",
        }
    }
}

/// User-visible error record included in the final execution report
///
/// Never carries stack traces, full URLs, or header values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Stable kind string, see [`WorkflowError::kind`]
    pub kind: String,

    /// Node the error is attributed to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Field path inside the node's data, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// English description
    pub message: String,
}

impl ErrorEntry {
    /// Build a report entry from an error, attributing it to a node
    pub fn from_error(err: &WorkflowError, node_id: Option<&str>) -> Self {
        Self {
            kind: err.kind().to_string(),
            node_id: node_id.map(|s| s.to_string()),
            field: None,
            message: err.to_string(),
        }
    }
}
