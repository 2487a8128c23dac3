//! Execution limits and named profiles
//!
//! A [`Limits`] value is the complete per-run configuration: budgets,
//! data-shape guards, SSRF relaxations, retry defaults, and the expression
//! compile cache size. Three named profiles ship with the engine:
//!
//! | Profile | Intent | Deadline |
//! |---------|--------|----------|
//! | [`Limits::development`] | local iteration, generous caps | 5 min |
//! | [`Limits::default`]     | production baseline            | 30 s  |
//! | [`Limits::strict`]      | untrusted payloads             | 10 s  |
//!
//! All SSRF relaxations default to **off** in every profile; even the
//! development profile refuses private addresses unless explicitly opened
//! with the `with_*` setters.

use std::time::Duration;

/// Per-run execution limits
#[derive(Debug, Clone)]
pub struct Limits {
    /// Run deadline: total wall-clock allowed for one execution
    pub max_execution_time: Duration,

    /// Upper bound on node invocations per run
    pub max_node_executions: u64,

    /// Upper bound on outbound HTTP calls per run
    pub max_http_calls: u64,

    /// Guard for `for_each` iteration counts
    pub max_foreach_iterations: u64,

    /// Guard for `while_loop` iteration counts
    pub max_while_iterations: u64,

    /// Longest string an executor may produce or store
    pub max_string_length: usize,

    /// Largest array an executor may produce or store
    pub max_array_size: usize,

    /// Deepest nesting allowed in stored values
    pub max_object_depth: usize,

    /// Most keys allowed in a stored object
    pub max_object_keys: usize,

    /// Cap on the number of workflow variables
    pub max_variables: usize,

    /// Expression parser recursion guard
    pub max_recursion_depth: usize,

    /// Permit plain-http URLs (default: https only)
    pub allow_http: bool,

    /// Permit RFC1918 destinations
    pub allow_private_ips: bool,

    /// Permit 127.0.0.0/8 and ::1
    pub allow_localhost: bool,

    /// Permit 169.254.0.0/16 and fe80::/10
    pub allow_link_local: bool,

    /// Permit the cloud metadata endpoint (169.254.169.254)
    pub allow_cloud_metadata: bool,

    /// Host allow-list; empty means any public host
    pub allowed_domains: Vec<String>,

    /// HTTP response body cap in bytes
    pub max_response_size: usize,

    /// Redirect hops followed per request, each re-validated
    pub max_redirects: usize,

    /// Per-request HTTP timeout
    pub http_timeout: Duration,

    /// Retry middleware: attempts including the first
    pub default_max_attempts: usize,

    /// Retry middleware: initial backoff
    pub default_backoff: Duration,

    /// Retry middleware: jitter factor in [0, 1]; 0 disables jitter
    pub jitter_factor: f64,

    /// Compiled-expression LRU capacity
    pub expression_cache_size: usize,

    /// Per-call budget for `matches` regex evaluation
    pub regex_time_budget: Duration,

    /// Enable the circuit breaker middleware
    pub circuit_breaker_enabled: bool,

    /// Consecutive failures before a breaker opens
    pub circuit_breaker_threshold: u32,

    /// How long an open breaker waits before probing
    pub circuit_breaker_cooldown: Duration,

    /// Seed for the expression `sample` function; `None` uses entropy
    pub sample_seed: Option<u64>,

    /// Bounded wait for in-flight workers after cancellation
    pub drain_window: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_execution_time: Duration::from_secs(30),
            max_node_executions: 10_000,
            max_http_calls: 100,
            max_foreach_iterations: 10_000,
            max_while_iterations: 100,
            max_string_length: 1_048_576,
            max_array_size: 100_000,
            max_object_depth: 32,
            max_object_keys: 10_000,
            max_variables: 1_000,
            max_recursion_depth: 64,
            allow_http: false,
            allow_private_ips: false,
            allow_localhost: false,
            allow_link_local: false,
            allow_cloud_metadata: false,
            allowed_domains: Vec::new(),
            max_response_size: 10 * 1024 * 1024,
            max_redirects: 5,
            http_timeout: Duration::from_secs(10),
            default_max_attempts: 3,
            default_backoff: Duration::from_secs(1),
            jitter_factor: 0.0,
            expression_cache_size: 1024,
            regex_time_budget: Duration::from_millis(100),
            circuit_breaker_enabled: false,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(30),
            sample_seed: None,
            drain_window: Duration::from_secs(2),
        }
    }
}

impl Limits {
    /// Generous profile for local iteration
    pub fn development() -> Self {
        Self {
            max_execution_time: Duration::from_secs(300),
            max_node_executions: 100_000,
            max_http_calls: 1_000,
            max_foreach_iterations: 100_000,
            max_while_iterations: 10_000,
            ..Self::default()
        }
    }

    /// Tight profile for untrusted payloads
    pub fn strict() -> Self {
        Self {
            max_execution_time: Duration::from_secs(10),
            max_node_executions: 1_000,
            max_http_calls: 10,
            max_foreach_iterations: 1_000,
            max_while_iterations: 50,
            max_string_length: 65_536,
            max_array_size: 10_000,
            max_object_depth: 16,
            max_object_keys: 1_000,
            max_variables: 100,
            max_response_size: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Resolve a profile by name (`development`, `default`, `strict`)
    pub fn profile(name: &str) -> Option<Self> {
        match name {
            "development" | "dev" => Some(Self::development()),
            "default" => Some(Self::default()),
            "strict" => Some(Self::strict()),
            _ => None,
        }
    }

    /// Set the run deadline
    pub fn with_max_execution_time(mut self, d: Duration) -> Self {
        self.max_execution_time = d;
        self
    }

    /// Set the node execution cap
    pub fn with_max_node_executions(mut self, n: u64) -> Self {
        self.max_node_executions = n;
        self
    }

    /// Set the HTTP call cap
    pub fn with_max_http_calls(mut self, n: u64) -> Self {
        self.max_http_calls = n;
        self
    }

    /// Permit plain-http URLs
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Permit private / loopback / link-local destinations in one call.
    /// Intended for tests against local fixtures.
    pub fn with_local_network_allowed(mut self) -> Self {
        self.allow_http = true;
        self.allow_private_ips = true;
        self.allow_localhost = true;
        self.allow_link_local = true;
        self
    }

    /// Restrict outbound calls to the given host suffixes
    pub fn with_allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_domains = domains;
        self
    }

    /// Set the HTTP response size cap
    pub fn with_max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Set retry middleware defaults
    pub fn with_retry_defaults(mut self, attempts: usize, backoff: Duration, jitter: f64) -> Self {
        self.default_max_attempts = attempts;
        self.default_backoff = backoff;
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Enable the circuit breaker middleware
    pub fn with_circuit_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
        self.circuit_breaker_enabled = true;
        self.circuit_breaker_threshold = threshold;
        self.circuit_breaker_cooldown = cooldown;
        self
    }

    /// Fix the seed for the expression `sample` function
    pub fn with_sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = Some(seed);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_differ_on_deadline() {
        assert_eq!(Limits::default().max_execution_time, Duration::from_secs(30));
        assert_eq!(Limits::strict().max_execution_time, Duration::from_secs(10));
        assert_eq!(
            Limits::development().max_execution_time,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn ssrf_relaxations_default_off_everywhere() {
        for limits in [Limits::default(), Limits::development(), Limits::strict()] {
            assert!(!limits.allow_http);
            assert!(!limits.allow_private_ips);
            assert!(!limits.allow_localhost);
            assert!(!limits.allow_link_local);
            assert!(!limits.allow_cloud_metadata);
            assert!(limits.allowed_domains.is_empty());
        }
    }

    #[test]
    fn profile_lookup() {
        assert!(Limits::profile("strict").is_some());
        assert!(Limits::profile("dev").is_some());
        assert!(Limits::profile("nope").is_none());
    }
}
