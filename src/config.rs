//! Typed configuration knobs (spec.md §6 "Configuration knobs"), following
//! the teacher's `OrchestratorConfig`/`ClientConfig` builder pattern: a
//! plain struct with a `Default` impl matching the documented defaults, and
//! `with_*` builder methods for overrides.

use std::collections::HashMap;

/// Retry policy applied per step by the executor (spec.md §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given attempt (1-based), per
    /// `backoff_base_ms * backoff_factor^(attempt - 1)`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1) - 1;
        (self.backoff_base_ms as f64 * self.backoff_factor.powi(attempt as i32)) as u64
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Per-request concurrency of the step executor's worker pool.
    pub worker_pool_size: usize,

    pub token_min: u32,
    pub token_max: u32,
    pub token_base: u32,

    pub rrf_k: f64,
    pub vector_top_k: usize,
    pub sparse_top_k: usize,

    pub bm25_k1: f64,
    pub bm25_b: f64,

    /// Fraction of a model's context window considered safe to fill before
    /// the overflow manager intervenes (spec.md §4.8).
    pub safety_factor: f64,

    pub enable_hybrid_search: bool,
    pub enable_sparse: bool,
    pub enable_query_expansion: bool,
    pub enable_reranking: bool,

    pub max_hybrid_latency_ms: u64,
    pub stream_queue_capacity: usize,
    pub grace_period_ms: u64,

    pub retry: RetryPolicy,

    /// Domain-vocabulary weight table for the intent analyser's complexity
    /// score (spec.md §4.1 "configurable domain weight table"), keyed by
    /// lowercase stem.
    pub domain_weights: HashMap<String, f64>,

    /// RRF source weights (spec.md §4.3 "Weights default
    /// `{vector:0.5, sparse:0.3, graph:0.2}`").
    pub rrf_weight_vector: f64,
    pub rrf_weight_sparse: f64,
    pub rrf_weight_graph: f64,

    /// Minimum fused-evidence-chunk count before re-ranking kicks in.
    pub rerank_min_chunks: usize,
}

impl Default for Config {
    fn default() -> Self {
        let mut domain_weights = HashMap::new();
        // Administrative-law vocabulary weighted higher, per spec.md §4.1's
        // worked example ("administrative-law vocabulary x1.5").
        for term in [
            "verwaltungsverfahren",
            "ermessen",
            "behörde",
            "bescheid",
            "widerspruch",
            "vwvfg",
            "verwaltungsakt",
        ] {
            domain_weights.insert(term.to_string(), 1.5);
        }

        Self {
            worker_pool_size: 5,
            token_min: 250,
            token_max: 4000,
            token_base: 600,
            rrf_k: 60.0,
            vector_top_k: 20,
            sparse_top_k: 20,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            safety_factor: 0.8,
            enable_hybrid_search: true,
            enable_sparse: true,
            enable_query_expansion: false,
            enable_reranking: true,
            max_hybrid_latency_ms: 200,
            stream_queue_capacity: 256,
            grace_period_ms: 2000,
            retry: RetryPolicy::default(),
            domain_weights,
            rrf_weight_vector: 0.5,
            rrf_weight_sparse: 0.3,
            rrf_weight_graph: 0.2,
            rerank_min_chunks: 5,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_domain_weight(mut self, term: impl Into<String>, weight: f64) -> Self {
        self.domain_weights.insert(term.into(), weight);
        self
    }

    pub fn with_query_expansion(mut self, enabled: bool) -> Self {
        self.enable_query_expansion = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.worker_pool_size, 5);
        assert_eq!((c.token_min, c.token_max, c.token_base), (250, 4000, 600));
        assert_eq!(c.rrf_k, 60.0);
        assert_eq!((c.bm25_k1, c.bm25_b), (1.5, 0.75));
        assert_eq!(c.safety_factor, 0.8);
        assert!(!c.enable_query_expansion);
        assert_eq!(c.stream_queue_capacity, 256);
        assert_eq!(c.grace_period_ms, 2000);
    }

    #[test]
    fn retry_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_ms(1), 200);
        assert_eq!(policy.backoff_ms(2), 400);
        assert_eq!(policy.backoff_ms(3), 800);
    }
}
