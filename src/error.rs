//! Error taxonomy for the engine (spec.md §7).
//!
//! Every variant maps onto one of the kinds enumerated in §7: `InputError`,
//! `AuthorisationError`, `ResourceUnavailable`, `RateLimited`, `Timeout`,
//! `DataIntegrityError`, `InternalError`, `Cancelled`. Stack traces never
//! reach the caller; `request_id` is threaded through logging instead (see
//! `tracing` spans set up in `crate::pipeline`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed query, unknown model, missing required field. Not retried.
    #[error("invalid input: {0}")]
    InputError(String),

    /// The external auth collaborator signalled denial. The core never
    /// produces this itself; it only propagates what it was handed.
    #[error("authorisation denied: {0}")]
    AuthorisationError(String),

    /// A data-plane backend (vector/graph/relational/LLM) is unreachable or
    /// timed out. Retryable.
    #[error("{backend} unavailable: {message}")]
    ResourceUnavailable { backend: String, message: String },

    /// Backend reported quota exceeded.
    #[error("{backend} rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited {
        backend: String,
        retry_after_ms: Option<u64>,
    },

    /// Per-operation timeout expired.
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// LLM API error, a narrower form of `ResourceUnavailable` used when the
    /// failure is specifically an LLM-provider response.
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// A returned chunk violates an invariant, or a citation marker fails to
    /// resolve. Fatal to the answer — never silently dropped.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Unexpected invariant violation (e.g. a dependency cycle at plan load).
    /// Fatal for the plan; logged with full context.
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller cancelled the request. Not an error for metrics purposes,
    /// but surfaced to the caller as a terminal status.
    #[error("operation cancelled")]
    Cancelled,

    /// Serialisation/deserialisation failure (state store records, LLM
    /// structured-output parsing).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (missing knob, value out of range).
    #[error("configuration error: {0}")]
    Config(String),

    /// State-store error not otherwise classified above.
    #[error("state store error: {0}")]
    Store(String),
}

impl Error {
    pub fn resource_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(backend: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::RateLimited {
            backend: backend.into(),
            retry_after_ms,
        }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the executor's retry policy (spec.md §4.5) should treat this
    /// as a transient failure worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ResourceUnavailable { .. }
                | Error::RateLimited { .. }
                | Error::Timeout { .. }
                | Error::LlmApi { .. }
        )
    }

    /// The `execution_log` error kind (spec.md §7 "machine-readable error
    /// kind"), stable across message text changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InputError(_) => "input_error",
            Error::AuthorisationError(_) => "authorisation_error",
            Error::ResourceUnavailable { .. } => "resource_unavailable",
            Error::RateLimited { .. } => "rate_limited",
            Error::Timeout { .. } => "timeout",
            Error::LlmApi { .. } => "resource_unavailable",
            Error::DataIntegrity(_) => "data_integrity_error",
            Error::Internal(_) => "internal_error",
            Error::Cancelled => "cancelled",
            Error::Serialization(_) => "internal_error",
            Error::Config(_) => "input_error",
            Error::Store(_) => "resource_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::resource_unavailable("vector", "connection refused").is_retryable());
        assert!(Error::rate_limited("llm", Some(500)).is_retryable());
        assert!(Error::timeout("retrieve", 2000).is_retryable());
        assert!(!Error::data_integrity("duplicate chunk id").is_retryable());
        assert!(!Error::Internal("cycle detected".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn kind_is_stable_across_message_changes() {
        assert_eq!(
            Error::resource_unavailable("graph", "x").kind(),
            Error::resource_unavailable("graph", "y").kind()
        );
    }
}
