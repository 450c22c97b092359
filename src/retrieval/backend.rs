//! Retrieval backend traits (spec.md §4.3). Injected as `Arc<dyn Trait>`,
//! the same shape the teacher uses for `LLMClient`: one async trait per
//! capability, implementors are interchangeable behind a trait object.

use crate::domain::EvidenceChunk;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A single `(document_id, similarity)` hit from a vector store, before it
/// is lifted into an `EvidenceChunk` by the retriever.
#[derive(Debug, Clone)]
pub struct BackendHit {
    pub document_id: String,
    pub chunk_id: String,
    pub content: String,
    pub score: f64,
}

/// Dense (embedding) search over a vector store.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<BackendHit>>;
}

/// Sparse (BM25-style) search. Implemented in-process by `Bm25Index`
/// (`crate::retrieval::sparse`), but kept as a trait so a dedicated search
/// service could stand in for it.
#[async_trait]
pub trait SparseBackend: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<BackendHit>>;
}

/// Graph search: documents whose fields match the query terms
/// case-insensitively (spec.md §4.3 step 3).
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<BackendHit>>;
}

/// Optional cross-encoder re-ranking stage (spec.md §4.3 step 5).
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// Scores each `(query, chunk content)` pair, returned in the same
    /// order as `chunks` was passed in.
    async fn score(&self, query: &str, chunks: &[&str]) -> Result<Vec<f64>>;
}

/// Filters narrowing a retrieval call (metadata equality only; spec.md §4.3
/// does not specify a richer filter language).
pub type Filters = HashMap<String, String>;

/// Evidence-source selection and RRF weight for one `retrieve` call
/// (spec.md §4.3 `retrieve(query, top_k, filters, sources_requested,
/// weights)`).
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: usize,
    pub filters: Filters,
    pub use_vector: bool,
    pub use_sparse: bool,
    pub use_graph: bool,
    pub weight_vector: f64,
    pub weight_sparse: f64,
    pub weight_graph: f64,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            filters: Filters::new(),
            use_vector: true,
            use_sparse: true,
            use_graph: false,
            weight_vector: 0.5,
            weight_sparse: 0.3,
            weight_graph: 0.2,
        }
    }
}

/// Hand-back type for a fully degraded retrieval: no backend returned
/// anything, but the caller still gets a diagnostic, never evidence
/// (spec.md §4.3 step 6).
#[derive(Debug, Clone, Default)]
pub struct RetrievalDiagnostics {
    pub failed_backends: Vec<String>,
    pub evidence: Vec<EvidenceChunk>,
}
