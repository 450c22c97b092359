//! Hybrid Retriever (C3): dense + sparse + graph search fused with
//! Reciprocal Rank Fusion, with optional cross-encoder re-ranking.

mod backend;
mod fusion;
mod retriever;
mod sparse;

pub use backend::{
    BackendHit, CrossEncoder, Filters, GraphBackend, RetrievalDiagnostics, RetrievalRequest,
    SparseBackend, VectorBackend,
};
pub use fusion::{fuse, SourceResults};
pub use retriever::HybridRetriever;
pub use sparse::{Bm25Index, InMemorySparseBackend};
