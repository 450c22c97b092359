//! Hybrid Retriever (C3): orchestrates dense, sparse, and graph search,
//! fuses with RRF, optionally re-ranks, and degrades gracefully when a
//! backend is unavailable (spec.md §4.3).

use super::backend::{CrossEncoder, GraphBackend, RetrievalDiagnostics, RetrievalRequest, SparseBackend, VectorBackend};
use super::fusion::{fuse, SourceResults};
use crate::config::Config;
use crate::domain::{EvidenceChunk, EvidenceSource};
use crate::error::Error;
use std::sync::Arc;
use tracing::warn;

/// Shared, process-wide retrieval entry point (spec.md §3 "Lifecycle" — one
/// instance reused across requests, the same pattern as the teacher's LLM
/// client singleton).
pub struct HybridRetriever {
    config: Config,
    vector: Option<Arc<dyn VectorBackend>>,
    sparse: Option<Arc<dyn SparseBackend>>,
    graph: Option<Arc<dyn GraphBackend>>,
    reranker: Option<Arc<dyn CrossEncoder>>,
}

impl HybridRetriever {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            vector: None,
            sparse: None,
            graph: None,
            reranker: None,
        }
    }

    pub fn with_vector_backend(mut self, backend: Arc<dyn VectorBackend>) -> Self {
        self.vector = Some(backend);
        self
    }

    pub fn with_sparse_backend(mut self, backend: Arc<dyn SparseBackend>) -> Self {
        self.sparse = Some(backend);
        self
    }

    pub fn with_graph_backend(mut self, backend: Arc<dyn GraphBackend>) -> Self {
        self.graph = Some(backend);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn CrossEncoder>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Cheap readiness probe (spec.md §6 "Health: readiness — every shared
    /// resource check"): true once at least one search backend is wired up.
    /// A fully-degraded retriever (no backends at all) is not ready, even
    /// though `retrieve` itself never panics on that state.
    pub fn is_ready(&self) -> bool {
        self.vector.is_some() || self.sparse.is_some() || self.graph.is_some()
    }

    /// `retrieve(query, top_k, filters, sources_requested, weights) ->
    /// [EvidenceChunk]` ordered by descending `fused_score` (spec.md §4.3).
    /// Never panics on an empty query; a fully-degraded call returns an
    /// empty list plus diagnostics rather than an error.
    pub async fn retrieve(&self, request: RetrievalRequest) -> (Vec<EvidenceChunk>, RetrievalDiagnostics) {
        let mut diagnostics = RetrievalDiagnostics::default();
        if request.query.trim().is_empty() {
            return (Vec::new(), diagnostics);
        }

        let dense_top_k = request.top_k * 2;

        let vector_hits = if request.use_vector {
            match &self.vector {
                Some(backend) => match backend.search(&request.query, dense_top_k).await {
                    Ok(hits) => hits,
                    Err(err) => {
                        self.log_degradation("vector", &err, &mut diagnostics);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let sparse_hits = if request.use_sparse {
            match &self.sparse {
                Some(backend) => match backend.search(&request.query, dense_top_k).await {
                    Ok(hits) => hits,
                    Err(err) => {
                        self.log_degradation("sparse", &err, &mut diagnostics);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let graph_hits = if request.use_graph {
            match &self.graph {
                Some(backend) => match backend.search(&request.query, dense_top_k).await {
                    Ok(hits) => hits,
                    Err(err) => {
                        self.log_degradation("graph", &err, &mut diagnostics);
                        Vec::new()
                    }
                },
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };

        let sources = vec![
            SourceResults {
                source: EvidenceSource::Vector,
                weight: request.weight_vector,
                hits: &vector_hits,
            },
            SourceResults {
                source: EvidenceSource::Sparse,
                weight: request.weight_sparse,
                hits: &sparse_hits,
            },
            SourceResults {
                source: EvidenceSource::Graph,
                weight: request.weight_graph,
                hits: &graph_hits,
            },
        ];

        let mut fused = fuse(&sources, self.config.rrf_k, request.top_k);

        if let Some(reranker) = &self.reranker {
            if fused.len() >= self.config.rerank_min_chunks {
                let contents: Vec<&str> = fused.iter().map(|c| c.content.as_str()).collect();
                match reranker.score(&request.query, &contents).await {
                    Ok(scores) if scores.len() == fused.len() => {
                        for (chunk, score) in fused.iter_mut().zip(scores) {
                            chunk.rerank_score = Some(score);
                        }
                        fused.sort_by(|a, b| {
                            b.rerank_score
                                .unwrap_or(b.fused_score)
                                .partial_cmp(&a.rerank_score.unwrap_or(a.fused_score))
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                    }
                    Ok(_) => {
                        warn!("cross-encoder returned a mismatched score count, skipping re-rank");
                    }
                    Err(err) => {
                        warn!(error = %err, "cross-encoder re-ranking failed, skipping");
                    }
                }
            }
        }

        if vector_hits.is_empty() && sparse_hits.is_empty() && graph_hits.is_empty() {
            diagnostics.evidence = Vec::new();
            return (Vec::new(), diagnostics);
        }

        (fused, diagnostics)
    }

    fn log_degradation(&self, backend: &str, err: &Error, diagnostics: &mut RetrievalDiagnostics) {
        warn!(backend, error = %err, "retrieval backend unavailable, continuing without it");
        diagnostics.failed_backends.push(backend.to_string());
    }
}
