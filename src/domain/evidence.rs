//! Evidence Chunk record (spec.md §3 "Evidence Chunk") produced by the
//! hybrid retriever (C3) and consumed by the synthesiser (C7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which retrieval backend surfaced a chunk. A chunk may have been surfaced
/// by more than one backend before fusion; `EvidenceChunk::source` here
/// records the *primary* (highest-rank) source it fused from, the same
/// convention the fusion step (`crate::retrieval::fusion`) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Vector,
    Sparse,
    Graph,
}

impl std::fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceSource::Vector => write!(f, "vector"),
            EvidenceSource::Sparse => write!(f, "sparse"),
            EvidenceSource::Graph => write!(f, "graph"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<i32>,
    pub page: Option<u32>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub tags: Vec<String>,
}

/// A single retrieved, ranked passage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: EvidenceMetadata,
    pub source: EvidenceSource,
    /// The backend's own score before fusion (similarity, BM25 score, ...).
    pub raw_score: f64,
    /// 1-based rank this chunk held within its source's result list.
    pub rrf_rank: usize,
    pub fused_score: f64,
    pub rerank_score: Option<f64>,
    pub confidence: f64,
    /// When this chunk was retrieved, used by the synthesiser/overflow
    /// manager to log evidence age. Not part of any ranking logic.
    pub retrieved_at: DateTime<Utc>,
}

impl EvidenceChunk {
    /// Identity used for the dedup invariant in spec.md §4.3: "unique per
    /// `(document_id, chunk_id)` within one retrieval."
    pub fn identity(&self) -> (&str, &str) {
        (&self.document_id, &self.chunk_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: &str, chunk_id: &str) -> EvidenceChunk {
        EvidenceChunk {
            chunk_id: chunk_id.to_string(),
            document_id: document_id.to_string(),
            content: "text".to_string(),
            metadata: EvidenceMetadata::default(),
            source: EvidenceSource::Vector,
            raw_score: 0.9,
            rrf_rank: 1,
            fused_score: 0.5,
            rerank_score: None,
            confidence: 0.8,
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn identity_is_document_and_chunk() {
        let c = chunk("doc-1", "c-1");
        assert_eq!(c.identity(), ("doc-1", "c-1"));
    }
}
