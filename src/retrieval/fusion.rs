//! Reciprocal Rank Fusion (spec.md §4.3 step 4): a pure function over
//! per-source ranked hit lists, no I/O, no async — same treatment as the
//! budget formula.

use super::backend::BackendHit;
use crate::domain::{EvidenceChunk, EvidenceMetadata, EvidenceSource};
use chrono::Utc;
use std::collections::HashMap;

/// One source's ranked hit list and its RRF weight.
pub struct SourceResults<'a> {
    pub source: EvidenceSource,
    pub weight: f64,
    pub hits: &'a [BackendHit],
}

/// `fused_score(d) = Σ_s w_s / (k + rank_s(d))` over the sources in which
/// `d` appears (spec.md §4.3, `k=60` by default). Output is sorted by
/// descending `fused_score`, deduplicated by `(document_id, chunk_id)`, and
/// truncated to `top_k`.
pub fn fuse(sources: &[SourceResults<'_>], k: f64, top_k: usize) -> Vec<EvidenceChunk> {
    #[derive(Clone)]
    struct Accumulator {
        document_id: String,
        chunk_id: String,
        content: String,
        fused_score: f64,
        best_raw_score: f64,
        best_rank: usize,
        primary_source: EvidenceSource,
    }

    let mut accumulators: HashMap<(String, String), Accumulator> = HashMap::new();

    for source_results in sources {
        for (idx, hit) in source_results.hits.iter().enumerate() {
            let rank = idx + 1;
            let contribution = source_results.weight / (k + rank as f64);
            let key = (hit.document_id.clone(), hit.chunk_id.clone());

            accumulators
                .entry(key)
                .and_modify(|acc| {
                    acc.fused_score += contribution;
                    if hit.score > acc.best_raw_score {
                        acc.best_raw_score = hit.score;
                        acc.best_rank = rank;
                        acc.primary_source = source_results.source;
                    }
                })
                .or_insert(Accumulator {
                    document_id: hit.document_id.clone(),
                    chunk_id: hit.chunk_id.clone(),
                    content: hit.content.clone(),
                    fused_score: contribution,
                    best_raw_score: hit.score,
                    best_rank: rank,
                    primary_source: source_results.source,
                });
        }
    }

    let mut fused: Vec<Accumulator> = accumulators.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused.truncate(top_k);

    let now = Utc::now();
    fused
        .into_iter()
        .enumerate()
        .map(|(idx, acc)| EvidenceChunk {
            chunk_id: acc.chunk_id,
            document_id: acc.document_id,
            content: acc.content,
            metadata: EvidenceMetadata::default(),
            source: acc.primary_source,
            raw_score: acc.best_raw_score,
            rrf_rank: acc.best_rank,
            fused_score: acc.fused_score,
            rerank_score: None,
            confidence: acc.fused_score.clamp(0.0, 1.0).max(if idx == 0 { 0.5 } else { 0.0 }),
            retrieved_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(document_id: &str, chunk_id: &str, score: f64) -> BackendHit {
        BackendHit {
            document_id: document_id.to_string(),
            chunk_id: chunk_id.to_string(),
            content: "content".to_string(),
            score,
        }
    }

    #[test]
    fn orders_by_descending_fused_score() {
        let vector_hits = vec![hit("doc-1", "c-1", 0.9), hit("doc-2", "c-1", 0.8)];
        let sparse_hits = vec![hit("doc-2", "c-1", 5.0), hit("doc-1", "c-1", 2.0)];

        let sources = vec![
            SourceResults {
                source: EvidenceSource::Vector,
                weight: 0.5,
                hits: &vector_hits,
            },
            SourceResults {
                source: EvidenceSource::Sparse,
                weight: 0.3,
                hits: &sparse_hits,
            },
        ];

        let fused = fuse(&sources, 60.0, 10);
        assert_eq!(fused.len(), 2);
        for pair in fused.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
        }
    }

    #[test]
    fn deduplicates_by_document_and_chunk_id() {
        let vector_hits = vec![hit("doc-1", "c-1", 0.9)];
        let sparse_hits = vec![hit("doc-1", "c-1", 3.0)];
        let sources = vec![
            SourceResults {
                source: EvidenceSource::Vector,
                weight: 0.5,
                hits: &vector_hits,
            },
            SourceResults {
                source: EvidenceSource::Sparse,
                weight: 0.3,
                hits: &sparse_hits,
            },
        ];
        let fused = fuse(&sources, 60.0, 10);
        assert_eq!(fused.len(), 1);
    }

    #[test]
    fn is_symmetric_for_equal_weight_sources() {
        let a_hits = vec![hit("doc-1", "c-1", 1.0), hit("doc-2", "c-1", 0.5)];
        let b_hits = vec![hit("doc-3", "c-1", 1.0), hit("doc-4", "c-1", 0.5)];

        let order_a = vec![
            SourceResults {
                source: EvidenceSource::Vector,
                weight: 0.5,
                hits: &a_hits,
            },
            SourceResults {
                source: EvidenceSource::Sparse,
                weight: 0.5,
                hits: &b_hits,
            },
        ];
        let order_b = vec![
            SourceResults {
                source: EvidenceSource::Sparse,
                weight: 0.5,
                hits: &b_hits,
            },
            SourceResults {
                source: EvidenceSource::Vector,
                weight: 0.5,
                hits: &a_hits,
            },
        ];

        let mut fused_a = fuse(&order_a, 60.0, 10);
        let mut fused_b = fuse(&order_b, 60.0, 10);
        fused_a.sort_by(|x, y| x.document_id.cmp(&y.document_id));
        fused_b.sort_by(|x, y| x.document_id.cmp(&y.document_id));

        let scores_a: Vec<f64> = fused_a.iter().map(|c| c.fused_score).collect();
        let scores_b: Vec<f64> = fused_b.iter().map(|c| c.fused_score).collect();
        assert_eq!(scores_a, scores_b);
    }

    #[test]
    fn truncates_to_top_k() {
        let hits: Vec<BackendHit> = (0..5).map(|i| hit(&format!("doc-{i}"), "c-1", 1.0)).collect();
        let sources = vec![SourceResults {
            source: EvidenceSource::Vector,
            weight: 1.0,
            hits: &hits,
        }];
        let fused = fuse(&sources, 60.0, 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn empty_sources_never_panics() {
        let fused = fuse(&[], 60.0, 10);
        assert!(fused.is_empty());
    }
}
