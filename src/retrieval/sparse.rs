//! In-process Okapi BM25 sparse index (spec.md §4.3 step 2). The teacher has
//! no sparse-index dependency to reuse, so this is hand-rolled the same way
//! the teacher hand-rolls its own JSON-RPC framing rather than pulling in a
//! crate for it.

use super::backend::{BackendHit, SparseBackend};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone)]
struct Document {
    document_id: String,
    chunk_id: String,
    content: String,
    term_counts: HashMap<String, u32>,
    length: usize,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Okapi BM25 scorer over an in-memory document set, parameters `k1=1.5`,
/// `b=0.75` by default (spec.md §4.3).
pub struct Bm25Index {
    documents: Vec<Document>,
    document_frequency: HashMap<String, usize>,
    average_doc_length: f64,
    k1: f64,
    b: f64,
}

impl Bm25Index {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            documents: Vec::new(),
            document_frequency: HashMap::new(),
            average_doc_length: 0.0,
            k1,
            b,
        }
    }

    /// Indexes one chunk of content. Rebuilds corpus-wide statistics
    /// (document frequency, average length) after the insert — this index
    /// is built once per retrieval call over a bounded candidate set, not a
    /// long-lived incrementally-updated store.
    pub fn add_document(&mut self, document_id: impl Into<String>, chunk_id: impl Into<String>, content: impl Into<String>) {
        let content = content.into();
        let tokens = tokenize(&content);
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.clone()).or_insert(0) += 1;
        }

        for term in term_counts.keys() {
            *self.document_frequency.entry(term.clone()).or_insert(0) += 1;
        }

        self.documents.push(Document {
            document_id: document_id.into(),
            chunk_id: chunk_id.into(),
            content,
            length: tokens.len(),
            term_counts,
        });

        let total_length: usize = self.documents.iter().map(|d| d.length).sum();
        self.average_doc_length = total_length as f64 / self.documents.len().max(1) as f64;
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.documents.len() as f64;
        let df = *self.document_frequency.get(term).unwrap_or(&0) as f64;
        // BM25 idf with a +1 floor so common terms never score negative.
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_document(&self, doc: &Document, query_terms: &[String]) -> f64 {
        query_terms
            .iter()
            .map(|term| {
                let tf = *doc.term_counts.get(term).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let idf = self.idf(term);
                let norm = 1.0 - self.b + self.b * (doc.length as f64 / self.average_doc_length.max(1.0));
                idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm)
            })
            .sum()
    }

    /// Ranks all indexed documents by BM25 score against `query`, returning
    /// the top `top_k` as `BackendHit`s in descending score order.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<BackendHit> {
        if self.documents.is_empty() {
            return Vec::new();
        }
        let query_terms = tokenize(query);
        let mut scored: Vec<BackendHit> = self
            .documents
            .iter()
            .map(|doc| BackendHit {
                document_id: doc.document_id.clone(),
                chunk_id: doc.chunk_id.clone(),
                content: doc.content.clone(),
                score: self.score_document(doc, &query_terms),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}

/// Thread-safe `SparseBackend` adapter over a `Bm25Index`, letting the
/// retriever treat the in-process index the same as a remote sparse search
/// service (spec.md §4.3 step 2). Ingestion (`add_document`) and search both
/// take the lock, since the index is rebuilt in place on every insert.
pub struct InMemorySparseBackend {
    index: RwLock<Bm25Index>,
}

impl InMemorySparseBackend {
    pub fn new(k1: f64, b: f64) -> Self {
        Self {
            index: RwLock::new(Bm25Index::new(k1, b)),
        }
    }

    pub fn add_document(&self, document_id: impl Into<String>, chunk_id: impl Into<String>, content: impl Into<String>) {
        self.index
            .write()
            .expect("sparse index lock poisoned")
            .add_document(document_id, chunk_id, content);
    }
}

#[async_trait]
impl SparseBackend for InMemorySparseBackend {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<BackendHit>> {
        Ok(self
            .index
            .read()
            .expect("sparse index lock poisoned")
            .search(query, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_index() -> Bm25Index {
        let mut index = Bm25Index::new(1.5, 0.75);
        index.add_document("doc-1", "c-1", "Verwaltungsverfahren regelt das Ermessen der Behörde.");
        index.add_document("doc-2", "c-1", "Der Widerspruch richtet sich gegen den Bescheid.");
        index.add_document("doc-3", "c-1", "Unrelated content about gardening and plants.");
        index
    }

    #[test]
    fn ranks_matching_document_above_unrelated_one() {
        let index = seeded_index();
        let hits = index.search("Ermessen Behörde", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].document_id, "doc-1");
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let index = seeded_index();
        assert!(index.search("", 10).is_empty());
    }

    #[test]
    fn respects_top_k() {
        let index = seeded_index();
        let hits = index.search("Verwaltungsverfahren Bescheid Widerspruch", 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn empty_index_never_panics() {
        let index = Bm25Index::new(1.5, 0.75);
        assert!(index.search("anything", 5).is_empty());
    }

    #[tokio::test]
    async fn backend_adapter_implements_the_sparse_backend_trait() {
        let backend = InMemorySparseBackend::new(1.5, 0.75);
        backend.add_document("doc-1", "c-1", "Verwaltungsverfahren regelt das Ermessen der Behörde.");
        let hits = backend.search("Ermessen", 10).await.unwrap();
        assert_eq!(hits[0].document_id, "doc-1");
    }
}
