//! Citation resolution (spec.md §4.7 "Output enforcement"): the synthesiser
//! must produce only source IDs drawn from the evidence/agent inputs, and
//! must fail loudly rather than silently drop an unresolved marker.

use crate::domain::{Source, SourceKind};
use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{cite:([A-Za-z0-9_.:\-]+)\}").expect("invalid regex"));

/// A source the synthesiser is allowed to cite, built from evidence chunks
/// and agent-declared sources before the LLM call.
#[derive(Debug, Clone)]
pub struct SourceCandidate {
    pub source_id: String,
    pub kind: SourceKind,
    pub formatted_reference: String,
    pub document_id: Option<String>,
    pub url: Option<String>,
}

/// All `{cite:ID}` markers in `content`, in first-appearance order with
/// duplicates removed.
fn first_appearance_ids(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::new();
    for capture in CITATION_MARKER.captures_iter(content) {
        let id = capture[1].to_string();
        if seen.insert(id.clone()) {
            ordered.push(id);
        }
    }
    ordered
}

/// Resolves every citation marker in `content` against `candidates`,
/// assigning `number` in first-appearance order starting at 1. Returns
/// `Error::DataIntegrity` the first time a marker names an id outside
/// `candidates` — the synthesiser must fail loudly, never drop it
/// silently (spec.md §4.7).
pub fn resolve_citations(content: &str, candidates: &[SourceCandidate]) -> Result<Vec<Source>> {
    let ids = first_appearance_ids(content);
    let mut sources = Vec::with_capacity(ids.len());

    for (idx, id) in ids.iter().enumerate() {
        let candidate = candidates
            .iter()
            .find(|c| &c.source_id == id)
            .ok_or_else(|| {
                Error::data_integrity(format!("unresolved citation marker {{cite:{id}}}"))
            })?;

        sources.push(Source {
            source_id: candidate.source_id.clone(),
            number: (idx + 1) as u32,
            kind: candidate.kind,
            formatted_reference: candidate.formatted_reference.clone(),
            document_id: candidate.document_id.clone(),
            url: candidate.url.clone(),
        });
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> SourceCandidate {
        SourceCandidate {
            source_id: id.to_string(),
            kind: SourceKind::Pdf,
            formatted_reference: format!("[_] {id}"),
            document_id: Some(id.to_string()),
            url: None,
        }
    }

    #[test]
    fn assigns_contiguous_numbers_in_first_appearance_order() {
        let content = "Claim one {cite:b}. Claim two {cite:a}. Repeat {cite:b}.";
        let candidates = vec![candidate("a"), candidate("b")];
        let sources = resolve_citations(content, &candidates).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_id, "b");
        assert_eq!(sources[0].number, 1);
        assert_eq!(sources[1].source_id, "a");
        assert_eq!(sources[1].number, 2);
    }

    #[test]
    fn fails_loudly_on_unresolved_marker() {
        let content = "Claim {cite:ghost}.";
        let err = resolve_citations(content, &[]).unwrap_err();
        assert_eq!(err.kind(), "data_integrity_error");
    }

    #[test]
    fn content_with_no_markers_yields_no_sources() {
        let sources = resolve_citations("No citations here.", &[candidate("a")]).unwrap();
        assert!(sources.is_empty());
    }
}
