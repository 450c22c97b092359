//! Citation / Source record (spec.md §3 "Citation / Source").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pdf,
    Web,
    Book,
    Db,
    Generic,
}

/// A resolved reference entry for one answer. `number` is assigned in
/// first-appearance order and must be contiguous starting at 1 across an
/// answer's full `sources` list (spec.md §3 invariant, enforced by
/// `crate::synthesis::citations`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub number: u32,
    pub kind: SourceKind,
    /// Pre-formatted IEEE reference string, e.g. `[1] Muster, "Titel", 2021.`
    pub formatted_reference: String,
    pub document_id: Option<String>,
    pub url: Option<String>,
}
