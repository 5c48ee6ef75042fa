//! Core data models used throughout docroute.
//!
//! These types represent the records, sync candidates and search results
//! that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Separator between a parent document path and its heading path.
pub const PATH_SEPARATOR: &str = "::";

/// A stored record, one indexable unit of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub filename: String,
    pub source: String,
    pub source_type: String,
    pub content: String,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

/// A record produced by scanning and chunking, not yet written.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub filename: String,
    pub content: String,
    pub fingerprint: String,
    /// Parent document path when this record is one chunk of a larger file.
    pub parent: Option<String>,
}

impl CandidateRecord {
    /// The document path this record belongs to.
    pub fn family_root(&self) -> &str {
        self.parent
            .as_deref()
            .unwrap_or_else(|| family_root(&self.filename))
    }
}

/// Parent document path of a filename: everything before the first `::`.
pub fn family_root(filename: &str) -> &str {
    filename
        .split_once(PATH_SEPARATOR)
        .map(|(root, _)| root)
        .unwrap_or(filename)
}

/// True when `filename` is `root` itself or one of its chunks.
pub fn in_family(filename: &str, root: &str) -> bool {
    filename == root
        || filename
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with(PATH_SEPARATOR))
}

/// Which search path produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPath {
    Fuzzy,
    Semantic,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub filename: String,
    pub content: String,
    pub source: String,
    pub source_type: String,
    pub score: f64,
    pub matched_by: MatchPath,
}

/// Record count for one source, as returned by `list_sources`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub source_type: String,
    pub count: i64,
}

/// Exact-match filters applied before ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchFilter<'a> {
    pub source: Option<&'a str>,
    pub source_type: Option<&'a str>,
}

impl SearchFilter<'_> {
    /// Whether a record with these tags passes the filter.
    pub fn accepts(&self, source: &str, source_type: &str) -> bool {
        self.source.map_or(true, |s| s == source)
            && self.source_type.map_or(true, |t| t == source_type)
    }
}
