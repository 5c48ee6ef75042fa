//! Storage abstraction for docroute.
//!
//! The [`CorpusStore`] trait defines every storage operation the router
//! and the sync engine need, so the SQLite backend in the app crate and
//! the [`memory::InMemoryStore`] used in tests are interchangeable.
//!
//! Records are keyed by `(filename, source)`. Implementations must be
//! `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CandidateRecord, DocumentRecord, SearchFilter, SourceCount};

/// How strongly a record matched a fuzzy text query.
///
/// Ordered from strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchTier {
    /// The query is a case-insensitive substring of the filename.
    Filename,
    /// The query is a case-insensitive substring of the content.
    Content,
    /// The full-text index matched every query term.
    FullText,
    /// Only some terms occur; carries the matched fraction in `(0, 1]`.
    Terms(f64),
}

impl MatchTier {
    pub fn score(&self) -> f64 {
        match self {
            MatchTier::Filename => 1.0,
            MatchTier::Content => 0.9,
            MatchTier::FullText => 0.75,
            MatchTier::Terms(fraction) => 0.5 * fraction.clamp(0.0, 1.0),
        }
    }
}

/// A record returned by [`CorpusStore::text_search`].
#[derive(Debug, Clone)]
pub struct TextMatch {
    pub filename: String,
    pub source: String,
    pub source_type: String,
    pub content: String,
    pub tier: MatchTier,
}

/// A record returned by [`CorpusStore::vector_search`].
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub filename: String,
    pub source: String,
    pub source_type: String,
    pub content: String,
    pub similarity: f64,
}

/// A stored record that has no embedding yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEmbedding {
    pub filename: String,
    pub source: String,
    pub content: String,
}

/// Lowercased whitespace-separated query terms, deduplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query.split_whitespace() {
        let term = term.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Abstract corpus backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](CorpusStore::upsert) | Insert or replace records of one source |
/// | [`delete`](CorpusStore::delete) | Delete records by key |
/// | [`delete_by_prefix`](CorpusStore::delete_by_prefix) | Delete a document and all its chunks |
/// | [`fingerprints`](CorpusStore::fingerprints) | `filename → fingerprint` for a source |
/// | [`text_search`](CorpusStore::text_search) | Tiered exact/fuzzy text match |
/// | [`vector_search`](CorpusStore::vector_search) | Cosine nearest neighbours |
/// | [`get`](CorpusStore::get) | Key lookup |
/// | [`list_sources`](CorpusStore::list_sources) | Per-source record counts |
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// Insert or replace records, stamping `updated_at` with the current
    /// time. When `vectors` is given it is parallel to `records` and every
    /// vector is stored with `model`; otherwise the stored embeddings are
    /// cleared.
    async fn upsert(
        &self,
        source: &str,
        source_type: &str,
        records: &[CandidateRecord],
        vectors: Option<&[Vec<f32>]>,
        model: Option<&str>,
    ) -> Result<()>;

    /// Delete the given filenames of `source`. Returns the number removed.
    async fn delete(&self, source: &str, filenames: &[String]) -> Result<u64>;

    /// Delete `parent` and every `parent::…` record of `source`.
    async fn delete_by_prefix(&self, source: &str, parent: &str) -> Result<u64>;

    /// Current `filename → fingerprint` pairs of `source`.
    async fn fingerprints(&self, source: &str) -> Result<HashMap<String, String>>;

    /// Records matching `query` in any [`MatchTier`], strongest first, then
    /// shorter content, then filename.
    async fn text_search(
        &self,
        query: &str,
        filter: SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<TextMatch>>;

    /// Embedded records ranked by cosine similarity to `query_vec`,
    /// highest first.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        filter: SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<VectorMatch>>;

    /// Look up one record. Without `source`, the most recently updated
    /// record with that filename wins.
    async fn get(&self, filename: &str, source: Option<&str>) -> Result<Option<DocumentRecord>>;

    /// Record counts grouped by source, sorted by source name.
    async fn list_sources(&self, source_type: Option<&str>) -> Result<Vec<SourceCount>>;

    /// Up to `limit` records that have no embedding.
    async fn missing_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>>;

    /// Attach an embedding to an existing record.
    async fn set_embedding(
        &self,
        source: &str,
        filename: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()>;
}
