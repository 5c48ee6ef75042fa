//! Hybrid query router.
//!
//! Every query is classified as identifier-like or natural language and
//! sent down the matching retrieval path:
//!
//! 1. **Identifier-like** (`AUTH.login.42`, `config.Yaml`): the fuzzy text
//!    path runs first. A non-empty result is returned without embedding the
//!    query.
//! 2. **Natural language**, or an identifier with no fuzzy hits: the query
//!    is embedded and records are ranked by cosine similarity.
//! 3. If the best semantic score is below `confidence_threshold`, or the
//!    semantic path found nothing, fuzzy results are merged in: duplicates
//!    (same `filename` and `source`) keep their higher score, then the list
//!    is sorted by score and truncated.
//!
//! Fuzzy scores come from [`MatchTier::score`](crate::store::MatchTier::score):
//! filename substring 1.0, content substring 0.9, full-text match 0.75,
//! partial term match `0.5 × matched fraction`.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use tracing::debug;

use crate::embedding::{embed_query, EmbedError, Embedder};
use crate::error::{Error, Result};
use crate::models::{MatchPath, SearchFilter, SearchHit};
use crate::store::CorpusStore;

const IDENTIFIER_PATTERN: &str = r"[A-Z]{2,}\.\w+\.\d+";

/// Retrieval tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RouterParams {
    /// Result count when the caller gives none.
    pub default_limit: usize,
    /// Largest accepted `limit`.
    pub max_limit: usize,
    /// Semantic top scores below this trigger the fuzzy merge.
    pub confidence_threshold: f64,
    /// Queries shorter than this (in characters) with a `.` followed by an
    /// uppercase letter count as identifiers.
    pub identifier_max_len: usize,
    /// Candidates fetched from the store per path before truncation.
    pub candidate_k: usize,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
            confidence_threshold: 0.6,
            identifier_max_len: 30,
            candidate_k: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Identifier,
    NaturalLanguage,
}

/// One search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub source: Option<&'a str>,
    pub source_type: Option<&'a str>,
    /// Defaults to [`RouterParams::default_limit`].
    pub limit: Option<usize>,
}

pub struct QueryRouter {
    params: RouterParams,
    identifier: Regex,
}

impl QueryRouter {
    pub fn new(params: RouterParams) -> Result<Self> {
        let identifier = Regex::new(IDENTIFIER_PATTERN)
            .map_err(|e| Error::InvalidInput(format!("identifier pattern: {}", e)))?;
        Ok(Self { params, identifier })
    }

    pub fn classify(&self, query: &str) -> QueryKind {
        if self.identifier.is_match(query) {
            return QueryKind::Identifier;
        }
        let short = query.chars().count() < self.params.identifier_max_len;
        if short && has_dotted_capital(query) {
            return QueryKind::Identifier;
        }
        QueryKind::NaturalLanguage
    }

    /// Run one query against `store`, embedding with `embedder` only when
    /// the semantic path is taken.
    pub async fn search(
        &self,
        store: &dyn CorpusStore,
        embedder: &dyn Embedder,
        req: &SearchRequest<'_>,
    ) -> Result<Vec<SearchHit>> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        let limit = self.resolve_limit(req.limit)?;
        self.check_filters(store, req).await?;
        let filter = SearchFilter {
            source: req.source,
            source_type: req.source_type,
        };

        let kind = self.classify(query);
        let mut fuzzy: Option<Vec<SearchHit>> = None;

        if kind == QueryKind::Identifier {
            let mut hits = self.fuzzy_path(store, query, filter).await?;
            if !hits.is_empty() {
                debug!(query, hits = hits.len(), "identifier query answered by fuzzy path");
                hits.truncate(limit);
                return Ok(hits);
            }
            debug!(query, "identifier query had no fuzzy hits, trying semantic path");
            fuzzy = Some(hits);
        }

        let mut semantic = self.semantic_path(store, embedder, query, filter).await?;
        let top = semantic.first().map(|h| h.score);
        match top {
            Some(score) if score >= self.params.confidence_threshold => {
                debug!(query, ?kind, top = score, "semantic path confident");
                semantic.truncate(limit);
                Ok(semantic)
            }
            _ => {
                let fuzzy = match fuzzy {
                    Some(hits) => hits,
                    None => self.fuzzy_path(store, query, filter).await?,
                };
                debug!(
                    query,
                    ?kind,
                    top = ?top,
                    semantic = semantic.len(),
                    fuzzy = fuzzy.len(),
                    "low semantic confidence, merging fuzzy results"
                );
                Ok(merge_hits(semantic, fuzzy, limit))
            }
        }
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize> {
        match limit {
            None => Ok(self.params.default_limit),
            Some(0) => Err(Error::InvalidInput("limit must be at least 1".to_string())),
            Some(n) if n > self.params.max_limit => Err(Error::InvalidInput(format!(
                "limit {} exceeds maximum of {}",
                n, self.params.max_limit
            ))),
            Some(n) => Ok(n),
        }
    }

    async fn check_filters(&self, store: &dyn CorpusStore, req: &SearchRequest<'_>) -> Result<()> {
        if req.source.is_none() && req.source_type.is_none() {
            return Ok(());
        }
        let known = store.list_sources(None).await.map_err(Error::store)?;
        if let Some(source) = req.source {
            if !known.iter().any(|s| s.source == source) {
                return Err(Error::InvalidInput(format!("unknown source: {}", source)));
            }
        }
        if let Some(source_type) = req.source_type {
            if !known.iter().any(|s| s.source_type == source_type) {
                return Err(Error::InvalidInput(format!(
                    "unknown source_type: {}",
                    source_type
                )));
            }
        }
        Ok(())
    }

    async fn fuzzy_path(
        &self,
        store: &dyn CorpusStore,
        query: &str,
        filter: SearchFilter<'_>,
    ) -> Result<Vec<SearchHit>> {
        let matches = store
            .text_search(query, filter, self.params.candidate_k)
            .await
            .map_err(Error::store)?;
        let mut hits: Vec<SearchHit> = matches
            .into_iter()
            .map(|m| SearchHit {
                score: m.tier.score(),
                filename: m.filename,
                content: m.content,
                source: m.source,
                source_type: m.source_type,
                matched_by: MatchPath::Fuzzy,
            })
            .collect();
        hits.sort_by(fuzzy_order);
        Ok(hits)
    }

    async fn semantic_path(
        &self,
        store: &dyn CorpusStore,
        embedder: &dyn Embedder,
        query: &str,
        filter: SearchFilter<'_>,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = embed_query(embedder, query).await.map_err(|e| match e {
            EmbedError::Disabled => Error::Embedding(
                "embedding provider is disabled; natural-language queries need embeddings"
                    .to_string(),
            ),
            other => Error::Embedding(other.to_string()),
        })?;
        let matches = store
            .vector_search(&query_vec, filter, self.params.candidate_k)
            .await
            .map_err(Error::store)?;
        Ok(matches
            .into_iter()
            .map(|m| SearchHit {
                score: m.similarity,
                filename: m.filename,
                content: m.content,
                source: m.source,
                source_type: m.source_type,
                matched_by: MatchPath::Semantic,
            })
            .collect())
    }
}

fn has_dotted_capital(query: &str) -> bool {
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '.' && chars.peek().is_some_and(|next| next.is_uppercase()) {
            return true;
        }
    }
    false
}

/// Score descending, then shorter content in characters, then filename.
fn fuzzy_order(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.content.chars().count().cmp(&b.content.chars().count()))
        .then_with(|| a.filename.cmp(&b.filename))
}

/// Merge two result lists, keeping the higher score for hits that share a
/// `(filename, source)` key. The first list wins exact ties.
pub fn merge_hits(first: Vec<SearchHit>, second: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut by_key: HashMap<(String, String), SearchHit> = HashMap::new();
    for hit in first.into_iter().chain(second) {
        let key = (hit.filename.clone(), hit.source.clone());
        match by_key.get(&key) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                by_key.insert(key, hit);
            }
        }
    }
    let mut merged: Vec<SearchHit> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.filename.cmp(&b.filename))
            .then_with(|| a.source.cmp(&b.source))
    });
    merged.truncate(limit);
    merged
}
