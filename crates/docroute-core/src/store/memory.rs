//! In-memory [`CorpusStore`] implementation for tests.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; the full-text tier is approximated by
//! requiring every alphanumeric query token among the record's tokens.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{in_family, CandidateRecord, DocumentRecord, SearchFilter, SourceCount};

use super::{query_terms, CorpusStore, MatchTier, PendingEmbedding, TextMatch, VectorMatch};

type Key = (String, String);

struct Stored {
    record: DocumentRecord,
    model: Option<String>,
    /// Write sequence, breaks `updated_at` ties between sources.
    seq: u64,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    records: RwLock<HashMap<Key, Stored>>,
    seq: RwLock<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            seq: RwLock::new(0),
        }
    }

    /// Total records across all sources.
    pub fn len(&self) -> usize {
        self.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Model recorded with a stored embedding, if any.
    pub fn embedding_model(&self, source: &str, filename: &str) -> Option<String> {
        let records = self.read().ok()?;
        records
            .get(&(filename.to_string(), source.to_string()))
            .and_then(|s| s.model.clone())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<Key, Stored>>> {
        self.records
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<Key, Stored>>> {
        self.records
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn next_seq(&self) -> Result<u64> {
        let mut seq = self
            .seq
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        *seq += 1;
        Ok(*seq)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn classify(record: &DocumentRecord, needle: &str, terms: &[String]) -> Option<MatchTier> {
    let filename = record.filename.to_lowercase();
    let content = record.content.to_lowercase();
    if filename.contains(needle) {
        return Some(MatchTier::Filename);
    }
    if content.contains(needle) {
        return Some(MatchTier::Content);
    }

    let have: HashSet<String> = tokens(&record.filename).chain(tokens(&record.content)).collect();
    let mut wanted = terms.iter().flat_map(|t| tokens(t)).peekable();
    if wanted.peek().is_some() && wanted.all(|t| have.contains(&t)) {
        return Some(MatchTier::FullText);
    }

    let matched = terms
        .iter()
        .filter(|t| filename.contains(t.as_str()) || content.contains(t.as_str()))
        .count();
    if matched == 0 {
        return None;
    }
    Some(MatchTier::Terms(matched as f64 / terms.len() as f64))
}

#[async_trait]
impl CorpusStore for InMemoryStore {
    async fn upsert(
        &self,
        source: &str,
        source_type: &str,
        records: &[CandidateRecord],
        vectors: Option<&[Vec<f32>]>,
        model: Option<&str>,
    ) -> Result<()> {
        if let Some(vecs) = vectors {
            if vecs.len() != records.len() {
                return Err(anyhow!(
                    "{} vectors supplied for {} records",
                    vecs.len(),
                    records.len()
                ));
            }
        }
        let now = chrono::Utc::now().timestamp();
        for (i, rec) in records.iter().enumerate() {
            let seq = self.next_seq()?;
            let embedding = vectors.map(|v| v[i].clone());
            let stored = Stored {
                model: embedding.as_ref().and(model.map(str::to_string)),
                record: DocumentRecord {
                    filename: rec.filename.clone(),
                    source: source.to_string(),
                    source_type: source_type.to_string(),
                    content: rec.content.clone(),
                    fingerprint: rec.fingerprint.clone(),
                    embedding,
                    updated_at: now,
                },
                seq,
            };
            self.write()?
                .insert((rec.filename.clone(), source.to_string()), stored);
        }
        Ok(())
    }

    async fn delete(&self, source: &str, filenames: &[String]) -> Result<u64> {
        let mut records = self.write()?;
        let mut removed = 0;
        for filename in filenames {
            if records
                .remove(&(filename.clone(), source.to_string()))
                .is_some()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_by_prefix(&self, source: &str, parent: &str) -> Result<u64> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|(filename, src), _| !(src == source && in_family(filename, parent)));
        Ok((before - records.len()) as u64)
    }

    async fn fingerprints(&self, source: &str) -> Result<HashMap<String, String>> {
        let records = self.read()?;
        Ok(records
            .values()
            .filter(|s| s.record.source == source)
            .map(|s| (s.record.filename.clone(), s.record.fingerprint.clone()))
            .collect())
    }

    async fn text_search(
        &self,
        query: &str,
        filter: SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<TextMatch>> {
        let needle = query.trim().to_lowercase();
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.read()?;
        let mut matches: Vec<TextMatch> = records
            .values()
            .map(|s| &s.record)
            .filter(|r| filter.accepts(&r.source, &r.source_type))
            .filter_map(|r| {
                classify(r, &needle, &terms).map(|tier| TextMatch {
                    filename: r.filename.clone(),
                    source: r.source.clone(),
                    source_type: r.source_type.clone(),
                    content: r.content.clone(),
                    tier,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.tier
                .score()
                .total_cmp(&a.tier.score())
                .then(a.content.len().cmp(&b.content.len()))
                .then_with(|| a.filename.cmp(&b.filename))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        filter: SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        let records = self.read()?;
        let mut matches: Vec<VectorMatch> = records
            .values()
            .map(|s| &s.record)
            .filter(|r| filter.accepts(&r.source, &r.source_type))
            .filter_map(|r| {
                r.embedding.as_ref().map(|v| VectorMatch {
                    filename: r.filename.clone(),
                    source: r.source.clone(),
                    source_type: r.source_type.clone(),
                    content: r.content.clone(),
                    similarity: cosine_similarity(query_vec, v) as f64,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get(&self, filename: &str, source: Option<&str>) -> Result<Option<DocumentRecord>> {
        let records = self.read()?;
        Ok(records
            .values()
            .filter(|s| s.record.filename == filename)
            .filter(|s| source.map_or(true, |src| s.record.source == src))
            .max_by_key(|s| (s.record.updated_at, s.seq))
            .map(|s| s.record.clone()))
    }

    async fn list_sources(&self, source_type: Option<&str>) -> Result<Vec<SourceCount>> {
        let records = self.read()?;
        let mut counts: HashMap<(String, String), i64> = HashMap::new();
        for s in records.values() {
            if source_type.map_or(true, |t| s.record.source_type == t) {
                *counts
                    .entry((s.record.source.clone(), s.record.source_type.clone()))
                    .or_insert(0) += 1;
            }
        }
        let mut rows: Vec<SourceCount> = counts
            .into_iter()
            .map(|((source, source_type), count)| SourceCount {
                source,
                source_type,
                count,
            })
            .collect();
        rows.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then_with(|| a.source_type.cmp(&b.source_type))
        });
        Ok(rows)
    }

    async fn missing_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>> {
        let records = self.read()?;
        let mut pending: Vec<PendingEmbedding> = records
            .values()
            .filter(|s| s.record.embedding.is_none())
            .map(|s| PendingEmbedding {
                filename: s.record.filename.clone(),
                source: s.record.source.clone(),
                content: s.record.content.clone(),
            })
            .collect();
        pending.sort_by(|a, b| (&a.source, &a.filename).cmp(&(&b.source, &b.filename)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn set_embedding(
        &self,
        source: &str,
        filename: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()> {
        let mut records = self.write()?;
        let stored = records
            .get_mut(&(filename.to_string(), source.to_string()))
            .ok_or_else(|| anyhow!("no record {} in source {}", filename, source))?;
        stored.record.embedding = Some(vector.to_vec());
        stored.model = Some(model.to_string());
        Ok(())
    }
}
