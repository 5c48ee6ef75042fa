//! SQLite-backed [`CorpusStore`] implementation.
//!
//! Records live in the `records` table keyed by `(filename, source)`, with
//! a parallel FTS5 table `records_fts` kept in step on every write.
//! Embeddings are stored as little-endian f32 BLOBs and ranked in Rust.

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docroute_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docroute_core::models::{
    CandidateRecord, DocumentRecord, SearchFilter, SourceCount, PATH_SEPARATOR,
};
use docroute_core::store::{
    query_terms, CorpusStore, MatchTier, PendingEmbedding, TextMatch, VectorMatch,
};

/// SQLite implementation of the [`CorpusStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// FTS5 query requiring every alphanumeric token of the query.
///
/// Tokens are quoted so FTS5 operators in user input stay literal.
fn fts_expression(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn record_from_row(row: &SqliteRow) -> DocumentRecord {
    let blob: Option<Vec<u8>> = row.get("embedding");
    DocumentRecord {
        filename: row.get("filename"),
        source: row.get("source"),
        source_type: row.get("source_type"),
        content: row.get("content"),
        fingerprint: row.get("fingerprint"),
        embedding: blob.map(|b| blob_to_vec(&b)),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl CorpusStore for SqliteStore {
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
                bail!("{} vectors supplied for {} records", vecs.len(), records.len());
            }
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (i, rec) in records.iter().enumerate() {
            let blob = vectors.map(|v| vec_to_blob(&v[i]));
            let model = blob.as_ref().and(model);

            sqlx::query(
                r#"
                INSERT INTO records (filename, source, source_type, content, fingerprint,
                                     embedding, embedding_model, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(filename, source) DO UPDATE SET
                    source_type = excluded.source_type,
                    content = excluded.content,
                    fingerprint = excluded.fingerprint,
                    embedding = excluded.embedding,
                    embedding_model = excluded.embedding_model,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&rec.filename)
            .bind(source)
            .bind(source_type)
            .bind(&rec.content)
            .bind(&rec.fingerprint)
            .bind(&blob)
            .bind(model)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM records_fts WHERE filename = ? AND source = ?")
                .bind(&rec.filename)
                .bind(source)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO records_fts (filename, source, content) VALUES (?, ?, ?)")
                .bind(&rec.filename)
                .bind(source)
                .bind(&rec.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, source: &str, filenames: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for filename in filenames {
            let res = sqlx::query("DELETE FROM records WHERE filename = ? AND source = ?")
                .bind(filename)
                .bind(source)
                .execute(&mut *tx)
                .await?;
            removed += res.rows_affected();
            sqlx::query("DELETE FROM records_fts WHERE filename = ? AND source = ?")
                .bind(filename)
                .bind(source)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_by_prefix(&self, source: &str, parent: &str) -> Result<u64> {
        let prefix = format!("{}{}", parent, PATH_SEPARATOR);
        let prefix_len = prefix.chars().count() as i64;
        let mut tx = self.pool.begin().await?;

        // substr() instead of LIKE so '%' and '_' in paths stay literal
        let res = sqlx::query(
            "DELETE FROM records WHERE source = ?1 AND (filename = ?2 OR substr(filename, 1, ?3) = ?4)",
        )
        .bind(source)
        .bind(parent)
        .bind(prefix_len)
        .bind(&prefix)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM records_fts WHERE source = ?1 AND (filename = ?2 OR substr(filename, 1, ?3) = ?4)",
        )
        .bind(source)
        .bind(parent)
        .bind(prefix_len)
        .bind(&prefix)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(res.rows_affected())
    }

    async fn fingerprints(&self, source: &str) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT filename, fingerprint FROM records WHERE source = ?")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("filename"), row.get("fingerprint")))
            .collect())
    }

    async fn text_search(
        &self,
        query: &str,
        filter: SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<TextMatch>> {
        let needle = query.trim();
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let fts = fts_expression(query);

        // ?1 needle, ?2 fts expression, ?3 source, ?4 source_type, ?5 limit, ?6.. terms
        let term_hits = (0..terms.len())
            .map(|i| {
                let p = i + 6;
                format!(
                    "(instr(lower(r.filename), lower(?{p})) > 0 OR instr(lower(r.content), lower(?{p})) > 0)"
                )
            })
            .collect::<Vec<_>>()
            .join(" + ");
        let fulltext = if fts.is_empty() {
            // keep ?2 referenced so the bind count matches
            "?2 <> ''"
        } else {
            "(r.filename, r.source) IN (SELECT filename, source FROM records_fts WHERE records_fts MATCH ?2)"
        };
        let sql = format!(
            r#"
            SELECT filename, source, source_type, content, tier, term_hits FROM (
                SELECT r.filename, r.source, r.source_type, r.content,
                       CASE
                           WHEN instr(lower(r.filename), lower(?1)) > 0 THEN 0
                           WHEN instr(lower(r.content), lower(?1)) > 0 THEN 1
                           WHEN {fulltext} THEN 2
                           ELSE 3
                       END AS tier,
                       ({term_hits}) AS term_hits
                FROM records r
                WHERE (?3 IS NULL OR r.source = ?3)
                  AND (?4 IS NULL OR r.source_type = ?4)
            )
            WHERE tier < 3 OR term_hits > 0
            ORDER BY tier, term_hits DESC, length(content), filename
            LIMIT ?5
            "#
        );

        let mut q = sqlx::query(&sql)
            .bind(needle)
            .bind(&fts)
            .bind(filter.source)
            .bind(filter.source_type)
            .bind(limit as i64);
        for term in &terms {
            q = q.bind(term);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let n = terms.len() as f64;
        Ok(rows
            .iter()
            .map(|row| {
                let tier: i64 = row.get("tier");
                let hits: i64 = row.get("term_hits");
                TextMatch {
                    filename: row.get("filename"),
                    source: row.get("source"),
                    source_type: row.get("source_type"),
                    content: row.get("content"),
                    tier: match tier {
                        0 => MatchTier::Filename,
                        1 => MatchTier::Content,
                        2 => MatchTier::FullText,
                        _ => MatchTier::Terms(hits as f64 / n),
                    },
                }
            })
            .collect())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        filter: SearchFilter<'_>,
        limit: usize,
    ) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT filename, source, source_type, content, embedding
            FROM records
            WHERE embedding IS NOT NULL
              AND (?1 IS NULL OR source = ?1)
              AND (?2 IS NULL OR source_type = ?2)
            "#,
        )
        .bind(filter.source)
        .bind(filter.source_type)
        .fetch_all(&self.pool)
        .await?;

        let mut matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                VectorMatch {
                    filename: row.get("filename"),
                    source: row.get("source"),
                    source_type: row.get("source_type"),
                    content: row.get("content"),
                    similarity: cosine_similarity(query_vec, &vec) as f64,
                }
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
        let row = sqlx::query(
            r#"
            SELECT filename, source, source_type, content, fingerprint, embedding, updated_at
            FROM records
            WHERE filename = ?1 AND (?2 IS NULL OR source = ?2)
            ORDER BY updated_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(filename)
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(record_from_row))
    }

    async fn list_sources(&self, source_type: Option<&str>) -> Result<Vec<SourceCount>> {
        let rows = sqlx::query(
            r#"
            SELECT source, source_type, COUNT(*) AS count
            FROM records
            WHERE (?1 IS NULL OR source_type = ?1)
            GROUP BY source, source_type
            ORDER BY source, source_type
            "#,
        )
        .bind(source_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SourceCount {
                source: row.get("source"),
                source_type: row.get("source_type"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn missing_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>> {
        let rows = sqlx::query(
            r#"
            SELECT filename, source, content
            FROM records
            WHERE embedding IS NULL
            ORDER BY source, filename
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingEmbedding {
                filename: row.get("filename"),
                source: row.get("source"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn set_embedding(
        &self,
        source: &str,
        filename: &str,
        vector: &[f32],
        model: &str,
    ) -> Result<()> {
        let res = sqlx::query(
            "UPDATE records SET embedding = ?, embedding_model = ? WHERE filename = ? AND source = ?",
        )
        .bind(vec_to_blob(vector))
        .bind(model)
        .bind(filename)
        .bind(source)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            bail!("no record {} in source {}", filename, source);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::{db, migrate};
    use docroute_core::fingerprint::fingerprint;
    use tempfile::TempDir;

    fn rec(filename: &str, content: &str) -> CandidateRecord {
        CandidateRecord {
            filename: filename.to_string(),
            content: content.to_string(),
            fingerprint: fingerprint(content),
            parent: None,
        }
    }

    async fn open(tmp: &TempDir) -> SqliteStore {
        let db_path = tmp.path().join("data").join("test.sqlite");
        let cfg = parse_config(&format!("[db]\npath = {:?}\n", db_path.display().to_string())).unwrap();
        let pool = db::connect(&cfg).await.unwrap();
        migrate::migrate(&pool).await.unwrap();
        migrate::migrate(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    #[test]
    fn test_fts_expression_quotes_tokens() {
        assert_eq!(fts_expression("AUTH.login.42"), "\"AUTH\" \"login\" \"42\"");
        assert_eq!(fts_expression("--- ..."), "");
    }

    #[tokio::test]
    async fn test_upsert_get_and_replace() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store
            .upsert("docs", "md", &[rec("a.md", "first")], None, None)
            .await
            .unwrap();
        store
            .upsert("docs", "md", &[rec("a.md", "second")], Some(&[vec![0.5, 0.5]]), Some("m"))
            .await
            .unwrap();

        let got = store.get("a.md", Some("docs")).await.unwrap().unwrap();
        assert_eq!(got.content, "second");
        assert_eq!(got.embedding, Some(vec![0.5, 0.5]));
        assert!(store.get("a.md", Some("other")).await.unwrap().is_none());
        assert!(store.get("missing.md", None).await.unwrap().is_none());

        let fps = store.fingerprints("docs").await.unwrap();
        assert_eq!(fps.get("a.md"), Some(&fingerprint("second")));
    }

    #[tokio::test]
    async fn test_text_search_tiers() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let recs = [
            rec("AUTH.login.42.md", "login flow"),
            rec("notes.md", "see AUTH.login.42 for details"),
            rec("tokens.md", "auth login 42 token lifecycle"),
            rec("misc.md", "login only"),
            rec("none.md", "nothing relevant"),
        ];
        store.upsert("docs", "md", &recs, None, None).await.unwrap();

        let hits = store
            .text_search("AUTH.login.42", SearchFilter::default(), 10)
            .await
            .unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.filename.as_str()).collect();
        assert_eq!(names, vec!["AUTH.login.42.md", "notes.md", "tokens.md"]);
        assert_eq!(hits[2].tier, MatchTier::FullText);

        let hits = store
            .text_search("login rotation", SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.tier == MatchTier::Terms(0.5)));

        let filter = SearchFilter {
            source: Some("elsewhere"),
            source_type: None,
        };
        assert!(store.text_search("login", filter, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_prefix_and_delete() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        let recs = [
            rec("guide_1.md", "whole"),
            rec("guide_1.md::Intro", "chunk one"),
            rec("guide_1.md::Setup::part1", "chunk two"),
            rec("guide_1.mdx", "different file"),
            rec("guideX1.md::Intro", "underscore must not act as wildcard"),
        ];
        store.upsert("docs", "md", &recs, None, None).await.unwrap();

        let removed = store.delete_by_prefix("docs", "guide_1.md").await.unwrap();
        assert_eq!(removed, 3);
        let mut left: Vec<String> = store.fingerprints("docs").await.unwrap().into_keys().collect();
        left.sort();
        assert_eq!(left, vec!["guideX1.md::Intro", "guide_1.mdx"]);

        // The FTS rows went with them
        let hits = store
            .text_search("chunk", SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());

        let removed = store
            .delete("docs", &["guide_1.mdx".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_vector_search_sources_and_pending() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp).await;
        store
            .upsert(
                "docs",
                "md",
                &[rec("x.md", "x"), rec("y.md", "y")],
                Some(&[vec![1.0, 0.0], vec![0.0, 1.0]]),
                Some("m"),
            )
            .await
            .unwrap();
        store
            .upsert("wiki", "page", &[rec("z.md", "z")], None, None)
            .await
            .unwrap();

        let hits = store
            .vector_search(&[0.9, 0.1], SearchFilter::default(), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "x.md");

        let rows = store.list_sources(None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].source, "docs");
        assert_eq!(rows[0].count, 2);
        assert_eq!(store.list_sources(Some("page")).await.unwrap().len(), 1);

        let pending = store.missing_embeddings(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].filename, "z.md");
        store.set_embedding("wiki", "z.md", &[0.0, 1.0], "m").await.unwrap();
        assert!(store.missing_embeddings(10).await.unwrap().is_empty());
        assert!(store.set_embedding("wiki", "nope", &[1.0], "m").await.is_err());
    }
}
