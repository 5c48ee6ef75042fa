//! Record retrieval by filename.
//!
//! Used by both the `docroute get` CLI command and `POST /tools/get`.

use anyhow::{bail, Result};
use serde::Serialize;

use docroute_core::models::{family_root, DocumentRecord};
use docroute_core::store::CorpusStore;
use docroute_core::Error;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// One stored record as returned to callers. The vector itself is omitted.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub filename: String,
    pub source: String,
    pub source_type: String,
    /// Document path the record was chunked from.
    pub document: String,
    pub content: String,
    pub fingerprint: String,
    pub embedded: bool,
    pub updated_at: String, // ISO8601
}

impl From<DocumentRecord> for DocumentResponse {
    fn from(record: DocumentRecord) -> Self {
        Self {
            document: family_root(&record.filename).to_string(),
            updated_at: format_ts_iso(record.updated_at),
            embedded: record.embedding.is_some(),
            filename: record.filename,
            source: record.source,
            source_type: record.source_type,
            content: record.content,
            fingerprint: record.fingerprint,
        }
    }
}

/// Core get function returning structured data (used by CLI and server).
///
/// Without `source` the most recently written record with that filename
/// wins. A missing record is `Ok(None)`.
pub async fn get_document(
    store: &dyn CorpusStore,
    filename: &str,
    source: Option<&str>,
) -> docroute_core::Result<Option<DocumentResponse>> {
    if filename.trim().is_empty() {
        return Err(Error::InvalidInput("filename must not be empty".to_string()));
    }
    let record = store.get(filename, source).await.map_err(Error::store)?;
    Ok(record.map(DocumentResponse::from))
}

/// CLI entry point, prints the record to stdout.
pub async fn run_get(config: &Config, filename: &str, source: Option<&str>, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let doc = get_document(&store, filename, source).await?;
    pool.close().await;

    let Some(doc) = doc else {
        bail!("document not found: {}", filename);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("--- Record ---");
    println!("filename:     {}", doc.filename);
    println!("document:     {}", doc.document);
    println!("source:       {}", doc.source);
    println!("source_type:  {}", doc.source_type);
    println!("fingerprint:  {}", doc.fingerprint);
    println!("embedded:     {}", doc.embedded);
    println!("updated_at:   {}", doc.updated_at);
    println!();
    println!("--- Content ---");
    println!("{}", doc.content);

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docroute_core::fingerprint::fingerprint;
    use docroute_core::models::CandidateRecord;
    use docroute_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_get_found_missing_and_invalid() {
        let store = InMemoryStore::new();
        let record = CandidateRecord {
            filename: "guide.md::Setup".to_string(),
            content: "setup text".to_string(),
            fingerprint: fingerprint("setup text"),
            parent: Some("guide.md".to_string()),
        };
        store
            .upsert("handbook", "docs", &[record], None, None)
            .await
            .unwrap();

        let doc = get_document(&store, "guide.md::Setup", None).await.unwrap().unwrap();
        assert_eq!(doc.document, "guide.md");
        assert_eq!(doc.source_type, "docs");
        assert!(!doc.embedded);
        assert!(doc.updated_at.ends_with('Z'));

        assert!(get_document(&store, "guide.md::Setup", Some("wiki"))
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            get_document(&store, "  ", None).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
