//! `docroute chunk <file>`: preview how a document would be split.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use docroute_core::chunk::{chunk_document, ChunkParams};
use docroute_core::models::CandidateRecord;

#[derive(Debug, Serialize)]
pub struct ChunkView {
    pub filename: String,
    pub parent: Option<String>,
    pub chars: usize,
    pub fingerprint: String,
    pub content: String,
}

impl From<CandidateRecord> for ChunkView {
    fn from(record: CandidateRecord) -> Self {
        Self {
            chars: record.content.chars().count(),
            filename: record.filename,
            parent: record.parent,
            fingerprint: record.fingerprint,
            content: record.content,
        }
    }
}

/// Chunk the file at `path`, naming records after the path as given.
pub fn preview(path: &Path, params: &ChunkParams) -> Result<Vec<ChunkView>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let doc_path = path.to_string_lossy().replace('\\', "/");
    Ok(chunk_document(&doc_path, &text, params)
        .into_iter()
        .map(ChunkView::from)
        .collect())
}

pub fn run_chunk(path: &Path, params: &ChunkParams, json: bool) -> Result<()> {
    let chunks = preview(path, params)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    println!("{} → {} record(s)", path.display(), chunks.len());
    for c in &chunks {
        println!("  {:>6} chars  {}  {}", c.chars, c.fingerprint, c.filename);
    }
    Ok(())
}
