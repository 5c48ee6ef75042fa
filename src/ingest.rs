//! Ingestion pipeline orchestration.
//!
//! Coordinates one sync run per source: scan → chunk → diff against the
//! store → delete stale records → embed new/changed records in batches →
//! upsert. Unchanged records are never re-embedded.
//!
//! Embedding batches are retried with exponential backoff while the
//! provider reports rate limiting or transient failures. When the retry
//! ceiling is reached the run stops with [`Error::RateLimitExceeded`];
//! batches written before that point stay committed and the next run picks
//! up the rest.

use anyhow::bail;
use std::time::Duration;
use tracing::{debug, info, warn};

use docroute_core::chunk::{chunk_document, ChunkParams};
use docroute_core::embedding::{EmbedError, Embedder};
use docroute_core::models::{family_root, CandidateRecord};
use docroute_core::store::CorpusStore;
use docroute_core::sync::{plan, SyncPlan};
use docroute_core::{Error, Result};

use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding::create_embedder;
use crate::scanner::{scan_source, ScannedDocument};
use crate::sqlite_store::SqliteStore;

/// Batching and backoff settings for embedding calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub batch_size: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub batch_pause: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            batch_pause: Duration::from_millis(config.batch_pause_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base,
    /// ... capped at 32×base. Saturates at `Duration::MAX`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(Duration::MAX)
    }
}

/// Embed one batch, retrying rate-limit and transient failures.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<Vec<f32>>> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match embedder.embed(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "embedding batch failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_retryable() => {
                return Err(Error::RateLimitExceeded {
                    attempts: attempt,
                    last: e.to_string(),
                });
            }
            Err(EmbedError::Disabled) => {
                return Err(Error::Embedding("embedding provider is disabled".to_string()));
            }
            Err(e) => return Err(Error::Embedding(e.to_string())),
        }
    }
}

/// Outcome of syncing one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub source: String,
    pub documents: usize,
    pub written: usize,
    pub unchanged: usize,
    pub deleted: u64,
    pub removed_documents: usize,
    pub embedded: usize,
    pub unreadable: usize,
}

/// Options for [`sync_documents`].
pub struct SyncOptions<'a> {
    pub source: &'a str,
    pub source_type: &'a str,
    pub chunking: &'a ChunkParams,
    pub prune_missing: bool,
    pub dry_run: bool,
    pub policy: &'a RetryPolicy,
    /// Document paths that exist but could not be read this run. Their
    /// stored records are neither deleted nor pruned.
    pub unreadable: &'a [String],
}

/// Chunk freshly scanned documents and apply the minimal change set.
///
/// With `embedder` set to `None` records are written without vectors and
/// can be backfilled later with `embed pending`.
pub async fn sync_documents(
    store: &dyn CorpusStore,
    embedder: Option<&dyn Embedder>,
    docs: &[ScannedDocument],
    opts: &SyncOptions<'_>,
) -> Result<SyncReport> {
    let fresh: Vec<CandidateRecord> = docs
        .iter()
        .flat_map(|d| chunk_document(&d.path, &d.text, opts.chunking))
        .collect();
    let mut existing = store.fingerprints(opts.source).await.map_err(Error::store)?;
    if !opts.unreadable.is_empty() {
        existing.retain(|filename, _| {
            let root = family_root(filename);
            !opts.unreadable.iter().any(|path| path == root)
        });
    }
    let plan = plan(fresh, &existing, opts.prune_missing);
    debug!(source = opts.source, %plan, "sync plan");

    let mut report = SyncReport {
        source: opts.source.to_string(),
        documents: docs.len(),
        written: plan.upserts.len(),
        unchanged: plan.unchanged,
        deleted: plan.deletes.len() as u64,
        removed_documents: plan.removed_parents.len(),
        embedded: 0,
        unreadable: opts.unreadable.len(),
    };
    if opts.dry_run {
        return Ok(report);
    }

    report.deleted = apply_deletes(store, opts.source, &plan).await?;

    let batches: Vec<&[CandidateRecord]> = plan.upserts.chunks(opts.policy.batch_size).collect();
    let total = batches.len();
    for (i, batch) in batches.into_iter().enumerate() {
        match embedder {
            Some(embedder) => {
                let texts: Vec<String> = batch.iter().map(|r| r.content.clone()).collect();
                let vectors = embed_with_retry(embedder, &texts, opts.policy).await?;
                store
                    .upsert(
                        opts.source,
                        opts.source_type,
                        batch,
                        Some(&vectors),
                        Some(embedder.model_name()),
                    )
                    .await
                    .map_err(Error::store)?;
                report.embedded += batch.len();
            }
            None => {
                store
                    .upsert(opts.source, opts.source_type, batch, None, None)
                    .await
                    .map_err(Error::store)?;
            }
        }
        debug!(source = opts.source, batch = i + 1, of = total, records = batch.len(), "batch written");

        if embedder.is_some() && i + 1 < total && !opts.policy.batch_pause.is_zero() {
            tokio::time::sleep(opts.policy.batch_pause).await;
        }
    }

    Ok(report)
}

async fn apply_deletes(store: &dyn CorpusStore, source: &str, plan: &SyncPlan) -> Result<u64> {
    let mut deleted = 0;
    if !plan.deletes.is_empty() {
        deleted += store
            .delete(source, &plan.deletes)
            .await
            .map_err(Error::store)?;
    }
    for parent in &plan.removed_parents {
        deleted += store
            .delete_by_prefix(source, parent)
            .await
            .map_err(Error::store)?;
    }
    Ok(deleted)
}

/// CLI entry point for `docroute sync <source|all>`.
pub async fn run_sync(config: &Config, target: &str, dry_run: bool) -> anyhow::Result<()> {
    let names: Vec<&String> = if target == "all" {
        config.sources.keys().collect()
    } else {
        match config.sources.get_key_value(target) {
            Some((name, _)) => vec![name],
            None => {
                let available: Vec<&str> = config.sources.keys().map(String::as_str).collect();
                bail!(
                    "Unknown source: '{}'. Available: all, {}",
                    target,
                    available.join(", ")
                );
            }
        }
    };
    if names.is_empty() {
        bail!("No sources configured. Add a [sources.<name>] section to the config.");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let embedder = if config.embedding.is_enabled() {
        Some(create_embedder(&config.embedding)?)
    } else {
        None
    };
    let policy = RetryPolicy::from_config(&config.embedding);
    let chunking = config.chunking.params();

    for name in names {
        let source = &config.sources[name];
        let scan = scan_source(name, source)?;
        let opts = SyncOptions {
            source: name,
            source_type: &source.source_type,
            chunking: &chunking,
            prune_missing: config.sync.prune_missing,
            dry_run,
            policy: &policy,
            unreadable: &scan.unreadable,
        };
        let report = sync_documents(&store, embedder.as_deref(), &scan.documents, &opts).await?;
        info!(
            source = %report.source,
            written = report.written,
            unchanged = report.unchanged,
            deleted = report.deleted,
            "sync finished"
        );
        print_report(&report, dry_run, embedder.is_some());
    }

    pool.close().await;
    Ok(())
}

fn print_report(report: &SyncReport, dry_run: bool, embeddings: bool) {
    if dry_run {
        println!("sync {} (dry-run)", report.source);
    } else {
        println!("sync {}", report.source);
    }
    println!("  documents scanned: {}", report.documents);
    println!("  records written: {}", report.written);
    println!("  records unchanged: {}", report.unchanged);
    println!("  records deleted: {}", report.deleted);
    println!("  documents removed: {}", report.removed_documents);
    if report.unreadable > 0 {
        println!("  documents unreadable (kept): {}", report.unreadable);
    }
    if embeddings {
        println!("  embeddings written: {}", report.embedded);
    } else if !dry_run {
        println!("  embeddings pending: {}", report.written);
    }
    println!("ok");
}
