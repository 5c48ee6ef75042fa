//! Embedding backfill.
//!
//! `docroute embed pending` finds records stored without a vector (written
//! while the provider was disabled, or added by a run that hit the retry
//! ceiling after its upserts) and embeds them in batches, with the same
//! backoff rules as `sync`.

use anyhow::{bail, Result};
use tracing::info;

use docroute_core::embedding::Embedder;
use docroute_core::store::CorpusStore;
use docroute_core::Error;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::ingest::{embed_with_retry, RetryPolicy};
use crate::sqlite_store::SqliteStore;

/// Embed up to `limit` pending records (all of them when `None`).
///
/// Returns the number of records that received a vector.
pub async fn embed_pending(
    store: &dyn CorpusStore,
    embedder: &dyn Embedder,
    policy: &RetryPolicy,
    limit: Option<usize>,
) -> docroute_core::Result<usize> {
    let mut embedded = 0usize;
    loop {
        let remaining = match limit {
            Some(l) => l.saturating_sub(embedded),
            None => policy.batch_size,
        };
        if remaining == 0 {
            break;
        }
        let batch = store
            .missing_embeddings(remaining.min(policy.batch_size))
            .await
            .map_err(Error::store)?;
        if batch.is_empty() {
            break;
        }

        let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
        let vectors = embed_with_retry(embedder, &texts, policy).await?;
        for (item, vector) in batch.iter().zip(vectors.iter()) {
            store
                .set_embedding(&item.source, &item.filename, vector, embedder.model_name())
                .await
                .map_err(Error::store)?;
        }
        embedded += batch.len();

        if !policy.batch_pause.is_zero() {
            tokio::time::sleep(policy.batch_pause).await;
        }
    }
    Ok(embedded)
}

/// CLI entry point for `docroute embed pending`.
pub async fn run_embed_pending(config: &Config, limit: Option<usize>, dry_run: bool) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    if dry_run {
        let pending = store
            .missing_embeddings(limit.unwrap_or(usize::MAX >> 1))
            .await?;
        println!("embed pending (dry-run)");
        println!("  records needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let embedder = create_embedder(&config.embedding)?;
    let policy = RetryPolicy::from_config(&config.embedding);
    let embedded = embed_pending(&store, embedder.as_ref(), &policy, limit).await?;
    info!(embedded, model = embedder.model_name(), "embedding backfill finished");

    println!("embed pending");
    println!("  embedded: {}", embedded);
    println!("ok");

    pool.close().await;
    Ok(())
}
