//! `docroute search`: run one query through the router and print hits.

use anyhow::Result;

use docroute_core::models::SearchHit;
use docroute_core::router::{QueryRouter, SearchRequest};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::sqlite_store::SqliteStore;

const EXCERPT_CHARS: usize = 160;

pub async fn run_search(
    config: &Config,
    query: &str,
    source: Option<&str>,
    source_type: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;
    let router = QueryRouter::new(config.retrieval.params())?;

    let req = SearchRequest {
        query,
        source,
        source_type,
        limit,
    };
    let hits = router.search(&store, embedder.as_ref(), &req).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let matched_by = serde_json::to_value(hit.matched_by)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    println!("{}. [{:.2}] {}", rank, hit.score, hit.filename);
    println!("    source: {} ({})", hit.source, hit.source_type);
    println!("    matched by: {}", matched_by);
    println!("    excerpt: \"{}\"", excerpt(&hit.content));
    println!();
}

/// First line-folded characters of `content`, ellipsized when cut.
pub fn excerpt(content: &str) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}
