//! `docroute sources`: record counts per indexed source.

use anyhow::Result;

use docroute_core::models::SourceCount;
use docroute_core::store::CorpusStore;
use docroute_core::Error;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Sources present in the store, optionally restricted to one source type.
pub async fn list_sources(
    store: &dyn CorpusStore,
    source_type: Option<&str>,
) -> docroute_core::Result<Vec<SourceCount>> {
    if source_type.is_some_and(|t| t.trim().is_empty()) {
        return Err(Error::InvalidInput("source_type must not be empty".to_string()));
    }
    store.list_sources(source_type).await.map_err(Error::store)
}

pub async fn run_sources(config: &Config, source_type: Option<&str>, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let sources = list_sources(&store, source_type).await?;
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("{:<24} {:<16} RECORDS", "SOURCE", "TYPE");
    for s in &sources {
        println!("{:<24} {:<16} {}", s.source, s.source_type, s.count);
    }

    // Configured but never synced
    let configured = config
        .sources
        .iter()
        .filter(|(_, s)| source_type.map_or(true, |t| t == s.source_type));
    for (name, source) in configured {
        if !sources.iter().any(|s| &s.source == name) {
            println!("{:<24} {:<16} (not synced)", name, source.source_type);
        }
    }
    Ok(())
}
