//! Configuration parsing and validation.
//!
//! docroute is configured with a TOML file (default `./config/docroute.toml`).
//! Every section except `[db]` has defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/docroute.sqlite"
//!
//! [sources.handbook]
//! root = "./docs"
//! ```
//!
//! See `config/docroute.example.toml` for every option.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docroute_core::chunk::ChunkParams;
use docroute_core::router::RouterParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Named markdown sources, keyed by source name.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub large_file_threshold: usize,
    pub max_chunk_chars: usize,
    pub min_section_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let p = ChunkParams::default();
        Self {
            large_file_threshold: p.large_file_threshold,
            max_chunk_chars: p.max_chunk_chars,
            min_section_chars: p.min_section_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            large_file_threshold: self.large_file_threshold,
            max_chunk_chars: self.max_chunk_chars,
            min_section_chars: self.min_section_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub confidence_threshold: f64,
    pub identifier_max_len: usize,
    pub candidate_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        let p = RouterParams::default();
        Self {
            default_limit: p.default_limit,
            max_limit: p.max_limit,
            confidence_threshold: p.confidence_threshold,
            identifier_max_len: p.identifier_max_len,
            candidate_k: p.candidate_k,
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RouterParams {
        RouterParams {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            confidence_threshold: self.confidence_threshold,
            identifier_max_len: self.identifier_max_len,
            candidate_k: self.candidate_k,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            batch_pause_ms: default_batch_pause_ms(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_batch_pause_ms() -> u64 {
    200
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Delete stored documents that no longer exist under the source root.
    pub prune_missing: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prune_missing: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7340".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_type")]
    pub source_type: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_source_type() -> String {
    "markdown".to_string()
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    let chunking = &config.chunking;
    if chunking.max_chunk_chars == 0 {
        bail!("chunking.max_chunk_chars must be > 0");
    }
    if chunking.large_file_threshold < chunking.max_chunk_chars {
        bail!("chunking.large_file_threshold must be >= chunking.max_chunk_chars");
    }

    // Validate retrieval
    let retrieval = &config.retrieval;
    if retrieval.max_limit < 1 {
        bail!("retrieval.max_limit must be >= 1");
    }
    if !(1..=retrieval.max_limit).contains(&retrieval.default_limit) {
        bail!("retrieval.default_limit must be between 1 and retrieval.max_limit");
    }
    if !(0.0..=1.0).contains(&retrieval.confidence_threshold) {
        bail!("retrieval.confidence_threshold must be in [0.0, 1.0]");
    }
    if retrieval.candidate_k < retrieval.max_limit {
        bail!("retrieval.candidate_k must be >= retrieval.max_limit");
    }

    // Validate embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }

    // Validate sources
    for (name, source) in &config.sources {
        if name.is_empty() || name == "all" {
            bail!("'{}' is not a valid source name", name);
        }
        if source.source_type.trim().is_empty() {
            bail!("sources.{}.source_type must not be empty", name);
        }
        if source.include_globs.is_empty() {
            bail!("sources.{}.include_globs must not be empty", name);
        }
    }

    Ok(config)
}
