//! Embedding provider implementations.
//!
//! Concrete [`Embedder`] backends selected by `[embedding] provider`:
//! - **[`DisabledEmbedder`]**: always fails with [`EmbedError::Disabled`].
//! - **[`OpenAIEmbedder`]**: `POST https://api.openai.com/v1/embeddings`.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama.
//!
//! Providers make exactly one HTTP call per [`Embedder::embed`]. Retrying
//! is the caller's decision: the ingestion executor backs off on
//! [`EmbedError::RateLimited`] and [`EmbedError::Transient`], the query
//! path never retries.
//!
//! # Error mapping
//!
//! | Outcome | Error |
//! |---------|-------|
//! | HTTP 429 | `RateLimited` |
//! | HTTP 5xx, timeout, connection failure | `Transient` |
//! | other HTTP 4xx, malformed response | `Fatal` |

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

use docroute_core::embedding::{EmbedError, Embedder};

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Build the [`Embedder`] named by the configuration.
///
/// ```rust
/// # use docroute::config::EmbeddingConfig;
/// # use docroute::embedding::create_embedder;
/// let config = EmbeddingConfig::default(); // provider = "disabled"
/// let embedder = create_embedder(&config).unwrap();
/// assert_eq!(embedder.model_name(), "disabled");
/// ```
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// Placeholder used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            client: http_client(config)?,
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbedError::Transient(format!("OpenAI request failed: {}", e)))?;

        let json = read_json(response, "OpenAI").await?;
        let vectors = parse_openai_response(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Fatal("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EmbedError::Fatal("Invalid OpenAI response: missing embedding".into()))?;
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            client: http_client(config)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                EmbedError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let json = read_json(response, "Ollama").await?;
        let vectors = parse_ollama_response(&json)?;
        check_shape(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EmbedError::Fatal("Invalid Ollama response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|a| to_f32_vec(a)).ok_or_else(|| {
                EmbedError::Fatal("Invalid Ollama response: embedding is not an array".into())
            })
        })
        .collect()
}

// ============ Shared helpers ============

fn model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Map an HTTP failure status to the matching [`EmbedError`] kind.
fn status_error(provider: &str, status: StatusCode, body: &str) -> EmbedError {
    let message = format!("{} API error {}: {}", provider, status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbedError::RateLimited(message)
    } else if status.is_server_error() {
        EmbedError::Transient(message)
    } else {
        EmbedError::Fatal(message)
    }
}

async fn read_json(response: reqwest::Response, provider: &str) -> Result<serde_json::Value, EmbedError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, status, &body));
    }
    response
        .json()
        .await
        .map_err(|e| EmbedError::Transient(format!("{} response unreadable: {}", provider, e)))
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<(), EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::Fatal(format!(
            "provider returned {} vectors for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbedError::Fatal(format!(
            "provider returned {}-dimensional vector, expected {}",
            v.len(),
            dims
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error("OpenAI", StatusCode::TOO_MANY_REQUESTS, ""),
            EmbedError::RateLimited(_)
        ));
        assert!(matches!(
            status_error("OpenAI", StatusCode::BAD_GATEWAY, ""),
            EmbedError::Transient(_)
        ));
        let fatal = status_error("OpenAI", StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(fatal, EmbedError::Fatal(_)));
        assert!(fatal.to_string().contains("bad key"));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let body = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&json!({ "error": "x" })).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let body = json!({ "embeddings": [[0.5, 0.25], [1.0, 2.0]] });
        let vectors = parse_ollama_response(&body).unwrap();
        assert_eq!(vectors[1], vec![1.0, 2.0]);
        assert!(parse_ollama_response(&json!({ "embeddings": [1] })).is_err());
    }

    #[test]
    fn test_check_shape() {
        assert!(check_shape(&[vec![1.0, 2.0]], 1, 2).is_ok());
        assert!(check_shape(&[vec![1.0, 2.0]], 2, 2).is_err());
        assert!(check_shape(&[vec![1.0]], 1, 2).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert_eq!(err, EmbedError::Disabled);
    }

    #[test]
    fn test_ollama_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            dims: Some(8),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
        let config = EmbeddingConfig {
            model: Some("nomic-embed-text".to_string()),
            ..config
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 8);
    }
}
