//! Error taxonomy shared by the router, the sync engine and the front-ends.
//!
//! "Not found" is deliberately absent: lookups return `Option`.

use thiserror::Error;

/// Failure kinds surfaced by retrieval and ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected before any external call (empty query, bad limit, unknown filter).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding provider failed in a way that is not retried.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// The embedding provider kept rate limiting past the retry ceiling.
    #[error("embedding provider still failing after {attempts} attempts: {last}")]
    RateLimitExceeded { attempts: u32, last: String },

    /// The corpus store failed.
    #[error("corpus store error: {0}")]
    Store(String),
}

impl Error {
    /// Wrap a store backend error, keeping its context chain in the message.
    pub fn store(err: anyhow::Error) -> Self {
        Error::Store(format!("{:#}", err))
    }

    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "bad_request",
            Error::Embedding(_) | Error::RateLimitExceeded { .. } => "upstream_error",
            Error::Store(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
