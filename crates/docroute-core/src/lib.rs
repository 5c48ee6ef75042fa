//! # docroute core
//!
//! Runtime-agnostic logic for docroute: record models, content
//! fingerprints, the hierarchical markdown chunker, the [`store::CorpusStore`]
//! and [`embedding::Embedder`] abstractions, the hybrid query router and the
//! incremental sync planner.
//!
//! This crate contains no tokio, sqlx, filesystem or network code. The
//! application crate supplies the SQLite store, HTTP embedders and the
//! ingestion executor.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod router;
pub mod store;
pub mod sync;

pub use error::{Error, Result};
