//! # docroute
//!
//! Incremental markdown indexing with identifier-aware retrieval.
//!
//! Markdown sources are split along their heading hierarchy, fingerprinted,
//! and synced into SQLite so that only changed sections are re-embedded.
//! Queries are routed: identifiers such as `NET.Retry.3` go to a tiered
//! substring/full-text match, questions go to vector similarity, and weak
//! semantic answers are topped up with fuzzy matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  Sources    │──▶│ Chunk + Diff     │──▶│  SQLite   │
//! │ (markdown)  │   │ + batched Embed  │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────────┘   └─────┬─────┘
//!                                                │
//!                                  ┌─────────────┤
//!                                  ▼             ▼
//!                             ┌──────────┐  ┌──────────┐
//!                             │   CLI    │  │   HTTP   │
//!                             └──────────┘  └──────────┘
//! ```
//!
//! The runtime-agnostic pieces (chunker, sync planner, router, store and
//! embedder traits) live in the `docroute-core` crate; this crate wires
//! them to SQLite, HTTP embedding providers, the filesystem and axum.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `CorpusStore` |
//! | [`embedding`] | OpenAI / Ollama / disabled embedders |
//! | [`scanner`] | Filesystem walk for markdown sources |
//! | [`ingest`] | Sync executor with batching and backoff |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`search`] | `search` command |
//! | [`get`] | Record lookup |
//! | [`sources`] | Source listing |
//! | [`chunk_cmd`] | Chunking preview |
//! | [`server`] | HTTP server |

pub mod chunk_cmd;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod scanner;
pub mod search;
pub mod server;
pub mod sources;
pub mod sqlite_store;
