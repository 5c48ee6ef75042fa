//! # docroute CLI
//!
//! The `docroute` binary indexes markdown sources into SQLite and answers
//! identifier and natural-language queries over them.
//!
//! ## Usage
//!
//! ```bash
//! docroute --config ./config/docroute.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docroute init` | Create the SQLite database and run schema migrations |
//! | `docroute sync <source\|all>` | Chunk, diff, embed and store a source |
//! | `docroute search "<query>"` | Route a query to the fuzzy or semantic path |
//! | `docroute get <filename>` | Print one stored record |
//! | `docroute sources` | Record counts per source |
//! | `docroute embed pending` | Backfill records stored without a vector |
//! | `docroute chunk <file>` | Preview how a file would be chunked |
//! | `docroute serve` | Start the HTTP server |
//! | `docroute completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! docroute init
//! docroute sync all
//! docroute search "NET.Retry.3"
//! docroute search "how do retries back off" --source handbook --json
//! docroute serve
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docroute::{chunk_cmd, config, embed_cmd, get, ingest, migrate, search, server, sources};

/// docroute: incremental markdown indexing with identifier-aware retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docroute.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "docroute", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docroute.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the records table and its
    /// full-text index. Safe to run repeatedly.
    Init,

    /// Sync one configured source, or `all`.
    ///
    /// Unchanged records are skipped; stale records of edited or deleted
    /// documents are removed.
    Sync {
        /// Source name from `[sources.<name>]`, or `all`.
        source: String,

        /// Show what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed records.
    Search {
        /// Identifier (e.g. `NET.Retry.3`) or natural-language question.
        query: String,

        /// Restrict to one source.
        #[arg(long)]
        source: Option<String>,

        /// Restrict to one source type.
        #[arg(long)]
        source_type: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print one stored record by filename.
    Get {
        /// Record filename, e.g. `guide.md` or `guide.md::Install`.
        filename: String,

        /// Source holding the record. Without it the latest write wins.
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List indexed sources with record counts.
    Sources {
        #[arg(long)]
        source_type: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Embedding maintenance.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show how a markdown file would be chunked.
    Chunk {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed records that were stored without a vector.
    Pending {
        /// Maximum number of records to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Show counts without embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Commands that don't require a config file
    match &cli.command {
        Commands::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "docroute", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Chunk { file, json } => {
            let params = if cli.config.exists() {
                config::load_config(&cli.config)?.chunking.params()
            } else {
                Default::default()
            };
            chunk_cmd::run_chunk(file, &params, *json)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { source, dry_run } => {
            ingest::run_sync(&cfg, &source, dry_run).await?;
        }
        Commands::Search {
            query,
            source,
            source_type,
            limit,
            json,
        } => {
            search::run_search(
                &cfg,
                &query,
                source.as_deref(),
                source_type.as_deref(),
                limit,
                json,
            )
            .await?;
        }
        Commands::Get {
            filename,
            source,
            json,
        } => {
            get::run_get(&cfg, &filename, source.as_deref(), json).await?;
        }
        Commands::Sources { source_type, json } => {
            sources::run_sources(&cfg, source_type.as_deref(), json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                embed_cmd::run_embed_pending(&cfg, limit, dry_run).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } | Commands::Chunk { .. } => {}
    }

    Ok(())
}
