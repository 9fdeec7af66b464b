//! Briefsearch CLI - Command-line interface for hybrid search over clinical briefs.
//!
//! # Usage
//!
//! ```bash
//! # Search existing index
//! bsearch "diabetes elderly"
//! bsearch "glycemic targets" -n 5
//! bsearch "query" --json
//!
//! # Retrieve for several phrasings, rerank once against the first
//! bsearch "diabetes in older adults" -e "glycemic control elderly" -e "hba1c targets"
//!
//! # Index built with MiniLM embeddings (feature `neural-embedder`)
//! bsearch "blood sugar in older people" --embedder minilm
//!
//! # Index size and consistency; reconcile the two indexes
//! bsearch --status
//! bsearch --repair
//!
//! # Show help
//! bsearch --help
//! ```

mod config;
mod output;
mod search;

use anyhow::Result;
use clap::Parser;
use search::{EmbedderKind, RerankMode};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Briefsearch hybrid search CLI.
///
/// Search indexed clinical documents using fused keyword + semantic search.
#[derive(Parser)]
#[command(name = "bsearch", version, about)]
struct Cli {
    /// Search query
    query: Option<String>,

    /// Additional phrasings of the query, retrieved separately and merged
    #[arg(short = 'e', long = "expand", value_name = "QUERY")]
    expansions: Vec<String>,

    /// Maximum number of results to return (default: from config)
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Custom data directory (default: $BRIEFSEARCH_DATA_DIR or platform standard location)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON file with search settings (missing fields use defaults)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Embedding model the index was built with
    #[arg(long, value_enum, default_value_t = EmbedderKind::Hashing)]
    embedder: EmbedderKind,

    /// Return the fused ranking without reranking
    #[arg(long)]
    no_rerank: bool,

    /// Rerank with a cross-encoder model (downloaded on first use)
    #[cfg(feature = "cross-encoder")]
    #[arg(long, conflicts_with = "no_rerank")]
    cross_encoder: bool,

    /// Show document count and index consistency
    #[arg(long, conflicts_with = "query")]
    status: bool,

    /// Reconcile the lexical and semantic indexes
    #[arg(long, conflicts_with_all = ["query", "status"])]
    repair: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn rerank_mode(&self) -> RerankMode {
        if self.no_rerank {
            return RerankMode::Off;
        }
        #[cfg(feature = "cross-encoder")]
        let mode = if self.cross_encoder {
            RerankMode::CrossEncoder
        } else {
            RerankMode::TermOverlap
        };
        #[cfg(not(feature = "cross-encoder"))]
        let mode = RerankMode::TermOverlap;
        mode
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.query.is_none() && !cli.status && !cli.repair {
        eprintln!("No search query provided. Use --help for usage information.");
        std::process::exit(1);
    }

    let search_config = config::load_search_config(cli.config.as_ref())?;
    let limit = cli.limit.unwrap_or(search_config.default_top_k);
    let engine = search::open_engine(
        cli.data_dir.as_ref(),
        search_config,
        cli.embedder,
        cli.rerank_mode(),
    )?;

    if cli.status {
        let (stats, report) = search::execute_status(&engine).await;
        println!("{}", output::format_status(&stats, &report, cli.json));
        return Ok(());
    }

    if cli.repair {
        let (before, after) = search::execute_repair(&engine).await;
        println!("Before: {}", output::format_report(&before));
        println!("After: {}", output::format_report(&after));
        if !after.is_consistent() {
            std::process::exit(2);
        }
        return Ok(());
    }

    if let Some(query) = &cli.query {
        let results = search::execute_search(&engine, query, &cli.expansions, limit).await?;

        let output = if cli.json {
            output::format_json(query, &results)
        } else {
            output::format_human(query, &results)
        };

        println!("{}", output);
    }

    Ok(())
}
