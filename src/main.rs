//! # context-chat CLI (`ctxchat`)
//!
//! ## Usage
//!
//! ```bash
//! ctxchat --config ./config/chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ctxchat ingest` | Index new files from the drop zone and archive them |
//! | `ctxchat search "<query>"` | Show the passages retrieved for a query |
//! | `ctxchat ask "<question>"` | Answer one question, then save the summary |
//! | `ctxchat chat` | Interactive session |
//! | `ctxchat summary` | Print the persisted summary of earlier sessions |
//! | `ctxchat stats` | Index and memory overview |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `context_chat=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use context_chat::memory::ConversationMemory;
use context_chat::{chat, config, ingest, search, stats};

/// context-chat: ask questions about the documents you drop in a folder.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/chat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ctxchat",
    about = "Retrieval-augmented chat over locally dropped documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new documents from the drop zone.
    ///
    /// Extracts, chunks and embeds every eligible file, writes all passages
    /// in one batch, then moves the files into the archive folder. Files
    /// whose content is already indexed are archived without re-embedding.
    Ingest {
        /// Report what would be ingested without embedding, writing or moving anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Retrieve the passages closest to a query.
    Search {
        query: String,

        /// Number of passages to show (defaults to `retrieval.search_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Answer a single question and save the session summary.
    Ask { question: String },

    /// Start an interactive session.
    ///
    /// `/history` prints the session so far; `/exit`, `exit`, `quit`,
    /// `salir` or end-of-input end it and save the summary.
    Chat,

    /// Print the persisted summary of earlier sessions.
    Summary,

    /// Show index and memory statistics.
    Stats,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("context_chat=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; keys may already be exported.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { dry_run } => {
            ingest::run_ingest(&cfg, dry_run).await?;
        }
        Commands::Search { query, k } => {
            search::run_search(&cfg, &query, k).await?;
        }
        Commands::Ask { question } => {
            chat::run_ask(cfg, &question).await?;
        }
        Commands::Chat => {
            chat::run_chat(cfg).await?;
        }
        Commands::Summary => {
            let memory =
                ConversationMemory::open(&cfg.memory.summary_path, cfg.memory.summary_max_words)?;
            let summary = memory.load_summary()?;
            if summary.is_empty() {
                println!("No summary saved yet.");
            } else {
                println!("{}", summary);
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
